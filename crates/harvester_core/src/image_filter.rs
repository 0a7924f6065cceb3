use std::fmt;

use serde::{Deserialize, Serialize};

/// Admission thresholds for embedded images. All bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFilter {
    pub min_side_px: u32,
    pub max_side_px: u32,
    pub min_bytes: usize,
    pub min_byte_ratio: f64,
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self {
            min_side_px: 150,
            max_side_px: 20_000,
            min_bytes: 2048,
            min_byte_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageRejection {
    TooSmall { width: u32, height: u32 },
    TooLarge { width: u32, height: u32 },
    TooFewBytes { bytes: usize },
    Degenerate { ratio: f64 },
}

impl fmt::Display for ImageRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRejection::TooSmall { width, height } => write!(f, "too small ({width}x{height})"),
            ImageRejection::TooLarge { width, height } => write!(f, "too large ({width}x{height})"),
            ImageRejection::TooFewBytes { bytes } => write!(f, "only {bytes} bytes"),
            ImageRejection::Degenerate { ratio } => write!(f, "byte ratio {ratio:.4}"),
        }
    }
}

impl ImageFilter {
    /// Declared dimensions check, done before any pixel recovery.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), ImageRejection> {
        if width.min(height) <= self.min_side_px {
            return Err(ImageRejection::TooSmall { width, height });
        }
        if width.max(height) >= self.max_side_px {
            return Err(ImageRejection::TooLarge { width, height });
        }
        Ok(())
    }

    /// Recovered payload check: near-blank images compress to almost nothing.
    pub fn check_payload(
        &self,
        byte_len: usize,
        width: u32,
        height: u32,
        components: u32,
    ) -> Result<(), ImageRejection> {
        if byte_len <= self.min_bytes {
            return Err(ImageRejection::TooFewBytes { bytes: byte_len });
        }
        let samples = u64::from(width) * u64::from(height) * u64::from(components.max(1));
        let ratio = byte_len as f64 / samples.max(1) as f64;
        if ratio <= self.min_byte_ratio {
            return Err(ImageRejection::Degenerate { ratio });
        }
        Ok(())
    }
}
