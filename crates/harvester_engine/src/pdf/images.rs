//! Recovery of embedded image XObjects into decodable pixels.
use std::collections::HashMap;
use std::io::Cursor;

use harvester_core::PixelStep;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::{Document, Object, Stream};
use thiserror::Error;

use super::objects::{decode_filters, filters, get, get_name, get_number, resolve, stream_bytes};
use super::PdfError;

/// Share of pixels held by the most common colour above which a masked image
/// counts as blank.
const MONOCHROME_SHARE: f64 = 0.95;

#[derive(Debug, Error)]
pub enum ImageRecoveryError {
    #[error("object is not an image stream")]
    NotAnImage,
    #[error("missing or invalid /{0}")]
    MissingAttribute(&'static str),
    #[error("unsupported filter {0}")]
    UnsupportedFilter(String),
    #[error("unsupported colour space {0}")]
    UnsupportedColorSpace(String),
    #[error("unsupported bits per component {0}")]
    UnsupportedBitDepth(u32),
    #[error("sample data too short: expected {expected} bytes, got {actual}")]
    ShortData { expected: usize, actual: usize },
    #[error("masked image is nearly monochrome")]
    Monochrome,
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
}

/// A recovered image re-encoded for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed { base: Box<ColorSpace>, palette: Vec<u8> },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

/// Declared `/Width` and `/Height` of an image stream.
pub fn declared_size(doc: &Document, stream: &Stream) -> Option<(u32, u32)> {
    let width = get_number(doc, &stream.dict, b"Width")?;
    let height = get_number(doc, &stream.dict, b"Height")?;
    if width < 1.0 || height < 1.0 {
        return None;
    }
    Some((width as u32, height as u32))
}

/// Decodes an image stream, compositing its soft mask into an alpha channel.
pub fn recover_image(doc: &Document, stream: &Stream) -> Result<DynamicImage, ImageRecoveryError> {
    if get_name(doc, &stream.dict, b"Subtype") != Some(&b"Image"[..]) {
        return Err(ImageRecoveryError::NotAnImage);
    }
    let base = decode_pixels(doc, stream)?;

    let Some(Object::Stream(mask_stream)) = get(doc, &stream.dict, b"SMask") else {
        return Ok(base);
    };
    let mut mask = decode_pixels(doc, mask_stream)?.to_luma8();
    if mask.dimensions() != (base.width(), base.height()) {
        mask = image::imageops::resize(&mask, base.width(), base.height(), FilterType::Triangle);
    }
    let mut rgba = base.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel.0[3] = alpha.0[0];
    }
    if is_monochrome(&rgba) {
        return Err(ImageRecoveryError::Monochrome);
    }
    Ok(DynamicImage::ImageRgba8(rgba))
}

fn is_monochrome(image: &RgbaImage) -> bool {
    let total = u64::from(image.width()) * u64::from(image.height());
    if total == 0 {
        return true;
    }
    let mut counts: HashMap<[u8; 4], u64> = HashMap::new();
    for pixel in image.pixels() {
        *counts.entry(pixel.0).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    top as f64 / total as f64 > MONOCHROME_SHARE
}

fn decode_pixels(doc: &Document, stream: &Stream) -> Result<DynamicImage, ImageRecoveryError> {
    let filters = filters(doc, stream);
    let is_dct = filters
        .last()
        .is_some_and(|f| f.as_slice() == b"DCTDecode" || f.as_slice() == b"DCT");
    if is_dct {
        let data = if filters.len() > 1 {
            decode_filters(stream, &filters[..filters.len() - 1])
                .map_err(|err| PdfError::Malformed(err.to_string()))?
        } else {
            stream.content.clone()
        };
        return Ok(image::load_from_memory_with_format(&data, ImageFormat::Jpeg)?);
    }

    let samples = stream_bytes(doc, stream).map_err(|err| match err {
        PdfError::UnsupportedFilter(name) => ImageRecoveryError::UnsupportedFilter(name),
        other => ImageRecoveryError::Pdf(other),
    })?;
    let (width, height) =
        declared_size(doc, stream).ok_or(ImageRecoveryError::MissingAttribute("Width"))?;
    let bpc = get_number(doc, &stream.dict, b"BitsPerComponent").unwrap_or(8.0) as u32;
    let color_space = match get(doc, &stream.dict, b"ColorSpace") {
        Some(object) => color_space(doc, object)?,
        None => ColorSpace::Gray,
    };
    raster(&samples, width, height, bpc, &color_space)
}

fn color_space(doc: &Document, object: &Object) -> Result<ColorSpace, ImageRecoveryError> {
    let unsupported = |name: &[u8]| {
        ImageRecoveryError::UnsupportedColorSpace(String::from_utf8_lossy(name).into_owned())
    };
    match resolve(doc, object) {
        Some(Object::Name(name)) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
            other => Err(unsupported(other)),
        },
        Some(Object::Array(items)) => {
            let family = match items.first().and_then(|item| resolve(doc, item)) {
                Some(Object::Name(name)) => name.as_slice(),
                _ => return Err(unsupported(&b"?"[..])),
            };
            match family {
                b"CalGray" => Ok(ColorSpace::Gray),
                b"CalRGB" => Ok(ColorSpace::Rgb),
                b"ICCBased" => {
                    let Some(Object::Stream(profile)) = items.get(1).and_then(|i| resolve(doc, i)) else {
                        return Err(unsupported(family));
                    };
                    match get_number(doc, &profile.dict, b"N").map(|n| n as u32) {
                        Some(1) => Ok(ColorSpace::Gray),
                        Some(3) => Ok(ColorSpace::Rgb),
                        Some(4) => Ok(ColorSpace::Cmyk),
                        _ => match get(doc, &profile.dict, b"Alternate") {
                            Some(alternate) => color_space(doc, alternate),
                            None => Err(unsupported(family)),
                        },
                    }
                }
                b"Indexed" | b"I" => {
                    let base = items
                        .get(1)
                        .ok_or_else(|| unsupported(family))
                        .and_then(|b| color_space(doc, b))?;
                    let palette = match items.get(3).and_then(|i| resolve(doc, i)) {
                        Some(Object::String(bytes, _)) => bytes.clone(),
                        Some(Object::Stream(table)) => stream_bytes(doc, table)?,
                        _ => return Err(unsupported(family)),
                    };
                    if matches!(base, ColorSpace::Indexed { .. }) {
                        return Err(unsupported(family));
                    }
                    Ok(ColorSpace::Indexed {
                        base: Box::new(base),
                        palette,
                    })
                }
                other => Err(unsupported(other)),
            }
        }
        _ => Err(unsupported(&b"?"[..])),
    }
}

/// Splits row-padded samples of `bpc` bits into one value per component.
fn unpack(samples: &[u8], width: usize, height: usize, components: usize, bpc: u32) -> Option<Vec<u8>> {
    let row_values = width * components;
    if bpc == 8 {
        let needed = row_values * height;
        return samples.get(..needed).map(<[u8]>::to_vec);
    }
    let row_bytes = (row_values * bpc as usize).div_ceil(8);
    if samples.len() < row_bytes * height {
        return None;
    }
    let mask = (1u16 << bpc) - 1;
    let mut values = Vec::with_capacity(row_values * height);
    for row in samples.chunks(row_bytes).take(height) {
        for idx in 0..row_values {
            let bit = idx * bpc as usize;
            let byte = u16::from(row[bit / 8]);
            let shift = 8 - bpc as usize - (bit % 8);
            values.push(((byte >> shift) & mask) as u8);
        }
    }
    Some(values)
}

fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let channel = |v: u8| ((255 - u16::from(v)) * (255 - u16::from(k)) / 255) as u8;
    [channel(c), channel(m), channel(y)]
}

fn raster(
    samples: &[u8],
    width: u32,
    height: u32,
    bpc: u32,
    color_space: &ColorSpace,
) -> Result<DynamicImage, ImageRecoveryError> {
    let components = color_space.components();
    let allowed = match color_space {
        ColorSpace::Gray | ColorSpace::Indexed { .. } => matches!(bpc, 1 | 2 | 4 | 8),
        ColorSpace::Rgb | ColorSpace::Cmyk => bpc == 8,
    };
    if !allowed {
        return Err(ImageRecoveryError::UnsupportedBitDepth(bpc));
    }
    let (w, h) = (width as usize, height as usize);
    let values = unpack(samples, w, h, components, bpc).ok_or(ImageRecoveryError::ShortData {
        expected: (w * components * bpc as usize).div_ceil(8) * h,
        actual: samples.len(),
    })?;

    let image = match color_space {
        ColorSpace::Gray => {
            let max = ((1u16 << bpc) - 1) as u32;
            let scaled = values
                .into_iter()
                .map(|v| (u32::from(v) * 255 / max) as u8)
                .collect();
            GrayImage::from_raw(width, height, scaled).map(DynamicImage::ImageLuma8)
        }
        ColorSpace::Rgb => RgbImage::from_raw(width, height, values).map(DynamicImage::ImageRgb8),
        ColorSpace::Cmyk => {
            let rgb = values
                .chunks_exact(4)
                .flat_map(|px| cmyk_to_rgb(px[0], px[1], px[2], px[3]))
                .collect();
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Indexed { base, palette } => {
            let n = base.components();
            let mut rgb = Vec::with_capacity(values.len() * 3);
            for index in values {
                let start = usize::from(index) * n;
                let entry = palette.get(start..start + n).unwrap_or(&[0, 0, 0, 0][..n]);
                let pixel = match **base {
                    ColorSpace::Gray => [entry[0]; 3],
                    ColorSpace::Cmyk => cmyk_to_rgb(entry[0], entry[1], entry[2], entry[3]),
                    _ => [entry[0], entry[1], entry[2]],
                };
                rgb.extend_from_slice(&pixel);
            }
            RgbImage::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
    };
    image.ok_or(ImageRecoveryError::ShortData {
        expected: w * h * components,
        actual: samples.len(),
    })
}

/// Applies lossless flips/rotations in order.
pub fn apply_steps(image: DynamicImage, steps: &[PixelStep]) -> DynamicImage {
    steps.iter().fold(image, |image, step| match step {
        PixelStep::FlipHorizontal => image.fliph(),
        PixelStep::FlipVertical => image.flipv(),
        PixelStep::RotateClockwise => image.rotate90(),
        PixelStep::RotateCounterClockwise => image.rotate270(),
        PixelStep::RotateHalf => image.rotate180(),
    })
}

/// PNG when the image carries transparency, JPEG otherwise.
pub fn encode_image(image: &DynamicImage) -> Result<EncodedImage, ImageRecoveryError> {
    let mut bytes = Vec::new();
    let extension = if image.color().has_alpha() {
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        "png"
    } else {
        let flat = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        flat.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        "jpg"
    };
    Ok(EncodedImage {
        bytes,
        extension,
        width: image.width(),
        height: image.height(),
    })
}
