use crate::geometry::Matrix;

const EPSILON: f64 = 1e-9;

/// Canonical image placement categories derived from the linear part of a placement matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Upright,
    FlipHorizontal,
    FlipVertical,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipVerticalRotate90,
    Rotate90FlipVertical,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::Upright,
        Orientation::FlipHorizontal,
        Orientation::FlipVertical,
        Orientation::Rotate90,
        Orientation::Rotate180,
        Orientation::Rotate270,
        Orientation::FlipVerticalRotate90,
        Orientation::Rotate90FlipVertical,
    ];

    /// Classifies by the signs and zero pattern of `[a b c d]`.
    ///
    /// Shears and arbitrary rotations are not representable and classify as `Upright`.
    pub fn classify(matrix: &Matrix) -> Orientation {
        let zero = |v: f64| v.abs() < EPSILON;
        if zero(matrix.b) && zero(matrix.c) {
            if matrix.a * matrix.d > 0.0 {
                if matrix.a < 0.0 {
                    Orientation::Rotate180
                } else {
                    Orientation::Upright
                }
            } else if matrix.a < 0.0 {
                Orientation::FlipHorizontal
            } else {
                Orientation::FlipVertical
            }
        } else if zero(matrix.a) && zero(matrix.d) {
            if matrix.b * matrix.c < 0.0 {
                if matrix.b > 0.0 {
                    Orientation::Rotate90
                } else {
                    Orientation::Rotate270
                }
            } else if matrix.b > 0.0 {
                Orientation::FlipVerticalRotate90
            } else {
                Orientation::Rotate90FlipVertical
            }
        } else {
            Orientation::Upright
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Orientation::Upright => "nothing",
            Orientation::FlipHorizontal => "left-right",
            Orientation::FlipVertical => "up-down",
            Orientation::Rotate90 => "rot 90",
            Orientation::Rotate180 => "rot 180",
            Orientation::Rotate270 => "rot 270",
            Orientation::FlipVerticalRotate90 => "up-down, rot 90",
            Orientation::Rotate90FlipVertical => "rot 90, up-down",
        }
    }

    /// Pixel steps that bring stored pixels to the visual page orientation, in order.
    pub fn correction_steps(&self) -> &'static [PixelStep] {
        use PixelStep::*;
        match self {
            Orientation::Upright => &[],
            Orientation::FlipHorizontal => &[FlipHorizontal],
            Orientation::FlipVertical => &[FlipVertical],
            Orientation::Rotate90 => &[RotateCounterClockwise],
            Orientation::Rotate180 => &[RotateHalf],
            Orientation::Rotate270 => &[RotateClockwise],
            Orientation::FlipVerticalRotate90 => &[FlipVertical, RotateCounterClockwise],
            Orientation::Rotate90FlipVertical => &[RotateCounterClockwise, FlipVertical],
        }
    }

    /// Steps undoing [`Orientation::correction_steps`].
    pub fn inverse_steps(&self) -> Vec<PixelStep> {
        self.correction_steps()
            .iter()
            .rev()
            .map(PixelStep::inverse)
            .collect()
    }
}

/// Lossless pixel operation on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelStep {
    FlipHorizontal,
    FlipVertical,
    RotateClockwise,
    RotateCounterClockwise,
    RotateHalf,
}

impl PixelStep {
    pub fn inverse(&self) -> PixelStep {
        match self {
            PixelStep::RotateClockwise => PixelStep::RotateCounterClockwise,
            PixelStep::RotateCounterClockwise => PixelStep::RotateClockwise,
            other => *other,
        }
    }
}
