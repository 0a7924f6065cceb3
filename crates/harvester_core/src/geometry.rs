use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in page space with a top-left origin (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Euclidean distance between the centers of two rectangles.
    pub fn center_distance(&self, other: &Rect) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// True when the interiors overlap; touching edges do not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 && other.y0 >= self.y0 && other.y1 <= self.y1
    }

    pub fn horizontal_overlap(&self, other: &Rect) -> f64 {
        (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0)
    }

    /// Reading-order comparison: top edge first, then left edge.
    pub fn reading_cmp(&self, other: &Rect) -> Ordering {
        self.y0
            .total_cmp(&other.y0)
            .then_with(|| self.x0.total_cmp(&other.x0))
    }
}

/// PDF affine matrix `[a b c d e f]`, mapping `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self` applied first, then `other` (PDF `cm` semantics: `new_ctm = m.then(ctm)`).
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Bounding box of a rectangle after transformation (no origin flip).
    pub fn transform_rect(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(x0, y0),
            self.apply(x1, y0),
            self.apply(x0, y1),
            self.apply(x1, y1),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f64::MAX, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::MIN, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::MAX, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::MIN, f64::max);
        (min_x, min_y, max_x, max_y)
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Converts bottom-left-origin PDF user space into the top-left page space used for layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    pub origin_x: f64,
    pub top: f64,
}

impl PageFrame {
    /// Frame for a page whose media box is `[llx lly urx ury]`.
    pub fn from_media_box(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        Self {
            origin_x: llx.min(urx),
            top: lly.max(ury),
        }
    }

    pub fn to_page_rect(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect {
        Rect::new(
            min_x - self.origin_x,
            self.top - max_y,
            max_x - self.origin_x,
            self.top - min_y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Matrix, PageFrame, Rect};

    #[test]
    fn concatenation_applies_left_operand_first() {
        let scale = Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let shift = Matrix::translate(10.0, 5.0);
        assert_eq!(scale.then(&shift).apply(1.0, 1.0), (12.0, 7.0));
        assert_eq!(shift.then(&scale).apply(1.0, 1.0), (22.0, 12.0));
    }

    #[test]
    fn page_frame_flips_vertical_axis() {
        let frame = PageFrame::from_media_box(0.0, 0.0, 600.0, 800.0);
        let rect = frame.to_page_rect(100.0, 700.0, 200.0, 750.0);
        assert_eq!(rect, Rect::new(100.0, 50.0, 200.0, 100.0));
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.union(&b).contains(&b));
    }
}
