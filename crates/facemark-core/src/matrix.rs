//! 2×3 affine matrix and whole-image remapping.
//!
//! Transforms compose in "post" order: each `post_*` call applies after the
//! transforms already in the matrix, so `Matrix::new().post_rotate(90.0).post_scale(1.0, -1.0)`
//! rotates first and flips second.

use image::{DynamicImage, ImageBuffer, Pixel};

/// Affine transform `[a, b, tx, c, d, ty]`:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    m: [f32; 6],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Matrix {
    /// Identity.
    pub fn new() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub fn values(&self) -> [f32; 6] {
        self.m
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::new()
    }

    /// Post-concatenate a rotation. Positive degrees turn clockwise in y-down image space.
    pub fn post_rotate(self, degrees: f32) -> Self {
        let (sin, cos) = exact_sin_cos(degrees);
        self.post_concat([cos, -sin, 0.0, sin, cos, 0.0])
    }

    pub fn post_scale(self, sx: f32, sy: f32) -> Self {
        self.post_concat([sx, 0.0, 0.0, 0.0, sy, 0.0])
    }

    pub fn post_translate(self, dx: f32, dy: f32) -> Self {
        self.post_concat([1.0, 0.0, dx, 0.0, 1.0, dy])
    }

    /// `other * self`: apply `self`, then `other`.
    fn post_concat(self, other: [f32; 6]) -> Self {
        let [a, b, tx, c, d, ty] = self.m;
        let [oa, ob, otx, oc, od, oty] = other;
        Self {
            m: [
                oa * a + ob * c,
                oa * b + ob * d,
                oa * tx + ob * ty + otx,
                oc * a + od * c,
                oc * b + od * d,
                oc * tx + od * ty + oty,
            ],
        }
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, tx, c, d, ty] = self.m;
        (a * x + b * y + tx, c * x + d * y + ty)
    }

    /// Axis-aligned bounds `(left, top, right, bottom)` of the mapped `width × height` rectangle.
    pub fn map_rect(&self, width: f32, height: f32) -> (f32, f32, f32, f32) {
        let corners = [
            self.map_point(0.0, 0.0),
            self.map_point(width, 0.0),
            self.map_point(0.0, height),
            self.map_point(width, height),
        ];
        corners.iter().fold(
            (f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            |(l, t, r, b), &(x, y)| (l.min(x), t.min(y), r.max(x), b.max(y)),
        )
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Self> {
        let [a, b, tx, c, d, ty] = self.m;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let ia = d * inv_det;
        let ib = -b * inv_det;
        let ic = -c * inv_det;
        let id = a * inv_det;
        Some(Self {
            m: [ia, ib, -(ia * tx + ib * ty), ic, id, -(ic * tx + id * ty)],
        })
    }
}

/// Sine and cosine with exact values on the quarter turns, so right-angle
/// rotations remap pixels without drift.
fn exact_sin_cos(degrees: f32) -> (f32, f32) {
    let turn = degrees.rem_euclid(360.0);
    match turn {
        t if t == 0.0 => (0.0, 1.0),
        t if t == 90.0 => (1.0, 0.0),
        t if t == 180.0 => (0.0, -1.0),
        t if t == 270.0 => (-1.0, 0.0),
        t => t.to_radians().sin_cos(),
    }
}

/// Remap every pixel of `src` through `matrix` into a new buffer.
///
/// The output covers the bounds of the mapped source rectangle, translated to
/// the origin. Each output pixel centre is inverse-mapped and sampled with
/// nearest-neighbour; samples outside the source stay zero.
pub fn transform_buffer<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    matrix: &Matrix,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let (src_w, src_h) = src.dimensions();
    let (left, top, right, bottom) = matrix.map_rect(src_w as f32, src_h as f32);
    let out_w = (right - left).round().max(0.0) as u32;
    let out_h = (bottom - top).round().max(0.0) as u32;

    let mut out = ImageBuffer::<P, Vec<P::Subpixel>>::new(out_w, out_h);
    let Some(inverse) = matrix.invert() else {
        return out;
    };

    for oy in 0..out_h {
        for ox in 0..out_w {
            let (sx, sy) = inverse.map_point(ox as f32 + 0.5 + left, oy as f32 + 0.5 + top);
            let (px, py) = (sx.floor(), sy.floor());
            if px >= 0.0 && py >= 0.0 && (px as u32) < src_w && (py as u32) < src_h {
                out.put_pixel(ox, oy, *src.get_pixel(px as u32, py as u32));
            }
        }
    }

    out
}

/// [`transform_buffer`] over any `DynamicImage`, keeping the pixel format.
pub fn transform_image(src: &DynamicImage, matrix: &Matrix) -> DynamicImage {
    match src {
        DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(transform_buffer(b, matrix)),
        DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(transform_buffer(b, matrix)),
        DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(transform_buffer(b, matrix)),
        DynamicImage::ImageRgba8(b) => DynamicImage::ImageRgba8(transform_buffer(b, matrix)),
        DynamicImage::ImageLuma16(b) => DynamicImage::ImageLuma16(transform_buffer(b, matrix)),
        DynamicImage::ImageLumaA16(b) => DynamicImage::ImageLumaA16(transform_buffer(b, matrix)),
        DynamicImage::ImageRgb16(b) => DynamicImage::ImageRgb16(transform_buffer(b, matrix)),
        DynamicImage::ImageRgba16(b) => DynamicImage::ImageRgba16(transform_buffer(b, matrix)),
        DynamicImage::ImageRgb32F(b) => DynamicImage::ImageRgb32F(transform_buffer(b, matrix)),
        DynamicImage::ImageRgba32F(b) => DynamicImage::ImageRgba32F(transform_buffer(b, matrix)),
        other => DynamicImage::ImageRgba8(transform_buffer(&other.to_rgba8(), matrix)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn numbered(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([(y * w + x) as u8]))
    }

    #[test]
    fn test_rotate_then_flip_order() {
        let m = Matrix::new().post_rotate(90.0).post_scale(1.0, -1.0);
        // (1, 0) → rotate → (0, 1) → flip → (0, -1)
        let (x, y) = m.map_point(1.0, 0.0);
        assert!(x.abs() < 1e-6 && (y + 1.0).abs() < 1e-6, "({x}, {y})");
    }

    #[test]
    fn test_exact_quarter_turns() {
        let m = Matrix::new().post_rotate(90.0);
        assert_eq!(m.values(), [0.0, -1.0, 0.0, 1.0, 0.0, 0.0]);
        let m = Matrix::new().post_rotate(-90.0);
        assert_eq!(m.values(), [0.0, 1.0, 0.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invert_roundtrip() {
        let m = Matrix::new().post_rotate(30.0).post_scale(2.0, 0.5).post_translate(7.0, -3.0);
        let inv = m.invert().unwrap();
        let (x, y) = m.map_point(12.0, 5.0);
        let (bx, by) = inv.map_point(x, y);
        assert!((bx - 12.0).abs() < 1e-3 && (by - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_singular_matrix() {
        assert!(Matrix::new().post_scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn test_rotate_90_clockwise_pixels() {
        // 3x2 source:
        // 0 1 2
        // 3 4 5
        let src = numbered(3, 2);
        let out = transform_buffer(&src, &Matrix::new().post_rotate(90.0));
        assert_eq!(out.dimensions(), (2, 3));
        // Clockwise: first column, bottom-up, becomes first row.
        // 3 0
        // 4 1
        // 5 2
        let got: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(got, vec![3, 0, 4, 1, 5, 2]);
    }

    #[test]
    fn test_vertical_flip_pixels() {
        let src = numbered(2, 2);
        let out = transform_buffer(&src, &Matrix::new().post_scale(1.0, -1.0));
        let got: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(got, vec![2, 3, 0, 1]);
    }

    #[test]
    fn test_transform_keeps_format() {
        let src = DynamicImage::ImageRgb8(image::RgbImage::new(4, 2));
        let out = transform_image(&src, &Matrix::new().post_rotate(270.0));
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (2, 4));
    }
}
