//! Image geometry: decode-time downsampling, orientation probing, rotation and flips.

use crate::matrix::{self, Matrix};
use crate::types::Orientation;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

// EXIF 0x0112 values that need a rotation to present upright.
const EXIF_ROTATE_180: u32 = 3;
const EXIF_ROTATE_90: u32 = 6;
const EXIF_ROTATE_270: u32 = 8;

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// Power-of-two decode factor for an image `width` pixels wide, targeting `requested_width`.
///
/// Doubles while half the width, divided by the factor, still exceeds the
/// request. Non-positive input yields 1.
pub fn sample_size(width: i32, requested_width: i32) -> u32 {
    let mut factor: i64 = 1;

    if width > 0 && requested_width > 0 {
        let half_width = i64::from(width / 2);
        while half_width / factor > i64::from(requested_width) {
            factor *= 2;
        }
    }

    factor as u32
}

/// Read image dimensions from the header without decoding pixels.
pub fn image_size<R: BufRead + Seek>(reader: R) -> Result<(u32, u32), BitmapError> {
    Ok(ImageReader::new(reader)
        .with_guessed_format()?
        .into_dimensions()?)
}

/// Open `path`, mapping a missing file to [`BitmapError::NotFound`].
pub fn open(path: &Path) -> Result<BufReader<File>, BitmapError> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BitmapError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(BitmapError::Io(e)),
    }
}

/// Clockwise rotation needed to show the image upright.
///
/// Uses the EXIF orientation tag when it names a rotation. Otherwise a
/// landscape image is assumed to be a sideways portrait capture and gets 90.
pub fn photo_orientation<R: BufRead + Seek>(mut reader: R) -> Result<Orientation, BitmapError> {
    let tag = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0)),
        Err(e) => {
            tracing::debug!(error = %e, "no readable EXIF, falling back to aspect ratio");
            None
        }
    };

    match tag {
        Some(EXIF_ROTATE_180) => Ok(Orientation::Deg180),
        Some(EXIF_ROTATE_90) => Ok(Orientation::Deg90),
        Some(EXIF_ROTATE_270) => Ok(Orientation::Deg270),
        _ => {
            reader.seek(SeekFrom::Start(0))?;
            let (width, height) = image_size(reader)?;
            Ok(if width > height {
                Orientation::Deg90
            } else {
                Orientation::Deg0
            })
        }
    }
}

pub fn photo_orientation_path(path: &Path) -> Result<Orientation, BitmapError> {
    photo_orientation(open(path)?)
}

/// Rotate clockwise by `orientation`, then optionally mirror vertically.
///
/// `Deg0` hands back the borrowed source even when `flip` is set; callers that
/// only want a mirror use [`flip`].
pub fn rotate_bitmap<'a>(
    src: Option<&'a DynamicImage>,
    orientation: Orientation,
    flip: bool,
) -> Option<Cow<'a, DynamicImage>> {
    let src = src?;
    if orientation == Orientation::Deg0 {
        return Some(Cow::Borrowed(src));
    }

    let mut mtx = Matrix::new().post_rotate(f32::from(orientation.degrees()));
    if flip {
        mtx = flip_matrix(mtx);
    }

    Some(Cow::Owned(matrix::transform_image(src, &mtx)))
}

pub fn rotate(src: Option<&DynamicImage>, orientation: Orientation) -> Option<Cow<'_, DynamicImage>> {
    rotate_bitmap(src, orientation, false)
}

/// Vertical mirror.
pub fn flip(src: Option<&DynamicImage>) -> Option<DynamicImage> {
    let src = src?;
    Some(matrix::transform_image(src, &flip_matrix(Matrix::new())))
}

fn flip_matrix(input: Matrix) -> Matrix {
    input.post_scale(1.0, -1.0)
}

/// Shrink by an integer decode factor, as a sampled decode would.
pub fn downsample(image: &DynamicImage, factor: u32) -> Cow<'_, DynamicImage> {
    if factor <= 1 {
        return Cow::Borrowed(image);
    }
    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    Cow::Owned(image.resize_exact(width, height, FilterType::Triangle))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, RgbImage};
    use proptest::prelude::*;
    use std::io::Cursor;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Minimal JPEG container: SOI, an APP1 Exif segment holding a single
    /// IFD0 Orientation entry, EOI.
    pub(crate) fn jpeg_with_orientation(tag: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes()); // entry count
        tiff.extend_from_slice(&0x0112u16.to_le_bytes()); // Orientation
        tiff.extend_from_slice(&3u16.to_le_bytes()); // SHORT
        tiff.extend_from_slice(&1u32.to_le_bytes()); // count
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes()); // no next IFD

        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend_from_slice(&tiff);

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpeg.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        jpeg.extend_from_slice(&app1);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    fn numbered(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| Luma([(y * w + x) as u8])))
    }

    #[test]
    fn test_sample_size_non_positive() {
        assert_eq!(sample_size(0, 100), 1);
        assert_eq!(sample_size(100, 0), 1);
        assert_eq!(sample_size(-5, -5), 1);
    }

    #[test]
    fn test_sample_size_half_width_bias() {
        // 800 / 2 = 400, not > 400
        assert_eq!(sample_size(800, 400), 1);
        assert_eq!(sample_size(802, 400), 2);
        assert_eq!(sample_size(4000, 500), 4);
        assert_eq!(sample_size(4000, 499), 8);
    }

    proptest! {
        #[test]
        fn prop_sample_size_minimal_power_of_two(width in 1i32..200_000, req in 1i32..20_000) {
            let factor = sample_size(width, req);
            prop_assert!(factor.is_power_of_two());
            let half = i64::from(width / 2);
            prop_assert!(half / i64::from(factor) <= i64::from(req));
            if factor > 1 {
                prop_assert!(half / i64::from(factor / 2) > i64::from(req));
            }
        }
    }

    #[test]
    fn test_image_size_bounds_only() {
        let bytes = png_bytes(37, 21);
        assert_eq!(image_size(Cursor::new(bytes)).unwrap(), (37, 21));
    }

    #[test]
    fn test_orientation_from_exif() {
        for (tag, expected) in [
            (3u16, Orientation::Deg180),
            (6, Orientation::Deg90),
            (8, Orientation::Deg270),
        ] {
            let got = photo_orientation(Cursor::new(jpeg_with_orientation(tag))).unwrap();
            assert_eq!(got, expected, "EXIF orientation {tag}");
        }
    }

    #[test]
    fn test_orientation_untagged_landscape() {
        let got = photo_orientation(Cursor::new(png_bytes(40, 30))).unwrap();
        assert_eq!(got, Orientation::Deg90);
    }

    #[test]
    fn test_orientation_untagged_portrait_and_square() {
        let got = photo_orientation(Cursor::new(png_bytes(30, 40))).unwrap();
        assert_eq!(got, Orientation::Deg0);
        let got = photo_orientation(Cursor::new(png_bytes(30, 30))).unwrap();
        assert_eq!(got, Orientation::Deg0);
    }

    #[test]
    fn test_orientation_unreadable_source_errors() {
        let result = photo_orientation(Cursor::new(b"not an image".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn test_orientation_missing_file() {
        let path = Path::new("/nonexistent/facemark/photo.jpg");
        let err = photo_orientation_path(path).unwrap_err();
        assert!(matches!(err, BitmapError::NotFound(p) if p == path));
    }

    #[test]
    fn test_rotate_none_passthrough() {
        assert!(rotate_bitmap(None, Orientation::Deg90, true).is_none());
        assert!(flip(None).is_none());
    }

    #[test]
    fn test_rotate_zero_returns_same_reference() {
        let img = numbered(4, 3);
        match rotate_bitmap(Some(&img), Orientation::Deg0, false) {
            Some(Cow::Borrowed(out)) => assert!(std::ptr::eq(out, &img)),
            other => panic!("expected borrowed source, got {other:?}"),
        }
    }

    #[test]
    fn test_rotate_dimensions() {
        let img = numbered(6, 4);
        let r90 = rotate(Some(&img), Orientation::Deg90).unwrap();
        assert_eq!((r90.width(), r90.height()), (4, 6));
        let r180 = rotate(Some(&img), Orientation::Deg180).unwrap();
        assert_eq!((r180.width(), r180.height()), (6, 4));
        let r270 = rotate(Some(&img), Orientation::Deg270).unwrap();
        assert_eq!((r270.width(), r270.height()), (4, 6));
    }

    #[test]
    fn test_rotate_180_reverses_pixels() {
        let img = numbered(3, 2);
        let out = rotate(Some(&img), Orientation::Deg180).unwrap().to_luma8();
        let got: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(got, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_rotate_90_with_flip_corner() {
        let img = numbered(3, 2);
        let out = rotate_bitmap(Some(&img), Orientation::Deg90, true)
            .unwrap()
            .to_luma8();
        assert_eq!(out.dimensions(), (2, 3));
        // Top-left source pixel rotates to the top-right, then the flip moves it to the bottom-right.
        assert_eq!(out.get_pixel(1, 2).0[0], 0);
    }

    #[test]
    fn test_source_untouched() {
        let img = numbered(3, 2);
        let before = img.clone();
        let _ = rotate_bitmap(Some(&img), Orientation::Deg270, true);
        let _ = flip(Some(&img));
        assert_eq!(img, before);
    }

    #[test]
    fn test_flip_mirrors_rows() {
        let img = numbered(2, 3);
        let out = flip(Some(&img)).unwrap().to_luma8();
        let got: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(got, vec![4, 5, 2, 3, 0, 1]);
    }

    #[test]
    fn test_downsample() {
        let img = numbered(9, 5);
        assert!(matches!(downsample(&img, 1), Cow::Borrowed(_)));
        let half = downsample(&img, 2);
        assert_eq!((half.width(), half.height()), (4, 2));
        let tiny = downsample(&img, 16);
        assert_eq!((tiny.width(), tiny.height()), (1, 1));
    }
}
