//! Load a photo upright at a bounded size.

use crate::bitmap::{self, BitmapError};
use crate::types::Orientation;
use image::{DynamicImage, ImageReader};
use serde::Serialize;
use std::io::{BufRead, Cursor, Seek, SeekFrom};
use std::path::Path;

/// A decoded, downsampled, upright photo and how it got that way.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedPhoto {
    /// Dimensions before downsampling and rotation.
    pub original_size: (u32, u32),
    pub sample_size: u32,
    pub orientation: Orientation,
    #[serde(skip)]
    pub image: DynamicImage,
}

impl LoadedPhoto {
    pub fn size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

pub fn load_photo(path: &Path, requested_width: i32) -> Result<LoadedPhoto, BitmapError> {
    let photo = load_photo_from_reader(bitmap::open(path)?, requested_width)?;
    tracing::debug!(
        path = %path.display(),
        original = ?photo.original_size,
        sample_size = photo.sample_size,
        orientation = photo.orientation.degrees(),
        "loaded photo"
    );
    Ok(photo)
}

pub fn load_photo_from_memory(bytes: &[u8], requested_width: i32) -> Result<LoadedPhoto, BitmapError> {
    load_photo_from_reader(Cursor::new(bytes), requested_width)
}

/// Bounds probe, sample factor, decode, downsample, orientation, rotate.
pub fn load_photo_from_reader<R: BufRead + Seek>(
    mut reader: R,
    requested_width: i32,
) -> Result<LoadedPhoto, BitmapError> {
    let (width, height) = bitmap::image_size(&mut reader)?;
    let factor = bitmap::sample_size(i32::try_from(width).unwrap_or(i32::MAX), requested_width);

    reader.seek(SeekFrom::Start(0))?;
    let decoded = ImageReader::new(&mut reader).with_guessed_format()?.decode()?;
    let sampled = bitmap::downsample(&decoded, factor);

    reader.seek(SeekFrom::Start(0))?;
    let orientation = bitmap::photo_orientation(&mut reader)?;

    let upright = bitmap::rotate(Some(&*sampled), orientation)
        .map(|img| img.into_owned())
        .unwrap_or_else(|| sampled.into_owned());

    Ok(LoadedPhoto {
        original_size: (width, height),
        sample_size: factor,
        orientation,
        image: upright,
    })
}
