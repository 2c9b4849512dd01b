//! Live capture source contract.

use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("no frame available to capture")]
    NoFrame,
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// One frame of the preview stream.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub sequence: u32,
    pub image: DynamicImage,
}

/// A stream of preview frames plus point-in-time still capture.
///
/// `next_frame` returns `None` once the stream ends. Consumers cancel by
/// simply not pulling any more frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<CapturedFrame, SourceError>>;

    /// Capture a full-resolution still.
    fn take_picture(&mut self) -> Result<DynamicImage, SourceError>;
}
