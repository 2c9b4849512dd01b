//! facemark-core: face overlay geometry.
//!
//! Image geometry (decode-time downsampling, orientation, rotation), the
//! detector-to-view coordinate mapping, per-face tracking, and overlay
//! rendering. Face detection itself sits behind the [`FaceDetector`] trait,
//! with an SCRFD backend on ONNX Runtime.

pub mod bitmap;
pub mod detector;
pub mod graphic;
pub mod matrix;
pub mod overlay;
pub mod palette;
pub mod photo;
pub mod source;
pub mod tracker;
pub mod types;

pub use detector::{DetectorError, DetectorOptions, FaceDetector, ScrfdDetector};
pub use graphic::{Decorations, FaceGraphic, GraphicStyle};
pub use overlay::{CoordinateTransform, GraphicOverlay};
pub use palette::Palette;
pub use photo::{load_photo, LoadedPhoto};
pub use source::{CapturedFrame, FrameSource, SourceError};
pub use tracker::{GraphicTrackerFactory, TrackObserver, TrackState, TrackerFactory, TrackingSession};
pub use types::{Face, Facing, Landmark, LandmarkKind, Orientation};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// `$XDG_DATA_HOME/facemark/models`, falling back to `~/.local/share/facemark/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facemark")
        .join("models")
}
