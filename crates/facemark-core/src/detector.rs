//! Face detector contract, and an SCRFD backend on ONNX Runtime.
//!
//! The backend is only operational once its model file is present. Until then
//! it reports zero detections rather than failing, and [`FaceDetector::refresh`]
//! picks the model up once it has been downloaded.

use crate::types::{Face, Landmark, LandmarkKind};
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns an image into face detections.
///
/// A detector that is not operational (e.g. its native assets are still
/// downloading) returns `Ok` with no faces.
pub trait FaceDetector {
    fn is_operational(&self) -> bool;

    /// Re-check whether the detector's assets have become available.
    fn refresh(&mut self) -> Result<bool, DetectorError> {
        Ok(self.is_operational())
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Face>, DetectorError>;
}

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// Report five-point landmarks.
    pub landmarks: bool,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Faces narrower than this, in source pixels, are dropped.
    pub min_face_size: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            landmarks: true,
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            min_face_size: 0.0,
        }
    }
}

/// Scale and padding applied when fitting the source into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (size - new_w) / 2.0,
            pad_y: (size - new_h) / 2.0,
        }
    }

    /// Input-tensor coordinates back to source pixels.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

pub struct ScrfdDetector {
    model_path: PathBuf,
    options: DetectorOptions,
    session: Option<Session>,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Create a detector for the model at `model_path`.
    ///
    /// A missing model is not an error: the detector starts non-operational.
    /// A model that exists but fails to load is.
    pub fn new(model_path: impl Into<PathBuf>, options: DetectorOptions) -> Result<Self, DetectorError> {
        let mut detector = Self {
            model_path: model_path.into(),
            options,
            session: None,
            outputs: positional_outputs(),
        };
        if !detector.load_if_present()? {
            tracing::warn!(
                path = %detector.model_path.display(),
                "face detector model not available yet; detections will be empty"
            );
        }
        Ok(detector)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    /// Load the model if it has appeared since the last check. Returns whether
    /// the detector is operational.
    fn load_if_present(&mut self) -> Result<bool, DetectorError> {
        if self.session.is_some() {
            return Ok(true);
        }
        if !self.model_path.exists() {
            return Ok(false);
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&self.model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %self.model_path.display(),
            outputs = ?names,
            "loaded SCRFD model"
        );

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }

        self.outputs = named_outputs(&names).unwrap_or_else(|| {
            tracing::debug!(?names, "unrecognized SCRFD output names, using positional layout");
            positional_outputs()
        });
        self.session = Some(session);
        Ok(true)
    }

    fn preprocess(&self, image: &DynamicImage) -> (Array4<f32>, Letterbox) {
        let rgb = image.to_rgb8();
        let letterbox = Letterbox::fit(rgb.width(), rgb.height());
        let new_w = ((rgb.width() as f32 * letterbox.scale).round() as u32).max(1);
        let new_h = ((rgb.height() as f32 * letterbox.scale).round() as u32).max(1);
        let resized = image::imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding normalizes to zero.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        let x0 = letterbox.pad_x.floor() as usize;
        let y0 = letterbox.pad_y.floor() as usize;

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x0 + x as usize, y0 + y as usize);
            if tx >= size || ty >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (f32::from(pixel.0[c]) - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn is_operational(&self) -> bool {
        self.session.is_some()
    }

    fn refresh(&mut self) -> Result<bool, DetectorError> {
        self.load_if_present()
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Face>, DetectorError> {
        if self.session.is_none() {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);
        let options = self.options.clone();
        let layout = self.outputs;
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let idx = layout[slot];
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(idx.score, "scores")?;
            let boxes = extract(idx.bbox, "boxes")?;
            let kps = extract(idx.kps, "keypoints")?;

            candidates.extend(decode_stride(
                scores,
                boxes,
                kps,
                stride,
                &letterbox,
                options.confidence_threshold,
            ));
        }

        let mut faces = suppress(candidates, options.nms_threshold);
        faces.retain(|f| f.width >= options.min_face_size);
        for face in &mut faces {
            face.euler_z = roll_degrees(face);
            if !options.landmarks {
                face.landmarks.clear();
            }
        }

        tracing::trace!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

fn positional_outputs() -> [StrideOutputs; 3] {
    std::array::from_fn(|i| StrideOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Map `score_8`, `bbox_16`, `kps_32`-style output names to stride slots.
fn named_outputs(names: &[String]) -> Option<[StrideOutputs; 3]> {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut slots = [StrideOutputs { score: 0, bbox: 0, kps: 0 }; 3];
    for (slot, &stride) in slots.iter_mut().zip(SCRFD_STRIDES.iter()) {
        *slot = StrideOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        };
    }
    Some(slots)
}

/// Decode anchor-free distance predictions for one stride into faces in source space.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Face> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let grid_h = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut faces = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * step;
        let ay = (cell / grid_w) as f32 * step;

        let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
        let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

        let mut face = Face::new(x1, y1, x2 - x1, y2 - y1, score);
        let kp_len = SCRFD_KEYPOINTS * 2;
        if let Some(points) = kps.get(idx * kp_len..(idx + 1) * kp_len) {
            face.landmarks = LandmarkKind::FIVE_POINT
                .iter()
                .zip(points.chunks_exact(2))
                .map(|(&kind, p)| {
                    let (x, y) = letterbox.unmap(ax + p[0] * step, ay + p[1] * step);
                    Landmark { kind, x, y }
                })
                .collect();
        }
        faces.push(face);
    }
    faces
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
fn suppress(mut faces: Vec<Face>, iou_threshold: f32) -> Vec<Face> {
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Face> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| k.iou(&face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

/// Head roll from the eye line, in degrees. Zero without both eyes.
pub fn roll_degrees(face: &Face) -> f32 {
    match (
        face.landmark(LandmarkKind::LeftEye),
        face.landmark(LandmarkKind::RightEye),
    ) {
        (Some(l), Some(r)) => (r.y - l.y).atan2(r.x - l.x).to_degrees(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_not_operational() {
        let mut det = ScrfdDetector::new(
            "/nonexistent/facemark/det_10g.onnx",
            DetectorOptions::default(),
        )
        .unwrap();
        assert!(!det.is_operational());
        assert!(!det.refresh().unwrap());

        let img = DynamicImage::ImageRgb8(image::RgbImage::new(32, 32));
        assert!(det.detect(&img).unwrap().is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!(lb.scale, 2.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.unmap(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_suppress_overlapping() {
        let faces = vec![
            Face::new(0.0, 0.0, 100.0, 100.0, 0.8),
            Face::new(5.0, 5.0, 100.0, 100.0, 0.9),
            Face::new(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = suppress(faces, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_suppress_empty() {
        assert!(suppress(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_named_outputs_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = named_outputs(&names).unwrap();
        assert_eq!(slots[0], StrideOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(slots[2], StrideOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_numeric_output_names_fall_back() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert!(named_outputs(&names).is_none());
        assert_eq!(positional_outputs()[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_single_anchor() {
        let stride = 32;
        let anchors = (640 / stride) * (640 / stride) * 2;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        // Cell (1, 1) first anchor → centre (32, 32); distances of one stride each side.
        let cell = 640 / stride + 1;
        let idx = cell * 2;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let faces = decode_stride(&scores, &boxes, &kps, stride, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(f.landmarks.len(), 5);
    }

    #[test]
    fn test_roll_from_eyes() {
        let mut face = Face::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert_eq!(roll_degrees(&face), 0.0);
        face.landmarks = vec![
            Landmark { kind: LandmarkKind::LeftEye, x: 0.0, y: 0.0 },
            Landmark { kind: LandmarkKind::RightEye, x: 10.0, y: 10.0 },
        ];
        assert!((roll_degrees(&face) - 45.0).abs() < 1e-4);
    }
}
