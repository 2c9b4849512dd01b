use facemark_core::bitmap::BitmapError;
use facemark_core::detector::DetectorError;
use facemark_core::{Face, FaceDetector, LoadedPhoto};
use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("photo error: {0}")]
    Bitmap(#[from] BitmapError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("worker thread exited")]
    ChannelClosed,
}

/// A photo loaded upright together with the faces found in it.
pub struct PhotoDetection {
    pub photo: LoadedPhoto,
    pub faces: Vec<Face>,
}

/// Messages sent from the async side to the worker thread.
enum WorkerRequest {
    DetectPhoto {
        path: PathBuf,
        requested_width: i32,
        reply: oneshot::Sender<Result<PhotoDetection, WorkerError>>,
    },
    DetectFrame {
        image: DynamicImage,
        reply: oneshot::Sender<Result<Vec<Face>, WorkerError>>,
    },
    Status {
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the worker thread. The thread exits once every
/// handle has been dropped.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    /// Decode, downsample and orient the photo, then run detection on it.
    pub async fn detect_photo(
        &self,
        path: PathBuf,
        requested_width: i32,
    ) -> Result<PhotoDetection, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::DetectPhoto {
                path,
                requested_width,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Run detection on one preview frame.
    pub async fn detect_frame(&self, image: DynamicImage) -> Result<Vec<Face>, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::DetectFrame {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Whether the detector is currently operational.
    pub async fn status(&self) -> Result<bool, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Spawn the worker on a dedicated OS thread that owns `detector`.
pub fn spawn_worker<D>(detector: D) -> Result<WorkerHandle, WorkerError>
where
    D: FaceDetector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(4);

    std::thread::Builder::new()
        .name("facemark-worker".into())
        .spawn(move || {
            tracing::info!("worker thread started");
            let mut worker = Worker::new(detector);
            while let Some(req) = rx.blocking_recv() {
                match req {
                    WorkerRequest::DetectPhoto {
                        path,
                        requested_width,
                        reply,
                    } => {
                        let result = worker.detect_photo(path, requested_width);
                        let _ = reply.send(result);
                    }
                    WorkerRequest::DetectFrame { image, reply } => {
                        let result = worker.detect(&image).map_err(WorkerError::from);
                        let _ = reply.send(result);
                    }
                    WorkerRequest::Status { reply } => {
                        let _ = reply.send(worker.refresh());
                    }
                }
            }
            tracing::info!("worker thread exiting");
        })
        .map_err(WorkerError::Spawn)?;

    Ok(WorkerHandle { tx })
}

/// Detector plus the last operability state that was logged.
struct Worker<D> {
    detector: D,
    operational: bool,
}

impl<D: FaceDetector> Worker<D> {
    fn new(detector: D) -> Self {
        let operational = detector.is_operational();
        Self {
            detector,
            operational,
        }
    }

    /// Re-check the detector, logging only when its state changes.
    fn refresh(&mut self) -> bool {
        let now = match self.detector.refresh() {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "detector refresh failed");
                false
            }
        };
        if now != self.operational {
            if now {
                tracing::info!("face detector is now operational");
            } else {
                tracing::warn!("face detector is not operational; detections will be empty");
            }
            self.operational = now;
        }
        now
    }

    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Face>, DetectorError> {
        if !self.refresh() {
            return Ok(Vec::new());
        }
        let faces = self.detector.detect(image)?;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "frame processed"
        );
        Ok(faces)
    }

    fn detect_photo(&mut self, path: PathBuf, requested_width: i32) -> Result<PhotoDetection, WorkerError> {
        let photo = facemark_core::load_photo(&path, requested_width)?;
        let faces = self.detect(&photo.image)?;
        tracing::info!(path = %path.display(), faces = faces.len(), "photo processed");
        Ok(PhotoDetection { photo, faces })
    }
}
