use facemark_core::{CapturedFrame, FrameSource, SourceError};
use image::DynamicImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Replays the image files of a directory, in name order, as a preview stream.
///
/// `take_picture` re-decodes the most recently delivered frame at full
/// resolution, or the first frame if none has been pulled yet.
pub struct DirectorySource {
    frames: Vec<PathBuf>,
    position: usize,
    preview_width: Option<u32>,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_frame_file(&path) {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(SourceError::CaptureFailed(format!(
                "no image files in {}",
                dir.display()
            )));
        }
        tracing::info!(dir = %dir.display(), frames = frames.len(), "replay source opened");

        Ok(Self {
            frames,
            position: 0,
            preview_width: None,
        })
    }

    /// Shrink preview frames wider than `width`. Stills stay full size.
    pub fn with_preview_width(mut self, width: u32) -> Self {
        self.preview_width = Some(width).filter(|w| *w > 0);
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn current_still(&self) -> Option<&Path> {
        let index = self.position.saturating_sub(1);
        self.frames.get(index).map(PathBuf::as_path)
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Option<Result<CapturedFrame, SourceError>> {
        let path = self.frames.get(self.position)?;
        let sequence = u32::try_from(self.position).unwrap_or(u32::MAX);
        self.position += 1;

        let frame = image::open(path).map_err(SourceError::from).map(|image| {
            let image = match self.preview_width {
                Some(max) if image.width() > max => {
                    let height = (u64::from(image.height()) * u64::from(max) / u64::from(image.width())).max(1);
                    image.thumbnail(max, u32::try_from(height).unwrap_or(u32::MAX))
                }
                _ => image,
            };
            CapturedFrame { sequence, image }
        });
        if let Err(e) = &frame {
            tracing::warn!(path = %path.display(), error = %e, "failed to decode frame");
        }
        Some(frame)
    }

    fn take_picture(&mut self) -> Result<DynamicImage, SourceError> {
        let path = self.current_still().ok_or(SourceError::NoFrame)?;
        tracing::debug!(path = %path.display(), "capturing still");
        Ok(image::open(path)?)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facemark-replay-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_frames_in_name_order() {
        let dir = scratch_dir("order");
        image::RgbImage::new(4, 2).save(dir.join("b.png")).unwrap();
        image::RgbImage::new(2, 4).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let mut source = DirectorySource::open(&dir).unwrap();
        assert_eq!(source.frame_count(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!((first.image.width(), first.image.height()), (2, 4));

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!((second.image.width(), second.image.height()), (4, 2));

        assert!(source.next_frame().is_none());
        let still = source.take_picture().unwrap();
        assert_eq!((still.width(), still.height()), (4, 2));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_preview_shrinks_but_still_does_not() {
        let dir = scratch_dir("preview");
        image::RgbImage::new(200, 100).save(dir.join("frame.png")).unwrap();

        let mut source = DirectorySource::open(&dir).unwrap().with_preview_width(50);
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!((frame.image.width(), frame.image.height()), (50, 25));
        let still = source.take_picture().unwrap();
        assert_eq!(still.width(), 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_directory() {
        let dir = scratch_dir("empty");
        assert!(matches!(
            DirectorySource::open(&dir),
            Err(SourceError::CaptureFailed(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
