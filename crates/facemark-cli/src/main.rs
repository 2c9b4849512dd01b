mod config;
mod replay;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, DecorationPaths};
use facemark_core::bitmap;
use facemark_core::{
    Decorations, DetectorOptions, FaceGraphic, Facing, FrameSource, GraphicOverlay,
    GraphicStyle, GraphicTrackerFactory, Orientation, Palette, ScrfdDetector, TrackingSession,
};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use replay::DirectorySource;
use std::borrow::Cow;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use worker::{spawn_worker, WorkerHandle};

#[derive(Parser)]
#[command(name = "facemark", about = "Find faces in photos and draw overlays on them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a photo's size, decode sample factor and orientation
    Inspect {
        photo: PathBuf,
        /// Target width for downsampling (default from config)
        #[arg(short, long)]
        width: Option<i32>,
    },
    /// Detect faces in a photo and write an annotated copy
    Detect {
        photo: PathBuf,
        #[arg(short, long)]
        width: Option<i32>,
        /// Output image; .jpg/.jpeg is written as JPEG, anything else by extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a directory of frames through detection and tracking
    Track {
        dir: PathBuf,
        /// Overlay view size, e.g. 720x1280 (default: frame size)
        #[arg(long, value_parser = parse_view)]
        view: Option<(u32, u32)>,
        /// Camera facing: front mirrors the preview
        #[arg(long)]
        facing: Option<Facing>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also save a full-resolution snapshot of the last frame with its overlay
        #[arg(long)]
        snapshot: bool,
    },
    /// Show configuration and detector status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Inspect { photo, width } => {
            inspect(&photo, width.unwrap_or(config.requested_width))?;
        }
        Commands::Detect {
            photo,
            width,
            output,
        } => {
            let output = output.unwrap_or_else(|| default_output(&config, &photo));
            detect(&config, photo, width.unwrap_or(config.requested_width), &output).await?;
        }
        Commands::Track {
            dir,
            view,
            facing,
            output,
            snapshot,
        } => {
            let options = TrackOptions {
                view,
                facing: facing.unwrap_or(config.facing),
                output: output.unwrap_or_else(|| config.output_dir.clone()),
                snapshot,
            };
            track(&config, &dir, options).await?;
        }
        Commands::Status => {
            let handle = start_worker(&config)?;
            let operational = handle.status().await?;
            let report = serde_json::json!({
                "config": &config,
                "model_path": config.scrfd_model_path(),
                "detector_operational": operational,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn inspect(photo: &Path, requested_width: i32) -> Result<()> {
    let (width, height) = bitmap::image_size(bitmap::open(photo)?)
        .with_context(|| format!("failed to read {}", photo.display()))?;
    let orientation = bitmap::photo_orientation_path(photo)?;
    let sample_size = bitmap::sample_size(i32::try_from(width).unwrap_or(i32::MAX), requested_width);

    let report = serde_json::json!({
        "path": photo,
        "width": width,
        "height": height,
        "requested_width": requested_width,
        "sample_size": sample_size,
        "orientation": orientation,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn detect(config: &Config, photo: PathBuf, requested_width: i32, output: &Path) -> Result<()> {
    let decorations = load_decorations(&config.decorations)?;
    let handle = start_worker(config)?;
    let detection = handle
        .detect_photo(photo.clone(), requested_width)
        .await
        .with_context(|| format!("detection failed for {}", photo.display()))?;

    let (width, height) = detection.photo.size();
    let mut overlay = GraphicOverlay::new(width, height);
    overlay.set_frame_info(width, height, Facing::Back);

    let mut palette = Palette::new();
    let mut faces = detection.faces;
    for (index, face) in faces.iter_mut().enumerate() {
        let id = u32::try_from(index).unwrap_or(u32::MAX);
        face.id = Some(id);
        let mut graphic = FaceGraphic::new(id, &mut palette);
        graphic.set_decorations(decorations.clone());
        graphic.set_rotation(face.euler_z);
        graphic.update_face(face.clone());
        overlay.add(graphic);
    }

    let annotated = overlay.composite(&detection.photo.image);
    save_image(&annotated, output, config.jpeg_quality)?;
    tracing::info!(output = %output.display(), faces = faces.len(), "annotated photo written");

    let report = serde_json::json!({
        "path": photo,
        "output": output,
        "photo": &detection.photo,
        "faces": faces,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct TrackOptions {
    view: Option<(u32, u32)>,
    facing: Facing,
    output: PathBuf,
    snapshot: bool,
}

async fn track(config: &Config, dir: &Path, options: TrackOptions) -> Result<()> {
    let mut source = DirectorySource::open(dir)?
        .with_preview_width(u32::try_from(config.requested_width).unwrap_or(0));
    let decorations = load_decorations(&config.decorations)?;
    let handle = start_worker(config)?;
    std::fs::create_dir_all(&options.output)
        .with_context(|| format!("failed to create {}", options.output.display()))?;

    let factory = GraphicTrackerFactory::new(GraphicStyle::default(), decorations);
    let mut session = TrackingSession::new(factory).with_max_missing_frames(config.max_missing_frames);
    let mut overlay: Option<GraphicOverlay> = None;
    let mut written = 0usize;

    tracing::info!(
        frames = source.frame_count(),
        facing = ?options.facing,
        "replay started"
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while let Some(frame) = source.next_frame() {
        let Ok(frame) = frame else {
            continue;
        };

        let faces = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, stopping replay");
                break;
            }
            faces = handle.detect_frame(frame.image.clone()) => faces?,
        };

        let (frame_w, frame_h) = (frame.image.width(), frame.image.height());
        let (view_w, view_h) = options.view.unwrap_or((frame_w, frame_h));
        let overlay = overlay.get_or_insert_with(|| GraphicOverlay::new(view_w, view_h));
        overlay.set_frame_info(frame_w, frame_h, options.facing);

        let tracked = session.process(overlay, &faces);
        tracing::debug!(
            sequence = frame.sequence,
            ids = ?tracked.iter().filter_map(|f| f.id).collect::<Vec<_>>(),
            "frame tracked"
        );

        let mut canvas = preview_canvas(&frame.image, overlay.view_size(), options.facing);
        overlay.draw(&mut canvas);
        let path = options.output.join(format!("frame_{:05}.png", frame.sequence));
        canvas
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written += 1;
    }

    if let Some(overlay) = overlay.as_mut() {
        if options.snapshot {
            let still = source.take_picture()?;
            let path = options.output.join("snapshot.jpg");
            save_snapshot(overlay, &still, options.facing, &path, config.jpeg_quality)?;
            tracing::info!(path = %path.display(), "snapshot written");
        }
        session.finish(overlay);
    }

    tracing::info!(frames = written, output = %options.output.display(), "replay finished");
    Ok(())
}

/// Front stills come off the sensor sideways and unmirrored; turn and flip them
/// to match the preview before compositing.
fn save_snapshot(
    overlay: &GraphicOverlay,
    still: &DynamicImage,
    facing: Facing,
    path: &Path,
    quality: u8,
) -> Result<()> {
    let oriented = if facing.is_mirrored() {
        bitmap::rotate_bitmap(Some(still), Orientation::Deg90, true)
    } else {
        Some(Cow::Borrowed(still))
    };
    let oriented = oriented.context("no still to composite")?;
    let composite = overlay.composite(&oriented);
    save_image(&composite, path, quality)
}

/// The frame scaled to the view, mirrored for a front-facing source.
fn preview_canvas(frame: &DynamicImage, (view_w, view_h): (u32, u32), facing: Facing) -> RgbaImage {
    let mut canvas = if (frame.width(), frame.height()) == (view_w, view_h) {
        frame.to_rgba8()
    } else {
        frame.resize_exact(view_w, view_h, FilterType::Triangle).to_rgba8()
    };
    if facing.is_mirrored() {
        image::imageops::flip_horizontal_in_place(&mut canvas);
    }
    canvas
}

fn start_worker(config: &Config) -> Result<WorkerHandle> {
    let options = DetectorOptions {
        confidence_threshold: config.confidence_threshold,
        ..DetectorOptions::default()
    };
    let detector = ScrfdDetector::new(config.scrfd_model_path(), options)
        .context("failed to load face detector")?;
    Ok(spawn_worker(detector)?)
}

fn load_decorations(paths: &DecorationPaths) -> Result<Decorations> {
    let load = |path: &Option<PathBuf>| -> Result<Option<Arc<RgbaImage>>> {
        path.as_ref()
            .map(|p| {
                image::open(p)
                    .map(|img| Arc::new(img.to_rgba8()))
                    .with_context(|| format!("failed to load decoration {}", p.display()))
            })
            .transpose()
    };
    Ok(Decorations {
        hand: load(&paths.hand)?,
        feed: load(&paths.feed)?,
        left_shoulder: load(&paths.left_shoulder)?,
        right_shoulder: load(&paths.right_shoulder)?,
    })
}

fn save_image(image: &RgbaImage, path: &Path, quality: u8) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false);

    if is_jpeg {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        JpegEncoder::new_with_quality(BufWriter::new(file), quality).encode_image(&rgb)?;
    } else {
        image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

fn default_output(config: &Config, photo: &Path) -> PathBuf {
    let stem = photo
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    config.output_dir.join(format!("{stem}-faces.jpg"))
}

fn parse_view(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    if w == 0 || h == 0 {
        return Err(format!("view size must be non-zero, got '{s}'"));
    }
    Ok((w, h))
}
