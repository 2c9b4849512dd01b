use facemark_core::Facing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional decoration bitmaps drawn around tracked faces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorationPaths {
    pub hand: Option<PathBuf>,
    pub feed: Option<PathBuf>,
    pub left_shoulder: Option<PathBuf>,
    pub right_shoulder: Option<PathBuf>,
}

/// CLI configuration: defaults, then the TOML file, then `FACEMARK_*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Target width for decode-time downsampling. 0 or less keeps full size.
    pub requested_width: i32,
    /// Where annotated frames and snapshots are written.
    pub output_dir: PathBuf,
    pub jpeg_quality: u8,
    pub facing: Facing,
    /// Frames a track may go undetected before it is dropped.
    pub max_missing_frames: u32,
    pub confidence_threshold: f32,
    pub decorations: DecorationPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facemark_core::default_model_dir(),
            requested_width: 1024,
            output_dir: PathBuf::from("facemark-out"),
            jpeg_quality: 90,
            facing: Facing::Back,
            max_missing_frames: facemark_core::tracker::DEFAULT_MAX_MISSING_FRAMES,
            confidence_threshold: 0.5,
            decorations: DecorationPaths::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` (or `$FACEMARK_CONFIG`) if it exists, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FACEMARK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut config = if path.exists() {
            let config = Self::from_file(&path)?;
            tracing::debug!(path = %path.display(), "loaded config file");
            config
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEMARK_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEMARK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("FACEMARK_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        env_parse(&lookup, "FACEMARK_REQUESTED_WIDTH", &mut self.requested_width);
        env_parse(&lookup, "FACEMARK_JPEG_QUALITY", &mut self.jpeg_quality);
        env_parse(&lookup, "FACEMARK_FACING", &mut self.facing);
        env_parse(&lookup, "FACEMARK_MAX_MISSING_FRAMES", &mut self.max_missing_frames);
        env_parse(&lookup, "FACEMARK_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facemark_core::DETECTOR_MODEL_FILE)
    }
}

/// `$XDG_CONFIG_HOME/facemark/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facemark")
        .join("config.toml")
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}
