use crate::matcher::{DistanceMetric, DEFAULT_THRESHOLD};
use crate::preprocess::Preprocess;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("threshold must be a finite, non-negative number (got {0})")]
    InvalidThreshold(f32),
    #[error("blur sigma must be a finite, non-negative number (got {0})")]
    InvalidBlur(f32),
}

/// Runtime configuration.
///
/// Layered as built-in defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path; a bare index `N` means `/dev/videoN`.
    pub camera_device: String,
    /// Maximum nearest-neighbor distance accepted as a match.
    pub threshold: f32,
    pub metric: DistanceMetric,
    /// Directory of enrollment images, one identity per file.
    pub enrollment_dir: PathBuf,
    /// Attendance ledger database.
    pub ledger_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Frames discarded after the camera opens (AGC/AE stabilization).
    pub warmup_frames: usize,
    pub equalize: bool,
    pub blur_sigma: f32,
}

impl Default for Config {
    fn default() -> Self {
        let preprocess = Preprocess::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            threshold: DEFAULT_THRESHOLD,
            metric: DistanceMetric::default(),
            enrollment_dir: PathBuf::from("Training_images"),
            ledger_path: data_dir().join("attendance.db"),
            model_dir: crate::default_model_dir(),
            warmup_frames: 4,
            equalize: preprocess.equalize,
            blur_sigma: preprocess.blur_sigma,
        }
    }
}

impl Config {
    /// Load defaults, then the config file (if any), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `ROLLCALL_*` variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_ENROLLMENT_DIR") {
            self.enrollment_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        parse_env(&lookup, "ROLLCALL_THRESHOLD", &mut self.threshold)?;
        parse_env(&lookup, "ROLLCALL_METRIC", &mut self.metric)?;
        parse_env(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames)?;
        parse_env(&lookup, "ROLLCALL_BLUR_SIGMA", &mut self.blur_sigma)?;
        if let Some(v) = lookup("ROLLCALL_EQUALIZE") {
            self.equalize = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(ConfigError::InvalidBlur(self.blur_sigma));
        }
        Ok(())
    }

    /// Camera device path with bare indices expanded.
    pub fn camera_path(&self) -> String {
        let device = self.camera_device.trim();
        if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
            format!("/dev/video{device}")
        } else {
            device.to_string()
        }
    }

    pub fn preprocess(&self) -> Preprocess {
        Preprocess {
            equalize: self.equalize,
            blur_sigma: self.blur_sigma,
        }
    }
}

fn parse_env<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// `$XDG_DATA_HOME/rollcall`, defaulting to `~/.local/share/rollcall`.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

/// `$XDG_CONFIG_HOME/rollcall`, defaulting to `~/.config/rollcall`.
pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall")
}
