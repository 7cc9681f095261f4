//! Configuration file handling for stereo-calib.
//!
//! Loads configuration from `<config dir>/stereo-calib/config.toml` or a custom path.

use crate::calibration::SolverFlags;
use crate::control::DecisionMode;
use crate::pattern::{PatternError, PatternSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file structure for stereo-calib.
/// Loaded from the user config dir (or custom path via --config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pattern: PatternConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub solver: SolverConfig,
}

/// Calibration target: inner corners and cell size in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub width: u32,
    pub height: u32,
    pub cell_size: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            width: 7,
            height: 5,
            cell_size: 0.035,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Accepted observations required before calibrating.
    pub target: usize,
    pub camera0: String,
    pub camera1: String,
    pub decision: DecisionMode,
    /// How long the keyboard decider waits before accepting a candidate.
    pub review_window_ms: u64,
    /// Recorded session to replay.
    pub session: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target: 10,
            camera0: "0".to_string(),
            camera1: "1".to_string(),
            decision: DecisionMode::Auto,
            review_window_ms: 500,
            session: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// RMS reprojection error (pixels) above which a result is flagged.
    pub max_reprojection_error: f64,
    /// Run the stereo step after both cameras calibrated.
    pub stereo: bool,
    pub fix_principal_point: bool,
    pub fix_tangential_distortion: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_reprojection_error: 1.0,
            stereo: false,
            fix_principal_point: true,
            fix_tangential_distortion: true,
        }
    }
}

/// Validated settings the capture loop and solvers run with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub pattern: PatternSpec,
    pub target: usize,
    pub cameras: [String; 2],
    pub decision: DecisionMode,
    pub review_window: Duration,
    pub session: Option<PathBuf>,
    pub flags: SolverFlags,
    pub max_reprojection_error: f64,
    pub stereo: bool,
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            log::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Encode)
    }

    /// Check every value the accumulator and solvers depend on.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let pattern = PatternSpec::new(
            self.pattern.width,
            self.pattern.height,
            self.pattern.cell_size,
        )?;

        if self.capture.target == 0 {
            return Err(ConfigError::Invalid(
                "capture.target must be at least 1".to_string(),
            ));
        }
        if self.capture.camera0.is_empty() || self.capture.camera1.is_empty() {
            return Err(ConfigError::Invalid(
                "capture.camera0 and capture.camera1 must both be set".to_string(),
            ));
        }
        if self.capture.camera0 == self.capture.camera1 {
            return Err(ConfigError::Invalid(format!(
                "capture.camera0 and capture.camera1 must differ, both are '{}'",
                self.capture.camera0
            )));
        }
        if !self.solver.max_reprojection_error.is_finite()
            || self.solver.max_reprojection_error <= 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "solver.max_reprojection_error must be positive, got {}",
                self.solver.max_reprojection_error
            )));
        }

        Ok(Settings {
            pattern,
            target: self.capture.target,
            cameras: [self.capture.camera0.clone(), self.capture.camera1.clone()],
            decision: self.capture.decision,
            review_window: Duration::from_millis(self.capture.review_window_ms),
            session: self.capture.session.clone(),
            flags: SolverFlags {
                fix_tangential_distortion: self.solver.fix_tangential_distortion,
                fix_principal_point: self.solver.fix_principal_point,
            },
            max_reprojection_error: self.solver.max_reprojection_error,
            stereo: self.solver.stereo,
        })
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to encode config: {0}")]
    Encode(#[source] toml::ser::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("stereo-calib").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/stereo-calib/config.toml")
        })
}
