//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::enums::DecisionArg;
use crate::config::Config;

/// Parse and validate a pattern grid (WIDTHxHEIGHT inner corners)
fn parse_grid(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid grid format '{}'. Expected WIDTHxHEIGHT (e.g., 7x5)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in grid", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in grid", parts[1]))?;
    if width == 0 || height == 0 {
        return Err(format!("Grid dimensions must be positive, got {}x{}", width, height));
    }
    Ok((width, height))
}

/// Parse and validate a cell size in meters
fn parse_cell_size(s: &str) -> Result<f64, String> {
    let size: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if !size.is_finite() || size <= 0.0 {
        return Err(format!("Cell size must be a positive number of meters, got {}", s));
    }
    Ok(size)
}

/// Stereo camera calibration: capture, validate, accumulate, solve
#[derive(Parser, Debug)]
#[command(name = "stereo-calib")]
#[command(version, about = "Stereo camera rig calibration", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture observations from both cameras and calibrate them
    Run(RunArgs),
    /// Write a synthetic recorded session for a virtual rig
    Synth(SynthArgs),
    /// List the cameras available in a recorded session
    ListCameras {
        /// Recorded session file
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options of the `run` subcommand. Each one overrides the config file.
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Recorded session to replay
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Accepted observations required before calibrating
    #[arg(long, short)]
    pub target: Option<usize>,

    /// Pattern inner corners (WIDTHxHEIGHT, e.g., 7x5)
    #[arg(long, value_parser = parse_grid)]
    pub grid: Option<(u32, u32)>,

    /// Pattern cell size in meters
    #[arg(long, value_parser = parse_cell_size)]
    pub cell_size: Option<f64>,

    /// Identifier of the first camera
    #[arg(long)]
    pub camera0: Option<String>,

    /// Identifier of the second camera
    #[arg(long)]
    pub camera1: Option<String>,

    /// How candidate observations are accepted
    #[arg(long)]
    pub decision: Option<DecisionArg>,

    /// Estimate the rig extrinsics after both cameras calibrated
    #[arg(long)]
    pub stereo: bool,
}

impl RunArgs {
    /// Merge settings: CLI args > config file > built-in defaults
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.session {
            config.capture.session = Some(path.clone());
        }
        if let Some(target) = self.target {
            config.capture.target = target;
        }
        if let Some((width, height)) = self.grid {
            config.pattern.width = width;
            config.pattern.height = height;
        }
        if let Some(cell_size) = self.cell_size {
            config.pattern.cell_size = cell_size;
        }
        if let Some(id) = &self.camera0 {
            config.capture.camera0 = id.clone();
        }
        if let Some(id) = &self.camera1 {
            config.capture.camera1 = id.clone();
        }
        if let Some(decision) = self.decision {
            config.capture.decision = decision.into();
        }
        if self.stereo {
            config.solver.stereo = true;
        }
    }
}

/// Options of the `synth` subcommand.
#[derive(clap::Args, Debug)]
pub struct SynthArgs {
    /// Output session file
    #[arg(long, short)]
    pub out: PathBuf,

    /// Board poses seen by both cameras
    #[arg(long, default_value = "12")]
    pub views: usize,

    /// Insert an unusable frame pair after every K good ones (0 = never)
    #[arg(long, default_value = "3")]
    pub skip_every: usize,

    /// Pattern inner corners (defaults to the configured pattern)
    #[arg(long, value_parser = parse_grid)]
    pub grid: Option<(u32, u32)>,

    /// Pattern cell size in meters (defaults to the configured pattern)
    #[arg(long, value_parser = parse_cell_size)]
    pub cell_size: Option<f64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
