//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing, enums, and subcommand handlers.

mod args;
mod commands;
mod enums;

pub use args::{Args, Command, ConfigAction, RunArgs, SynthArgs};
pub use commands::{handle_config_action, list_cameras, run_calibration, synthesize};
pub use enums::DecisionArg;
