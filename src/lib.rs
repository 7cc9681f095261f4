//! stereo-calib library crate.
//!
//! This module exposes the internal components for integration testing.

pub mod accumulator;
pub mod calibration;
pub mod capture_loop;
pub mod cli;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod pattern;
pub mod synthetic;
