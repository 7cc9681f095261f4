//! Fatal errors and their process exit codes.
//!
//! Inner components return these up the call chain; only the binary's
//! `main` turns them into a process exit.

use crate::config::ConfigError;
use crate::frame::{CameraSlot, SessionError};

/// Conditions that end a calibration run.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Could not open {camera} ('{id}'): {reason}")]
    DeviceUnavailable {
        camera: CameraSlot,
        id: String,
        reason: String,
    },

    #[error("Could not read frame from {camera} ('{id}'): {reason}")]
    ReadFailure {
        camera: CameraSlot,
        id: String,
        reason: String,
    },

    #[error("Read empty frame from {camera} ('{id}') while validating the device")]
    EmptyFrameAtStartup { camera: CameraSlot, id: String },

    #[error("Captured empty frame from {camera} at frame pair {frame}")]
    EmptyFrameDuringCapture { camera: CameraSlot, frame: u64 },

    #[error("Interrupted by operator after {accepted} of {target} observations")]
    Interrupted { accepted: usize, target: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl FatalError {
    /// Distinct non-zero exit status per failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Config(_) => 2,
            FatalError::DeviceUnavailable { .. } => 3,
            FatalError::ReadFailure { .. } | FatalError::EmptyFrameAtStartup { .. } => 4,
            FatalError::EmptyFrameDuringCapture { .. } => 5,
            FatalError::Session(_) => 6,
            FatalError::Interrupted { .. } => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_and_non_zero() {
        let errors = [
            FatalError::DeviceUnavailable {
                camera: CameraSlot::Camera0,
                id: "0".into(),
                reason: "gone".into(),
            },
            FatalError::ReadFailure {
                camera: CameraSlot::Camera0,
                id: "0".into(),
                reason: "eof".into(),
            },
            FatalError::EmptyFrameDuringCapture {
                camera: CameraSlot::Camera1,
                frame: 4,
            },
            FatalError::Interrupted {
                accepted: 1,
                target: 3,
            },
        ];
        let codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        let mut unique = codes.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_fatal_error_names_the_device() {
        let err = FatalError::DeviceUnavailable {
            camera: CameraSlot::Camera1,
            id: "usb-2".into(),
            reason: "no such device".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("camera1"));
        assert!(msg.contains("usb-2"));

        let err = FatalError::EmptyFrameDuringCapture {
            camera: CameraSlot::Camera0,
            frame: 12,
        };
        assert_eq!(
            err.to_string(),
            "Captured empty frame from camera0 at frame pair 12"
        );
    }
}
