//! Frame source contract and startup validation.

use super::types::{CameraSlot, FrameImage, ImageSize};
use crate::error::FatalError;

/// Errors reported by a frame source backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("read failed: {0}")]
    ReadFailure(String),
}

/// An opened camera stream.
pub trait Capture {
    type Image: FrameImage;

    /// Read the next frame.
    fn read(&mut self) -> Result<Self::Image, SourceError>;
}

/// A provider of camera streams addressed by identifier.
pub trait FrameSource {
    type Capture: Capture;

    /// Open the camera known as `camera_id`.
    fn open(&self, camera_id: &str) -> Result<Self::Capture, SourceError>;
}

/// A capture that passed the startup read check.
#[derive(Debug)]
pub struct ValidatedCapture<C> {
    pub slot: CameraSlot,
    pub id: String,
    /// Size of the startup frame, used by the solvers.
    pub image_size: ImageSize,
    capture: C,
}

impl<C: Capture> ValidatedCapture<C> {
    /// The underlying stream.
    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// Read a frame, turning backend errors into fatal capture errors.
    pub fn read_frame(&mut self) -> Result<C::Image, FatalError> {
        self.capture.read().map_err(|e| match e {
            SourceError::DeviceUnavailable(reason) => FatalError::DeviceUnavailable {
                camera: self.slot,
                id: self.id.clone(),
                reason,
            },
            SourceError::ReadFailure(reason) => FatalError::ReadFailure {
                camera: self.slot,
                id: self.id.clone(),
                reason,
            },
        })
    }
}

/// Open a camera and check that a read produces a non-empty image.
///
/// Any failure here is fatal: the capture loop never starts with a camera
/// that cannot deliver frames.
pub fn open_validated<S: FrameSource>(
    source: &S,
    slot: CameraSlot,
    camera_id: &str,
) -> Result<ValidatedCapture<S::Capture>, FatalError> {
    let mut capture = source
        .open(camera_id)
        .map_err(|e| FatalError::DeviceUnavailable {
            camera: slot,
            id: camera_id.to_string(),
            reason: e.to_string(),
        })?;

    let first = capture.read().map_err(|e| FatalError::ReadFailure {
        camera: slot,
        id: camera_id.to_string(),
        reason: e.to_string(),
    })?;

    if first.is_empty() {
        return Err(FatalError::EmptyFrameAtStartup {
            camera: slot,
            id: camera_id.to_string(),
        });
    }

    let image_size = first.size();
    log::info!("Opened {} ('{}'), frame size {}", slot, camera_id, image_size);

    Ok(ValidatedCapture {
        slot,
        id: camera_id.to_string(),
        image_size,
        capture,
    })
}
