//! Frame acquisition for the two cameras of the rig.
//!
//! This module provides the frame side of the capture loop:
//! - Device access via [`FrameSource`] and [`Capture`]
//! - Startup validation via [`open_validated`]
//! - A recorded-session backend via [`SessionSource`]

mod session;
mod source;
mod types;

pub use session::{
    RecordedCamera, RecordedCapture, RecordedDetector, RecordedFrame, RecordedPresence, Session,
    SessionError, SessionSource,
};
pub use source::{open_validated, Capture, FrameSource, SourceError, ValidatedCapture};
pub use types::{CameraSlot, FrameImage, FramePair, ImageSize};
