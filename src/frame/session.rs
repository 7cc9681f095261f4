//! Recorded-session backend.
//!
//! A session file is a JSON document listing, per camera, the frames of a
//! capture run together with what a detector saw in each of them. It lets
//! the capture loop replay a rig offline and drives the synthetic generator.

use super::source::{Capture, FrameSource, SourceError};
use super::types::{FrameImage, ImageSize};
use crate::detect::{CornerDetector, Detection, PresenceCheck};
use crate::pattern::GridSize;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current session file format version.
pub const SESSION_VERSION: u32 = 1;

/// One recorded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub width: u32,
    pub height: u32,
    /// The device returned a frame without pixel data.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
    /// Outcome of the fast presence check. Defaults to "corners present".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,
    /// Corners reported by full extraction, in reference-point order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corners: Option<Vec<[f64; 2]>>,
}

impl RecordedFrame {
    /// A frame of the given size showing no pattern.
    pub fn blank(size: ImageSize) -> Self {
        Self {
            width: size.width,
            height: size.height,
            empty: false,
            presence: None,
            corners: None,
        }
    }

    /// A frame in which the pattern was fully detected.
    pub fn with_corners(size: ImageSize, corners: &[Point2<f64>]) -> Self {
        Self {
            corners: Some(corners.iter().map(|p| [p.x, p.y]).collect()),
            ..Self::blank(size)
        }
    }

    /// True when the fast presence check should report the pattern.
    pub fn likely_contains_pattern(&self) -> bool {
        self.presence.unwrap_or(self.corners.is_some())
    }
}

impl FrameImage for RecordedFrame {
    fn is_empty(&self) -> bool {
        self.empty || self.width == 0 || self.height == 0
    }

    fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }
}

/// All frames recorded for one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCamera {
    pub id: String,
    pub frames: Vec<RecordedFrame>,
}

/// A recorded capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub cameras: Vec<RecordedCamera>,
}

impl Session {
    pub fn new(cameras: Vec<RecordedCamera>) -> Self {
        Self {
            version: SESSION_VERSION,
            cameras,
        }
    }

    /// Load a session file.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let content = std::fs::read_to_string(path).map_err(|e| SessionError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let session: Session =
            serde_json::from_str(&content).map_err(|e| SessionError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        if session.version != SESSION_VERSION {
            return Err(SessionError::UnsupportedVersion {
                path: path.to_path_buf(),
                version: session.version,
            });
        }
        Ok(session)
    }

    /// Write the session as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| SessionError::Encode {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| SessionError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn camera(&self, id: &str) -> Option<&RecordedCamera> {
        self.cameras.iter().find(|c| c.id == id)
    }
}

/// Errors that can occur when loading or writing a session file.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to access session file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse session file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to encode session for '{}': {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported session version {version} in '{}'", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

/// Frame source replaying a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionSource {
    session: Arc<Session>,
}

impl SessionSource {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
        }
    }
}

impl FrameSource for SessionSource {
    type Capture = RecordedCapture;

    fn open(&self, camera_id: &str) -> Result<RecordedCapture, SourceError> {
        let index = self
            .session
            .cameras
            .iter()
            .position(|c| c.id == camera_id)
            .ok_or_else(|| {
                SourceError::DeviceUnavailable(format!(
                    "no camera '{}' in recorded session",
                    camera_id
                ))
            })?;
        Ok(RecordedCapture {
            session: Arc::clone(&self.session),
            camera: index,
            cursor: 0,
        })
    }
}

/// Stream over one camera's recorded frames.
#[derive(Debug, Clone)]
pub struct RecordedCapture {
    session: Arc<Session>,
    camera: usize,
    cursor: usize,
}

impl RecordedCapture {
    /// Number of frames not yet read.
    pub fn remaining(&self) -> usize {
        self.session.cameras[self.camera]
            .frames
            .len()
            .saturating_sub(self.cursor)
    }
}

impl Capture for RecordedCapture {
    type Image = RecordedFrame;

    fn read(&mut self) -> Result<RecordedFrame, SourceError> {
        let camera = &self.session.cameras[self.camera];
        let frame = camera.frames.get(self.cursor).cloned().ok_or_else(|| {
            SourceError::ReadFailure(format!(
                "recording for '{}' ended after {} frames",
                camera.id,
                camera.frames.len()
            ))
        })?;
        self.cursor += 1;
        Ok(frame)
    }
}

/// Presence check answering from the recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedPresence;

impl PresenceCheck<RecordedFrame> for RecordedPresence {
    fn has_pattern(&self, image: &RecordedFrame, _grid: GridSize) -> bool {
        image.likely_contains_pattern()
    }
}

/// Corner detector answering from the recording.
///
/// A recording with the wrong number of corners for the requested grid is
/// reported as not found.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedDetector;

impl CornerDetector<RecordedFrame> for RecordedDetector {
    fn find_corners(&self, image: &RecordedFrame, grid: GridSize) -> Detection {
        match &image.corners {
            Some(corners) if corners.len() == grid.corner_count() => {
                Detection::found(corners.iter().map(|c| Point2::new(c[0], c[1])).collect())
            }
            Some(corners) => {
                log::debug!(
                    "Recorded frame has {} corners, grid {} needs {}",
                    corners.len(),
                    grid,
                    grid.corner_count()
                );
                Detection::not_found()
            }
            None => Detection::not_found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: ImageSize = ImageSize {
        width: 640,
        height: 480,
    };

    const GRID: GridSize = GridSize {
        width: 2,
        height: 2,
    };

    fn corners() -> Vec<Point2<f64>> {
        vec![
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 20.0),
            Point2::new(20.0, 10.0),
            Point2::new(20.0, 20.0),
        ]
    }

    fn session() -> Session {
        Session::new(vec![
            RecordedCamera {
                id: "left".into(),
                frames: vec![RecordedFrame::blank(SIZE), RecordedFrame::with_corners(SIZE, &corners())],
            },
            RecordedCamera {
                id: "right".into(),
                frames: vec![RecordedFrame::blank(SIZE)],
            },
        ])
    }

    #[test]
    fn test_session_source_reads_in_order() {
        let source = SessionSource::new(session());
        let mut capture = source.open("left").unwrap();
        assert_eq!(capture.remaining(), 2);
        assert!(capture.read().unwrap().corners.is_none());
        assert!(capture.read().unwrap().corners.is_some());
        assert!(matches!(capture.read(), Err(SourceError::ReadFailure(_))));
    }

    #[test]
    fn test_session_source_unknown_camera() {
        let source = SessionSource::new(session());
        assert!(matches!(
            source.open("middle"),
            Err(SourceError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_recorded_presence_defaults_to_corners() {
        let blank = RecordedFrame::blank(SIZE);
        let full = RecordedFrame::with_corners(SIZE, &corners());
        assert!(!RecordedPresence.has_pattern(&blank, GRID));
        assert!(RecordedPresence.has_pattern(&full, GRID));

        let hinted = RecordedFrame {
            presence: Some(true),
            ..blank
        };
        assert!(RecordedPresence.has_pattern(&hinted, GRID));
    }

    #[test]
    fn test_recorded_detector_checks_corner_count() {
        let full = RecordedFrame::with_corners(SIZE, &corners());
        let detection = RecordedDetector.find_corners(&full, GRID);
        assert!(detection.found);
        assert_eq!(detection.corners, corners());

        let bigger = GridSize {
            width: 3,
            height: 2,
        };
        assert!(!RecordedDetector.find_corners(&full, bigger).found);
    }

    #[test]
    fn test_recorded_frame_emptiness() {
        assert!(!RecordedFrame::blank(SIZE).is_empty());
        assert!(RecordedFrame::blank(ImageSize::new(0, 0)).is_empty());
        let dropped = RecordedFrame {
            empty: true,
            ..RecordedFrame::blank(SIZE)
        };
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_session_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let original = session();
        original.save(&path).unwrap();
        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_session_load_rejects_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"version": 7, "cameras": []}"#).unwrap();
        assert!(matches!(
            Session::load(&path),
            Err(SessionError::UnsupportedVersion { version: 7, .. })
        ));
    }

    #[test]
    fn test_session_load_missing_file() {
        let err = Session::load(Path::new("/nonexistent/session.json")).unwrap_err();
        assert!(err.to_string().contains("session.json"));
    }
}
