//! Pattern detection contracts and the two-camera fork-join detector.
//!
//! Full corner extraction is the most expensive step of a loop iteration, so
//! both frames of a pair are processed in parallel on two scoped threads that
//! are joined before the loop moves on.

use crate::pattern::GridSize;
use nalgebra::Point2;
use std::thread;
use std::time::{Duration, Instant};

/// Cheap test of whether a frame likely contains the pattern.
pub trait PresenceCheck<I: ?Sized> {
    fn has_pattern(&self, image: &I, grid: GridSize) -> bool;
}

/// Full corner extraction for a single frame.
///
/// When `found` is true, corners are ordered like the pattern's reference
/// points.
pub trait CornerDetector<I: ?Sized>: Sync {
    fn find_corners(&self, image: &I, grid: GridSize) -> Detection;
}

/// Result of one corner extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub found: bool,
    pub corners: Vec<Point2<f64>>,
}

impl Detection {
    pub fn found(corners: Vec<Point2<f64>>) -> Self {
        Self {
            found: true,
            corners,
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Joined result of detecting the pattern in both frames of a pair.
#[derive(Debug, Clone)]
pub struct PairDetection {
    pub detections: [Detection; 2],
    /// Wall-clock time from fork to join.
    pub elapsed: Duration,
}

impl PairDetection {
    /// True only when both cameras found the pattern.
    pub fn both_found(&self) -> bool {
        self.detections.iter().all(|d| d.found)
    }
}

/// Run corner extraction on both frames concurrently and wait for both.
///
/// Each branch writes only to its own [`Detection`]; nothing is shared
/// between them beyond read-only borrows. A panicking detector is reported
/// as "not found" for its frame.
pub fn detect_both<I, D>(detector: &D, image0: &I, image1: &I, grid: GridSize) -> PairDetection
where
    I: Sync + ?Sized,
    D: CornerDetector<I> + ?Sized,
{
    let start = Instant::now();

    let detections = thread::scope(|scope| {
        let first = scope.spawn(|| detector.find_corners(image0, grid));
        let second = scope.spawn(|| detector.find_corners(image1, grid));
        [join_detection(first, 0), join_detection(second, 1)]
    });

    PairDetection {
        detections,
        elapsed: start.elapsed(),
    }
}

fn join_detection(handle: thread::ScopedJoinHandle<'_, Detection>, camera: usize) -> Detection {
    handle.join().unwrap_or_else(|_| {
        log::error!("Corner detector panicked on camera{}, treating as not found", camera);
        Detection::not_found()
    })
}
