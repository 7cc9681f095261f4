//! Observation accumulator: the dataset-building state machine.
//!
//! The accumulator starts in `Collecting` and moves to `Complete` once
//! `target` observations have been accepted. Accepted observations are never
//! removed or reordered, and every observation is paired with the shared
//! reference points of the pattern.

use crate::detect::PairDetection;
use crate::frame::CameraSlot;
use crate::pattern::{PatternSpec, ReferencePoints};
use nalgebra::{Point2, Point3};
use std::sync::Arc;

/// Matched corner sets from both cameras of a single frame pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    corners: [Vec<Point2<f64>>; 2],
}

impl Observation {
    pub fn corners(&self, slot: CameraSlot) -> &[Point2<f64>] {
        &self.corners[slot.index()]
    }

    pub fn camera0(&self) -> &[Point2<f64>] {
        self.corners(CameraSlot::Camera0)
    }

    pub fn camera1(&self) -> &[Point2<f64>] {
        self.corners(CameraSlot::Camera1)
    }
}

/// Why a frame pair did not yield a candidate observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("pattern not found (camera0: {camera0}, camera1: {camera1})")]
    PatternNotFound { camera0: bool, camera1: bool },

    #[error("{camera} reported {got} corners, pattern has {expected}")]
    CornerCountMismatch {
        camera: CameraSlot,
        expected: usize,
        got: usize,
    },
}

/// An observation awaiting the operator's accept/reject decision.
#[derive(Debug, Clone)]
pub struct CandidateObservation {
    frame_index: u64,
    observation: Observation,
}

impl CandidateObservation {
    /// Build a candidate from a joined detection.
    ///
    /// Both cameras must have found the pattern, with exactly `expected`
    /// corners each; anything else rejects the whole pair.
    pub fn from_detection(
        frame_index: u64,
        detection: PairDetection,
        expected: usize,
    ) -> Result<Self, Rejection> {
        let [first, second] = detection.detections;
        if !(first.found && second.found) {
            return Err(Rejection::PatternNotFound {
                camera0: first.found,
                camera1: second.found,
            });
        }
        let observation = Observation {
            corners: [first.corners, second.corners],
        };
        check_corner_counts(&observation, expected)?;
        Ok(Self {
            frame_index,
            observation,
        })
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    #[cfg(test)]
    pub(crate) fn for_tests(frame_index: u64) -> Self {
        Self {
            frame_index,
            observation: Observation {
                corners: [Vec::new(), Vec::new()],
            },
        }
    }
}

fn check_corner_counts(observation: &Observation, expected: usize) -> Result<(), Rejection> {
    for slot in CameraSlot::BOTH {
        let got = observation.corners(slot).len();
        if got != expected {
            return Err(Rejection::CornerCountMismatch {
                camera: slot,
                expected,
                got,
            });
        }
    }
    Ok(())
}

/// Correspondences collected for calibration.
///
/// `observations` and `reference_points` always have the same length.
#[derive(Debug, Clone, Default)]
pub struct CalibrationDataset {
    observations: Vec<Observation>,
    reference_points: Vec<ReferencePoints>,
}

impl CalibrationDataset {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn reference_points(&self) -> &[ReferencePoints] {
        &self.reference_points
    }

    /// Per-observation 3D points, in solver input shape.
    pub fn object_points(&self) -> Vec<&[Point3<f64>]> {
        self.reference_points.iter().map(|r| &r[..]).collect()
    }

    /// Per-observation corners of one camera, in solver input shape.
    pub fn image_points(&self, slot: CameraSlot) -> Vec<&[Point2<f64>]> {
        self.observations.iter().map(|o| o.corners(slot)).collect()
    }

    fn push(&mut self, observation: Observation, reference: ReferencePoints) {
        self.observations.push(observation);
        self.reference_points.push(reference);
    }
}

/// Accumulator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Collecting { accepted: usize, target: usize },
    Complete,
}

/// Owns the growing dataset and enforces the stopping condition.
#[derive(Debug, Clone)]
pub struct ObservationAccumulator {
    pattern: PatternSpec,
    reference: ReferencePoints,
    target: usize,
    dataset: CalibrationDataset,
}

impl ObservationAccumulator {
    pub fn new(pattern: PatternSpec, target: usize) -> Self {
        Self {
            pattern,
            reference: pattern.reference_points(),
            target,
            dataset: CalibrationDataset::default(),
        }
    }

    pub fn pattern(&self) -> &PatternSpec {
        &self.pattern
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn accepted(&self) -> usize {
        self.dataset.len()
    }

    pub fn state(&self) -> AccumulatorState {
        if self.accepted() >= self.target {
            AccumulatorState::Complete
        } else {
            AccumulatorState::Collecting {
                accepted: self.accepted(),
                target: self.target,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == AccumulatorState::Complete
    }

    /// Turn a joined detection into a candidate for this pattern.
    pub fn candidate(
        &self,
        frame_index: u64,
        detection: PairDetection,
    ) -> Result<CandidateObservation, Rejection> {
        CandidateObservation::from_detection(frame_index, detection, self.pattern.corner_count())
    }

    /// Append an accepted candidate.
    ///
    /// Once complete, further candidates are dropped and the dataset is left
    /// untouched.
    pub fn accept(
        &mut self,
        candidate: CandidateObservation,
    ) -> Result<AccumulatorState, Rejection> {
        if self.is_complete() {
            log::warn!(
                "Dropping frame pair {}: already holding {} observations",
                candidate.frame_index,
                self.target
            );
            return Ok(AccumulatorState::Complete);
        }
        check_corner_counts(&candidate.observation, self.pattern.corner_count())?;

        self.dataset
            .push(candidate.observation, Arc::clone(&self.reference));
        log::info!(
            "Accepted observation {}/{} from frame pair {}",
            self.accepted(),
            self.target,
            candidate.frame_index
        );
        Ok(self.state())
    }

    pub fn dataset(&self) -> &CalibrationDataset {
        &self.dataset
    }

    /// Hand the dataset over to calibration.
    pub fn into_dataset(self) -> CalibrationDataset {
        self.dataset
    }
}
