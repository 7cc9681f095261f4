//! The capture/validate/accumulate loop.
//!
//! One control thread reads a frame pair, rejects it cheaply when either
//! camera does not show the pattern, runs full corner extraction on both
//! frames concurrently, and hands valid candidates to the operator before
//! they enter the dataset. Frame pair N is fully processed before pair N+1
//! is read.

use crate::accumulator::{
    AccumulatorState, CalibrationDataset, ObservationAccumulator, Rejection,
};
use crate::control::{Decision, DecisionPort, QuitSignal};
use crate::detect::{detect_both, CornerDetector, PresenceCheck};
use crate::error::FatalError;
use crate::frame::{CameraSlot, Capture, FrameImage, FramePair, ValidatedCapture};
use std::time::Instant;

/// What happened to one frame pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The presence check failed on at least one camera.
    NoPattern,
    /// Corner extraction did not produce a usable observation.
    Rejected(Rejection),
    /// The operator rejected the candidate.
    Discarded,
    Accepted { accepted: usize, target: usize },
    /// The observation completed the dataset.
    Completed,
}

/// Per-outcome counters for a capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub pairs: u64,
    pub no_pattern: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub accepted: u64,
}

impl CaptureStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        self.pairs += 1;
        match outcome {
            FrameOutcome::NoPattern => self.no_pattern += 1,
            FrameOutcome::Rejected(_) => self.rejected += 1,
            FrameOutcome::Discarded => self.discarded += 1,
            FrameOutcome::Accepted { .. } | FrameOutcome::Completed => self.accepted += 1,
        }
    }
}

/// A finished capture run.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub dataset: CalibrationDataset,
    pub stats: CaptureStats,
}

/// Advance the accumulator by one frame pair.
///
/// An empty frame is fatal, as is a quit decision. Every other failure
/// discards the pair and leaves the dataset unchanged.
pub fn process_pair<I, P, D, K>(
    accumulator: &mut ObservationAccumulator,
    pair: &FramePair<I>,
    presence: &P,
    detector: &D,
    decisions: &mut K,
) -> Result<FrameOutcome, FatalError>
where
    I: FrameImage + Sync,
    P: PresenceCheck<I> + ?Sized,
    D: CornerDetector<I> + ?Sized,
    K: DecisionPort + ?Sized,
{
    if accumulator.is_complete() {
        return Ok(FrameOutcome::Completed);
    }

    for slot in CameraSlot::BOTH {
        if pair.frame(slot).is_empty() {
            return Err(FatalError::EmptyFrameDuringCapture {
                camera: slot,
                frame: pair.index,
            });
        }
    }

    let grid = accumulator.pattern().grid();
    let start = Instant::now();
    let present = CameraSlot::BOTH
        .iter()
        .all(|&slot| presence.has_pattern(pair.frame(slot), grid));
    log::debug!(
        "Presence check on frame pair {} took {:?}",
        pair.index,
        start.elapsed()
    );
    if !present {
        return Ok(FrameOutcome::NoPattern);
    }

    let [frame0, frame1] = &pair.frames;
    let detection = detect_both(detector, frame0, frame1, grid);
    log::debug!(
        "Corner extraction on frame pair {} took {:?}",
        pair.index,
        detection.elapsed
    );

    let candidate = match accumulator.candidate(pair.index, detection) {
        Ok(candidate) => candidate,
        Err(rejection) => {
            log::debug!("Frame pair {} rejected: {}", pair.index, rejection);
            return Ok(FrameOutcome::Rejected(rejection));
        }
    };

    match decisions.decide(&candidate) {
        Decision::Quit => Err(FatalError::Interrupted {
            accepted: accumulator.accepted(),
            target: accumulator.target(),
        }),
        Decision::Reject => {
            log::info!("Operator rejected frame pair {}", pair.index);
            Ok(FrameOutcome::Discarded)
        }
        Decision::Accept | Decision::Continue => match accumulator.accept(candidate) {
            Ok(AccumulatorState::Complete) => Ok(FrameOutcome::Completed),
            Ok(AccumulatorState::Collecting { accepted, target }) => {
                Ok(FrameOutcome::Accepted { accepted, target })
            }
            Err(rejection) => Ok(FrameOutcome::Rejected(rejection)),
        },
    }
}

/// Run the capture loop until the accumulator completes.
///
/// The quit signal and the decision port are both checked once per
/// iteration, before the next pair is read.
pub fn run_capture<C, P, D, K>(
    captures: &mut [ValidatedCapture<C>; 2],
    mut accumulator: ObservationAccumulator,
    presence: &P,
    detector: &D,
    decisions: &mut K,
    quit: &QuitSignal,
) -> Result<CaptureSummary, FatalError>
where
    C: Capture,
    C::Image: Sync,
    P: PresenceCheck<C::Image> + ?Sized,
    D: CornerDetector<C::Image> + ?Sized,
    K: DecisionPort + ?Sized,
{
    let mut stats = CaptureStats::default();
    let mut index = 0u64;

    while !accumulator.is_complete() {
        if quit.is_raised() || decisions.poll() == Decision::Quit {
            return Err(FatalError::Interrupted {
                accepted: accumulator.accepted(),
                target: accumulator.target(),
            });
        }

        let [capture0, capture1] = captures;
        let frame0 = capture0.read_frame()?;
        let frame1 = capture1.read_frame()?;
        let pair = FramePair::new(index, frame0, frame1);
        index += 1;

        let outcome = process_pair(&mut accumulator, &pair, presence, detector, decisions)?;
        stats.record(&outcome);

        match &outcome {
            FrameOutcome::Accepted { accepted, target } => {
                println!("Observation {}/{} accepted", accepted, target);
            }
            FrameOutcome::Completed => {
                println!(
                    "Observation {0}/{0} accepted, capture complete",
                    accumulator.target()
                );
            }
            _ => log::debug!("Frame pair {}: {:?}", pair.index, outcome),
        }
    }

    log::info!(
        "Capture finished after {} frame pairs ({} without pattern, {} rejected, {} discarded)",
        stats.pairs,
        stats.no_pattern,
        stats.rejected,
        stats.discarded
    );

    Ok(CaptureSummary {
        dataset: accumulator.into_dataset(),
        stats,
    })
}
