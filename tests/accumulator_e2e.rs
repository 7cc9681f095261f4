//! End-to-end tests for the capture/validate/accumulate loop over recorded sessions.

use nalgebra::Point2;
use stereo_calib::accumulator::{ObservationAccumulator, Rejection};
use stereo_calib::capture_loop::{process_pair, run_capture, FrameOutcome};
use stereo_calib::control::{AutoAccept, Decision, QuitSignal, ScriptedDecisions};
use stereo_calib::error::FatalError;
use stereo_calib::frame::{
    open_validated, CameraSlot, FramePair, ImageSize, RecordedCamera, RecordedDetector,
    RecordedFrame, RecordedPresence, Session, SessionSource,
};
use stereo_calib::pattern::{corner_index, PatternSpec};

const SIZE: ImageSize = ImageSize {
    width: 640,
    height: 480,
};

fn pattern() -> PatternSpec {
    PatternSpec::new(3, 2, 0.05).unwrap()
}

/// Corners for a 3x2 grid in reference-point order, shifted so different
/// frames are distinguishable.
fn corners(shift: f64) -> Vec<Point2<f64>> {
    (0..3)
        .flat_map(|i| {
            (0..2).map(move |j| Point2::new(100.0 + 40.0 * i as f64 + shift, 80.0 + 40.0 * j as f64))
        })
        .collect()
}

fn good(shift: f64) -> RecordedFrame {
    RecordedFrame::with_corners(SIZE, &corners(shift))
}

fn blank() -> RecordedFrame {
    RecordedFrame::blank(SIZE)
}

/// Presence check fires, but full extraction finds nothing.
fn false_positive() -> RecordedFrame {
    RecordedFrame {
        presence: Some(true),
        ..blank()
    }
}

fn empty() -> RecordedFrame {
    RecordedFrame {
        empty: true,
        ..blank()
    }
}

/// Build a two-camera session; the first frame of each camera is the startup frame.
fn session(pairs: Vec<(RecordedFrame, RecordedFrame)>) -> Session {
    let (first, second): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    let with_startup = |frames: Vec<RecordedFrame>| {
        let mut all = vec![blank()];
        all.extend(frames);
        all
    };
    Session::new(vec![
        RecordedCamera {
            id: "left".to_string(),
            frames: with_startup(first),
        },
        RecordedCamera {
            id: "right".to_string(),
            frames: with_startup(second),
        },
    ])
}

fn run(
    session: Session,
    target: usize,
    decisions: &mut ScriptedDecisions,
    quit: &QuitSignal,
) -> Result<stereo_calib::capture_loop::CaptureSummary, FatalError> {
    let source = SessionSource::new(session);
    let mut captures = [
        open_validated(&source, CameraSlot::Camera0, "left")?,
        open_validated(&source, CameraSlot::Camera1, "right")?,
    ];
    run_capture(
        &mut captures,
        ObservationAccumulator::new(pattern(), target),
        &RecordedPresence,
        &RecordedDetector,
        decisions,
        quit,
    )
}

#[test]
fn test_completes_after_target_valid_pairs() {
    // Pairs 1, 3 and 4 are valid; 2 and 5 fail the presence check.
    let session = session(vec![
        (good(0.0), good(1.0)),
        (blank(), good(2.0)),
        (good(3.0), good(4.0)),
        (good(5.0), good(6.0)),
        (good(7.0), blank()),
    ]);
    let mut decisions = ScriptedDecisions::default();
    let summary = run(session, 3, &mut decisions, &QuitSignal::new()).unwrap();

    assert_eq!(summary.dataset.len(), 3);
    assert_eq!(summary.dataset.reference_points().len(), 3);
    assert_eq!(summary.stats.pairs, 4);
    assert_eq!(summary.stats.no_pattern, 1);
    assert_eq!(summary.stats.accepted, 3);
    assert_eq!(decisions.decided(), 3);

    let observations = summary.dataset.observations();
    assert_eq!(observations[0].camera0(), corners(0.0).as_slice());
    assert_eq!(observations[1].camera1(), corners(4.0).as_slice());
    assert_eq!(observations[2].camera0(), corners(5.0).as_slice());
}

#[test]
fn test_fixture_corners_follow_reference_order() {
    let pattern = pattern();
    let reference = pattern.reference_points();
    let grid = corners(0.0);
    assert_eq!(grid.len(), reference.len());
    for i in 0..3 {
        for j in 0..2 {
            let k = corner_index(pattern.grid(), i, j);
            assert_eq!(grid[k].x - 100.0, reference[k].x / 0.05 * 40.0);
            assert_eq!(grid[k].y - 80.0, reference[k].y / 0.05 * 40.0);
        }
    }
}

#[test]
fn test_capture_stops_reading_once_complete() {
    let source = SessionSource::new(session(vec![
        (good(0.0), good(0.0)),
        (good(1.0), good(1.0)),
        (good(2.0), good(2.0)),
    ]));
    let mut captures = [
        open_validated(&source, CameraSlot::Camera0, "left").unwrap(),
        open_validated(&source, CameraSlot::Camera1, "right").unwrap(),
    ];
    let summary = run_capture(
        &mut captures,
        ObservationAccumulator::new(pattern(), 2),
        &RecordedPresence,
        &RecordedDetector,
        &mut AutoAccept,
        &QuitSignal::new(),
    )
    .unwrap();

    assert_eq!(summary.dataset.len(), 2);
    assert_eq!(captures[0].capture().remaining(), 1);
    assert_eq!(captures[1].capture().remaining(), 1);
}

#[test]
fn test_one_sided_detection_is_rejected() {
    let mut accumulator = ObservationAccumulator::new(pattern(), 2);
    let pair = FramePair::new(0, good(0.0), false_positive());
    let mut decisions = ScriptedDecisions::default();

    let outcome = process_pair(
        &mut accumulator,
        &pair,
        &RecordedPresence,
        &RecordedDetector,
        &mut decisions,
    )
    .unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Rejected(Rejection::PatternNotFound {
            camera0: true,
            camera1: false,
        })
    );
    assert_eq!(accumulator.accepted(), 0);
    assert_eq!(decisions.decided(), 0);
}

#[test]
fn test_wrong_corner_count_never_enters_dataset() {
    let mut accumulator = ObservationAccumulator::new(pattern(), 2);
    let short = RecordedFrame::with_corners(SIZE, &corners(0.0)[..4]);
    let pair = FramePair::new(0, good(0.0), short);

    let outcome = process_pair(
        &mut accumulator,
        &pair,
        &RecordedPresence,
        &RecordedDetector,
        &mut AutoAccept,
    )
    .unwrap();

    assert!(matches!(outcome, FrameOutcome::Rejected(_)));
    assert!(accumulator.dataset().is_empty());
}

#[test]
fn test_accepted_count_never_decreases() {
    let frames = [
        (good(0.0), good(0.0)),
        (blank(), blank()),
        (good(1.0), false_positive()),
        (good(2.0), good(2.0)),
        (false_positive(), false_positive()),
        (good(3.0), good(3.0)),
        (good(4.0), good(4.0)),
    ];
    let mut accumulator = ObservationAccumulator::new(pattern(), 3);
    let mut decisions = ScriptedDecisions::new([Decision::Reject]);
    let mut last = 0;
    let mut outcomes = Vec::new();

    for (index, (first, second)) in frames.into_iter().enumerate() {
        let pair = FramePair::new(index as u64, first, second);
        let outcome = process_pair(
            &mut accumulator,
            &pair,
            &RecordedPresence,
            &RecordedDetector,
            &mut decisions,
        )
        .unwrap();
        assert!(accumulator.accepted() >= last);
        assert!(accumulator.accepted() <= accumulator.target());
        last = accumulator.accepted();
        outcomes.push(outcome);
    }

    assert_eq!(outcomes[0], FrameOutcome::Discarded);
    assert_eq!(outcomes[1], FrameOutcome::NoPattern);
    assert!(matches!(outcomes[2], FrameOutcome::Rejected(_)));
    assert_eq!(
        outcomes[3],
        FrameOutcome::Accepted {
            accepted: 1,
            target: 3
        }
    );
    assert!(matches!(outcomes[4], FrameOutcome::Rejected(_)));
    assert_eq!(outcomes[6], FrameOutcome::Completed);
    assert!(accumulator.is_complete());
}

#[test]
fn test_quit_decision_interrupts_with_progress() {
    let session = session(vec![
        (good(0.0), good(0.0)),
        (good(1.0), good(1.0)),
        (good(2.0), good(2.0)),
    ]);
    let mut decisions = ScriptedDecisions::new([Decision::Accept, Decision::Quit]);
    let err = run(session, 3, &mut decisions, &QuitSignal::new()).unwrap_err();

    assert!(matches!(
        err,
        FatalError::Interrupted {
            accepted: 1,
            target: 3
        }
    ));
    assert_eq!(err.exit_code(), 130);
}

#[test]
fn test_poll_quit_stops_before_reading() {
    let session = session(vec![(good(0.0), good(0.0)), (good(1.0), good(1.0))]);
    let mut decisions = ScriptedDecisions::default().quit_after_polls(1);
    let err = run(session, 2, &mut decisions, &QuitSignal::new()).unwrap_err();

    assert!(matches!(
        err,
        FatalError::Interrupted {
            accepted: 1,
            target: 2
        }
    ));
}

#[test]
fn test_raised_quit_signal_interrupts_immediately() {
    let quit = QuitSignal::new();
    quit.raise();
    let session = session(vec![(good(0.0), good(0.0))]);
    let mut decisions = ScriptedDecisions::default();
    let err = run(session, 1, &mut decisions, &quit).unwrap_err();

    assert!(matches!(err, FatalError::Interrupted { accepted: 0, .. }));
    assert_eq!(decisions.decided(), 0);
}

#[test]
fn test_empty_frame_during_capture_is_fatal() {
    let session = session(vec![(good(0.0), good(0.0)), (good(1.0), empty())]);
    let err = run(session, 3, &mut ScriptedDecisions::default(), &QuitSignal::new()).unwrap_err();

    assert!(matches!(
        err,
        FatalError::EmptyFrameDuringCapture {
            camera: CameraSlot::Camera1,
            frame: 1
        }
    ));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_empty_first_frame_fails_startup() {
    let mut session = session(vec![(good(0.0), good(0.0))]);
    session.cameras[0].frames[0] = empty();
    let source = SessionSource::new(session);

    let err = open_validated(&source, CameraSlot::Camera0, "left").unwrap_err();
    assert!(matches!(
        err,
        FatalError::EmptyFrameAtStartup {
            camera: CameraSlot::Camera0,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_exhausted_session_is_read_failure() {
    let session = session(vec![(good(0.0), good(0.0))]);
    let err = run(session, 2, &mut ScriptedDecisions::default(), &QuitSignal::new()).unwrap_err();
    assert!(matches!(
        err,
        FatalError::ReadFailure {
            camera: CameraSlot::Camera0,
            ..
        }
    ));
}

#[test]
fn test_session_file_replays_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    session(vec![
        (good(0.0), good(0.0)),
        (false_positive(), good(1.0)),
        (good(2.0), good(2.0)),
    ])
    .save(&path)
    .unwrap();

    let loaded = Session::load(&path).unwrap();
    assert_eq!(loaded.cameras.len(), 2);
    assert!(loaded.camera("right").is_some());

    let summary = run(loaded, 2, &mut ScriptedDecisions::default(), &QuitSignal::new()).unwrap();
    assert_eq!(summary.dataset.len(), 2);
    assert_eq!(summary.stats.rejected, 1);
}
