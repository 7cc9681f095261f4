//! Subcommand handlers for run, synth, list-cameras and config actions.

use std::path::Path;

use super::args::{ConfigAction, RunArgs, SynthArgs};
use crate::accumulator::ObservationAccumulator;
use crate::calibration::{
    CalibrationInvoker, CalibrationResult, PlanarIntrinsicSolver, RelativePoseSolver,
    SolverFailure, StereoSolution,
};
use crate::capture_loop::{run_capture, CaptureStats};
use crate::config::{default_path as get_config_path, Config, ConfigError, Settings};
use crate::control::{AutoAccept, DecisionMode, DecisionPort, KeyboardDecider, QuitSignal};
use crate::error::FatalError;
use crate::frame::{
    open_validated, CameraSlot, RecordedDetector, RecordedPresence, Session, SessionSource,
};
use crate::pattern::PatternSpec;
use crate::synthetic::{generate_session, SynthOptions, VirtualRig};

/// Everything a calibration run produced.
#[derive(Debug)]
struct RunReport {
    stats: CaptureStats,
    views: usize,
    results: [CalibrationResult; 2],
    stereo: Option<Result<StereoSolution, SolverFailure>>,
}

/// Capture observations from both cameras, then calibrate them.
pub fn run_calibration(args: &RunArgs, config_path: Option<&Path>) -> Result<(), FatalError> {
    let mut config = Config::load(config_path)?;
    args.apply(&mut config);
    let settings = config.validate()?;

    let Some(session_path) = settings.session.clone() else {
        return Err(ConfigError::Invalid(
            "no frame source configured; pass --session or set capture.session".to_string(),
        )
        .into());
    };
    let session = Session::load(&session_path)?;
    log::info!(
        "Replaying session {} ({} cameras)",
        session_path.display(),
        session.cameras.len()
    );

    println!(
        "Calibrating {} + {} with a {} pattern ({} m cells), {} observations",
        settings.cameras[0],
        settings.cameras[1],
        settings.pattern.grid(),
        settings.pattern.cell_size(),
        settings.target
    );

    let quit = QuitSignal::new();
    if let Err(e) = quit.install_ctrlc_handler() {
        log::warn!("Could not install Ctrl+C handler: {}", e);
    }

    let mut decisions = decision_port(&settings);
    let report = calibrate_session(
        &SessionSource::new(session),
        &settings,
        decisions.as_mut(),
        &quit,
    )?;
    print_report(&report, settings.max_reprojection_error);
    Ok(())
}

/// Pick the decision port for this run.
///
/// Falls back to accepting every candidate when the key listener can't start.
fn decision_port(settings: &Settings) -> Box<dyn DecisionPort> {
    match settings.decision {
        DecisionMode::Auto => Box::new(AutoAccept),
        DecisionMode::Keyboard => {
            let mut keyboard = KeyboardDecider::new(settings.review_window);
            match keyboard.start() {
                Ok(()) => {
                    println!("Review candidates with A (accept), R (reject), Q (quit)");
                    Box::new(keyboard)
                }
                Err(e) => {
                    eprintln!("Warning: Failed to start keyboard listener: {}", e);
                    eprintln!("Accepting every valid candidate instead.");
                    Box::new(AutoAccept)
                }
            }
        }
    }
}

fn calibrate_session(
    source: &SessionSource,
    settings: &Settings,
    decisions: &mut dyn DecisionPort,
    quit: &QuitSignal,
) -> Result<RunReport, FatalError> {
    let mut captures = [
        open_validated(source, CameraSlot::Camera0, &settings.cameras[0])?,
        open_validated(source, CameraSlot::Camera1, &settings.cameras[1])?,
    ];
    let image_sizes = [captures[0].image_size, captures[1].image_size];

    let accumulator = ObservationAccumulator::new(settings.pattern, settings.target);
    let summary = run_capture(
        &mut captures,
        accumulator,
        &RecordedPresence,
        &RecordedDetector,
        decisions,
        quit,
    )?;

    let invoker = CalibrationInvoker::new(
        PlanarIntrinsicSolver::default(),
        settings.flags,
        settings.max_reprojection_error,
    );
    let results = invoker.calibrate(&summary.dataset, image_sizes);

    let stereo = settings.stereo.then(|| {
        invoker.calibrate_stereo(&RelativePoseSolver, &summary.dataset, &results, image_sizes[0])
    });

    Ok(RunReport {
        stats: summary.stats,
        views: summary.dataset.len(),
        results,
        stereo,
    })
}

fn print_report(report: &RunReport, max_reprojection_error: f64) {
    println!();
    println!(
        "Captured {} observations from {} frame pairs ({} without pattern, {} rejected, {} discarded)",
        report.views,
        report.stats.pairs,
        report.stats.no_pattern,
        report.stats.rejected,
        report.stats.discarded
    );

    for result in &report.results {
        println!();
        match &result.outcome {
            Ok(solution) => {
                println!("{}:", result.camera);
                println!("  fx: {:.3}  fy: {:.3}", solution.fx(), solution.fy());
                println!("  cx: {:.3}  cy: {:.3}", solution.cx(), solution.cy());
                let coefficients: Vec<String> = solution
                    .distortion
                    .iter()
                    .map(|k| format!("{:.6}", k))
                    .collect();
                println!("  distortion: [{}]", coefficients.join(", "));
                if result.is_acceptable(max_reprojection_error) {
                    println!("  reprojection error: {:.4} px", solution.reprojection_error);
                } else {
                    println!(
                        "  reprojection error: {:.4} px (above {:.4} px)",
                        solution.reprojection_error, max_reprojection_error
                    );
                }
            }
            Err(failure) => println!("{}: calibration failed: {}", result.camera, failure),
        }
    }

    match &report.stereo {
        Some(Ok(stereo)) => {
            let (roll, pitch, yaw) = stereo.rotation.euler_angles();
            let t = stereo.translation;
            println!();
            println!("stereo:");
            println!(
                "  rotation (rad): roll {:.5}  pitch {:.5}  yaw {:.5}",
                roll, pitch, yaw
            );
            println!("  translation: [{:.5}, {:.5}, {:.5}]", t.x, t.y, t.z);
            println!("  baseline: {:.5}", stereo.baseline());
            println!("  reprojection error: {:.4} px", stereo.reprojection_error);
        }
        Some(Err(failure)) => {
            println!();
            println!("stereo: calibration failed: {}", failure);
        }
        None => {}
    }
}

/// Write a synthetic session for the default virtual rig.
pub fn synthesize(args: &SynthArgs, config_path: Option<&Path>) -> Result<(), FatalError> {
    let config = Config::load(config_path)?;
    let (width, height) = args
        .grid
        .unwrap_or((config.pattern.width, config.pattern.height));
    let cell_size = args.cell_size.unwrap_or(config.pattern.cell_size);
    let pattern = PatternSpec::new(width, height, cell_size).map_err(ConfigError::from)?;

    let options = SynthOptions {
        views: args.views,
        skip_every: args.skip_every,
        pattern,
        camera_ids: [config.capture.camera0.clone(), config.capture.camera1.clone()],
    };
    let session = generate_session(&VirtualRig::default(), &options);
    session.save(&args.out)?;

    let frames = session.cameras.first().map(|c| c.frames.len()).unwrap_or(0);
    println!(
        "Wrote {} frames per camera for '{}' and '{}' to {}",
        frames,
        options.camera_ids[0],
        options.camera_ids[1],
        args.out.display()
    );
    Ok(())
}

/// List the cameras of a recorded session and print them to stdout.
pub fn list_cameras(session: Option<&Path>, config_path: Option<&Path>) -> Result<(), FatalError> {
    let path = match session {
        Some(path) => path.to_path_buf(),
        None => Config::load(config_path)?.capture.session.ok_or_else(|| {
            ConfigError::Invalid(
                "no session to inspect; pass --session or set capture.session".to_string(),
            )
        })?,
    };
    let session = Session::load(&path)?;

    if session.cameras.is_empty() {
        println!("No cameras found in {}.", path.display());
        return Ok(());
    }
    println!("Cameras in {}:", path.display());
    for camera in &session.cameras {
        let size = camera
            .frames
            .first()
            .map(|f| format!("{}x{}", f.width, f.height))
            .unwrap_or_else(|| "no frames".to_string());
        println!("  {} ({} frames, {})", camera.id, camera.frames.len(), size);
    }
    println!();
    println!("Use --camera0 <id> and --camera1 <id> to select the rig.");
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config_path: Option<&Path>,
) -> Result<(), FatalError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load(Some(path.as_path()))?;
            println!("Current configuration:");
            println!();
            print!("{}", config.to_toml()?);
            println!();
            if path.exists() {
                println!("Config file: {} (exists)", path.display());
            } else {
                println!("Config file: {} (not found)", path.display());
            }
        }
        ConfigAction::Init => {
            if path.exists() {
                eprintln!("Use 'stereo-calib config show' to view current settings.");
                return Err(ConfigError::Invalid(format!(
                    "config file already exists: {}",
                    path.display()
                ))
                .into());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let content = format!(
                "# stereo-calib configuration\n\n{}",
                Config::default().to_toml()?
            );
            std::fs::write(&path, content).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}
