//! Hands a complete dataset to the solvers and collects the results.

use super::solver::{CalibrationResult, IntrinsicSolver, SolverFailure, SolverFlags};
use super::stereo::{StereoSolution, StereoSolver};
use crate::accumulator::CalibrationDataset;
use crate::frame::{CameraSlot, ImageSize};
use std::time::Instant;

/// Runs per-camera intrinsic calibration, and stereo calibration on request.
#[derive(Debug, Clone)]
pub struct CalibrationInvoker<S> {
    solver: S,
    flags: SolverFlags,
    max_reprojection_error: f64,
}

impl<S: IntrinsicSolver> CalibrationInvoker<S> {
    pub fn new(solver: S, flags: SolverFlags, max_reprojection_error: f64) -> Self {
        Self {
            solver,
            flags,
            max_reprojection_error,
        }
    }

    pub fn max_reprojection_error(&self) -> f64 {
        self.max_reprojection_error
    }

    /// Calibrate each camera independently against the shared reference points.
    ///
    /// Failures and poor fits are reported in the results, never raised.
    pub fn calibrate(
        &self,
        dataset: &CalibrationDataset,
        image_sizes: [ImageSize; 2],
    ) -> [CalibrationResult; 2] {
        let object_points = dataset.object_points();
        CameraSlot::BOTH.map(|camera| {
            let start = Instant::now();
            let outcome = self.solver.calibrate_single_camera(
                &object_points,
                &dataset.image_points(camera),
                image_sizes[camera.index()],
                self.flags,
            );
            log::debug!("Calibrating {} took {:?}", camera, start.elapsed());

            match &outcome {
                Ok(solution) if solution.reprojection_error > self.max_reprojection_error => {
                    log::warn!(
                        "{} reprojection error {:.3} px exceeds {:.3} px",
                        camera,
                        solution.reprojection_error,
                        self.max_reprojection_error
                    );
                }
                Ok(solution) => log::info!(
                    "{} calibrated, reprojection error {:.3} px",
                    camera,
                    solution.reprojection_error
                ),
                Err(failure) => log::warn!("{} calibration failed: {}", camera, failure),
            }
            CalibrationResult { camera, outcome }
        })
    }

    /// Estimate the rig extrinsics from the same dataset.
    ///
    /// Requires both cameras to have an intrinsic solution.
    pub fn calibrate_stereo<T: StereoSolver + ?Sized>(
        &self,
        stereo: &T,
        dataset: &CalibrationDataset,
        results: &[CalibrationResult; 2],
        image_size: ImageSize,
    ) -> Result<StereoSolution, SolverFailure> {
        let [first, second] = results;
        let intr0 = first
            .solution()
            .ok_or(SolverFailure::MissingIntrinsics(first.camera))?;
        let intr1 = second
            .solution()
            .ok_or(SolverFailure::MissingIntrinsics(second.camera))?;

        let start = Instant::now();
        let solution = stereo.calibrate_stereo(
            &dataset.object_points(),
            &dataset.image_points(CameraSlot::Camera0),
            &dataset.image_points(CameraSlot::Camera1),
            [intr0, intr1],
            image_size,
        );
        log::debug!("Stereo calibration took {:?}", start.elapsed());

        match &solution {
            Ok(s) => log::info!(
                "Stereo calibrated, baseline {:.4}, reprojection error {:.3} px",
                s.baseline(),
                s.reprojection_error
            ),
            Err(failure) => log::warn!("Stereo calibration failed: {}", failure),
        }
        solution
    }
}
