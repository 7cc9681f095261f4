//! Solver contracts and result types.

use crate::frame::{CameraSlot, ImageSize};
use nalgebra::{Matrix3, Point2, Point3};

/// Fewest distinct board poses a planar calibration accepts.
pub const MIN_VIEWS: usize = 3;

/// Parameters held fixed during intrinsic calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverFlags {
    /// Keep p1 and p2 at zero.
    pub fix_tangential_distortion: bool,
    /// Keep the principal point at the image centre.
    pub fix_principal_point: bool,
}

impl Default for SolverFlags {
    fn default() -> Self {
        Self {
            fix_tangential_distortion: true,
            fix_principal_point: true,
        }
    }
}

/// Calibrated camera model for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicSolution {
    pub intrinsic_matrix: Matrix3<f64>,
    /// Distortion coefficients `[k1, k2, p1, p2, k3]`.
    pub distortion: Vec<f64>,
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
}

impl IntrinsicSolution {
    pub fn fx(&self) -> f64 {
        self.intrinsic_matrix[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic_matrix[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic_matrix[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic_matrix[(1, 2)]
    }

    /// Coefficient at `index`, zero when absent.
    pub fn distortion_coefficient(&self, index: usize) -> f64 {
        self.distortion.get(index).copied().unwrap_or(0.0)
    }
}

/// Why a solver produced no usable model.
///
/// These are calibration outcomes, not process failures: they travel inside
/// [`CalibrationResult`] and the caller decides what to do with them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverFailure {
    #[error("need at least {required} views, got {got}")]
    InsufficientViews { got: usize, required: usize },

    #[error("{objects} object point sets but {images} image point sets")]
    MismatchedViews { objects: usize, images: usize },

    #[error("view {view} has {objects} object points but {images} image points")]
    MismatchedPoints {
        view: usize,
        objects: usize,
        images: usize,
    },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("refinement did not converge (RMS error {reprojection_error:.3} px)")]
    NonConvergence { reprojection_error: f64 },

    #[error("{0} has no intrinsic calibration")]
    MissingIntrinsics(CameraSlot),
}

/// Single-camera intrinsic calibration from planar correspondences.
pub trait IntrinsicSolver {
    /// Calibrate one camera.
    ///
    /// `object_points[i]` and `image_points[i]` describe view `i`; both
    /// sequences must have the same length and matching point counts.
    fn calibrate_single_camera(
        &self,
        object_points: &[&[Point3<f64>]],
        image_points: &[&[Point2<f64>]],
        image_size: ImageSize,
        flags: SolverFlags,
    ) -> Result<IntrinsicSolution, SolverFailure>;
}

/// Terminal calibration outcome for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub camera: CameraSlot,
    pub outcome: Result<IntrinsicSolution, SolverFailure>,
}

impl CalibrationResult {
    pub fn solution(&self) -> Option<&IntrinsicSolution> {
        self.outcome.as_ref().ok()
    }

    /// Converged with an error at or below `max_reprojection_error`.
    pub fn is_acceptable(&self, max_reprojection_error: f64) -> bool {
        self.solution()
            .map(|s| s.reprojection_error <= max_reprojection_error)
            .unwrap_or(false)
    }
}

/// Check the shape of a correspondence set before solving.
pub(crate) fn check_views(
    object_points: &[&[Point3<f64>]],
    image_points: &[&[Point2<f64>]],
) -> Result<(), SolverFailure> {
    if object_points.len() != image_points.len() {
        return Err(SolverFailure::MismatchedViews {
            objects: object_points.len(),
            images: image_points.len(),
        });
    }
    if object_points.len() < MIN_VIEWS {
        return Err(SolverFailure::InsufficientViews {
            got: object_points.len(),
            required: MIN_VIEWS,
        });
    }
    for (view, (objects, images)) in object_points.iter().zip(image_points).enumerate() {
        if objects.len() != images.len() {
            return Err(SolverFailure::MismatchedPoints {
                view,
                objects: objects.len(),
                images: images.len(),
            });
        }
        if objects.len() < 4 {
            return Err(SolverFailure::DegenerateGeometry(format!(
                "view {} has only {} points",
                view,
                objects.len()
            )));
        }
    }
    Ok(())
}
