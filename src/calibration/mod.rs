//! Camera calibration solvers and the invoker that feeds them.

mod homography;
mod invoker;
mod model;
mod planar;
mod pose;
mod solver;
mod stereo;

pub use homography::{apply_homography, estimate_homography};
pub use invoker::CalibrationInvoker;
pub use model::CameraModel;
pub use planar::PlanarIntrinsicSolver;
pub use pose::pose_from_homography;
pub use solver::{
    CalibrationResult, IntrinsicSolution, IntrinsicSolver, SolverFailure, SolverFlags, MIN_VIEWS,
};
pub use stereo::{RelativePoseSolver, StereoSolution, StereoSolver};
