//! Relative pose between the two cameras of a calibrated rig.

use super::homography::estimate_homography;
use super::model::CameraModel;
use super::pose::{nearest_rotation, pose_from_homography};
use super::solver::{check_views, IntrinsicSolution, SolverFailure};
use crate::frame::ImageSize;
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Extrinsic calibration of a stereo pair.
///
/// `rotation` and `translation` map camera-0 coordinates to camera-1
/// coordinates: `X1 = R * X0 + T`.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    pub essential: Matrix3<f64>,
    pub fundamental: Matrix3<f64>,
    /// RMS error in camera 1 of points predicted through camera 0.
    pub reprojection_error: f64,
}

impl StereoSolution {
    /// Distance between the two optical centres, in pattern units.
    pub fn baseline(&self) -> f64 {
        self.translation.norm()
    }
}

/// Joint calibration of both cameras from the same observations.
pub trait StereoSolver {
    fn calibrate_stereo(
        &self,
        object_points: &[&[Point3<f64>]],
        image_points0: &[&[Point2<f64>]],
        image_points1: &[&[Point2<f64>]],
        intrinsics: [&IntrinsicSolution; 2],
        image_size: ImageSize,
    ) -> Result<StereoSolution, SolverFailure>;
}

/// Averages the per-view relative poses implied by each camera's board pose.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePoseSolver;

impl RelativePoseSolver {
    /// Board pose in one camera from undistorted, normalized corners.
    fn board_pose(
        model: &CameraModel,
        objects: &[Point3<f64>],
        images: &[Point2<f64>],
        view: usize,
    ) -> Result<Isometry3<f64>, SolverFailure> {
        let plane: Vec<Point2<f64>> = objects.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let rays: Vec<Point2<f64>> = images
            .iter()
            .map(|p| Point2::from(model.undistort_pixel(p)))
            .collect();
        estimate_homography(&plane, &rays)
            .and_then(|h| pose_from_homography(&Matrix3::identity(), &h))
            .ok_or_else(|| SolverFailure::DegenerateGeometry(format!("view {} pose is undefined", view)))
    }
}

impl StereoSolver for RelativePoseSolver {
    fn calibrate_stereo(
        &self,
        object_points: &[&[Point3<f64>]],
        image_points0: &[&[Point2<f64>]],
        image_points1: &[&[Point2<f64>]],
        intrinsics: [&IntrinsicSolution; 2],
        _image_size: ImageSize,
    ) -> Result<StereoSolution, SolverFailure> {
        check_views(object_points, image_points0)?;
        check_views(object_points, image_points1)?;

        let cam0 = CameraModel::from_solution(intrinsics[0]);
        let cam1 = CameraModel::from_solution(intrinsics[1]);

        let mut rotation_sum = Matrix3::<f64>::zeros();
        let mut translation_sum = Vector3::<f64>::zeros();
        let mut poses0 = Vec::with_capacity(object_points.len());
        for (view, objects) in object_points.iter().enumerate() {
            let pose0 = Self::board_pose(&cam0, objects, image_points0[view], view)?;
            let pose1 = Self::board_pose(&cam1, objects, image_points1[view], view)?;
            let relative = pose1 * pose0.inverse();
            rotation_sum += relative.rotation.to_rotation_matrix().matrix();
            translation_sum += relative.translation.vector;
            poses0.push(pose0);
        }

        let rotation = nearest_rotation(&rotation_sum).ok_or_else(|| {
            SolverFailure::DegenerateGeometry("relative rotations do not agree".to_string())
        })?;
        let translation = translation_sum / object_points.len() as f64;

        let essential = skew(&translation) * rotation.matrix();
        let k0_inv = cam0.intrinsic_matrix().try_inverse();
        let k1_inv = cam1.intrinsic_matrix().try_inverse();
        let (Some(k0_inv), Some(k1_inv)) = (k0_inv, k1_inv) else {
            return Err(SolverFailure::DegenerateGeometry(
                "intrinsic matrix is singular".to_string(),
            ));
        };
        let mut fundamental = k1_inv.transpose() * essential * k0_inv;
        let scale = fundamental[(2, 2)];
        if scale.abs() > f64::EPSILON {
            fundamental /= scale;
        }

        let camera1_from_camera0 = Isometry3::from_parts(
            Translation3::from(translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        );
        let mut sum = 0.0;
        let mut count = 0usize;
        for ((pose0, objects), images) in poses0.iter().zip(object_points).zip(image_points1) {
            let pose1 = camera1_from_camera0 * pose0;
            for (object, image) in objects.iter().zip(images.iter()) {
                let predicted = cam1.project_board(&pose1, object).ok_or_else(|| {
                    SolverFailure::DegenerateGeometry(
                        "board falls behind camera 1".to_string(),
                    )
                })?;
                sum += (predicted.coords - image.coords).norm_squared();
                count += 1;
            }
        }
        let reprojection_error = (sum / count.max(1) as f64).sqrt();
        if !reprojection_error.is_finite() {
            return Err(SolverFailure::NonConvergence { reprojection_error });
        }

        Ok(StereoSolution {
            rotation,
            translation,
            essential,
            fundamental,
            reprojection_error,
        })
    }
}

/// Cross-product matrix `[v]x`.
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}
