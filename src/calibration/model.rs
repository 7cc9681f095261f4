//! Pinhole camera with Brown-Conrady distortion (k1, k2, p1, p2).

use super::solver::IntrinsicSolution;
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2};

const UNDISTORT_ITERATIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl CameraModel {
    /// Distortion-free camera.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    pub fn from_solution(solution: &IntrinsicSolution) -> Self {
        Self {
            fx: solution.fx(),
            fy: solution.fy(),
            cx: solution.cx(),
            cy: solution.cy(),
            k1: solution.distortion_coefficient(0),
            k2: solution.distortion_coefficient(1),
            p1: solution.distortion_coefficient(2),
            p2: solution.distortion_coefficient(3),
        }
    }

    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Coefficients in `[k1, k2, p1, p2, k3]` order.
    pub fn distortion(&self) -> Vec<f64> {
        vec![self.k1, self.k2, self.p1, self.p2, 0.0]
    }

    /// Apply lens distortion to a normalized image point.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        Vector2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Invert [`distort`](Self::distort) by fixed-point iteration.
    pub fn undistort(&self, d: Vector2<f64>) -> Vector2<f64> {
        let mut n = d;
        for _ in 0..UNDISTORT_ITERATIONS {
            let (x, y) = (n.x, n.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            n = Vector2::new((d.x - dx) / radial, (d.y - dy) / radial);
        }
        n
    }

    /// Pixel to distorted normalized coordinates.
    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Pixel to undistorted normalized coordinates.
    pub fn undistort_pixel(&self, p: &Point2<f64>) -> Vector2<f64> {
        self.undistort(self.pixel_to_normalized(p))
    }

    /// Project a point given in camera coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        let d = self.distort(Vector2::new(p.x / p.z, p.y / p.z));
        Some(Point2::new(
            self.fx * d.x + self.cx,
            self.fy * d.y + self.cy,
        ))
    }

    /// Project a board point seen under `pose` (board to camera).
    pub fn project_board(&self, pose: &Isometry3<f64>, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project(&(pose * p))
    }
}

/// RMS distance between observed and predicted points over all views.
///
/// Infinite when any point falls behind its camera.
pub(crate) fn rms_reprojection_error(
    model: &CameraModel,
    poses: &[Isometry3<f64>],
    object_points: &[&[Point3<f64>]],
    image_points: &[&[Point2<f64>]],
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for ((pose, objects), images) in poses.iter().zip(object_points).zip(image_points) {
        for (object, image) in objects.iter().zip(images.iter()) {
            count += 1;
            match model.project_board(pose, object) {
                Some(predicted) => sum += (predicted.coords - image.coords).norm_squared(),
                None => return f64::INFINITY,
            }
        }
    }
    if count == 0 {
        return f64::INFINITY;
    }
    (sum / count as f64).sqrt()
}
