//! Planar intrinsic calibration.
//!
//! Closed-form initialization from per-view homographies, a linear radial
//! distortion fit, then Levenberg-Marquardt refinement of the intrinsics
//! and every board pose against the reprojection error.

use super::homography::{estimate_homography, smallest_eigenvector};
use super::model::{rms_reprojection_error, CameraModel};
use super::pose::pose_from_homography;
use super::solver::{check_views, IntrinsicSolution, IntrinsicSolver, SolverFailure, SolverFlags};
use crate::frame::ImageSize;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{
    DMatrix, DVector, Dyn, Isometry3, Matrix3, Point2, Point3, SMatrix, SVector, Translation3,
    UnitQuaternion, Vector3,
};
use std::cell::Cell;

/// Zhang-style planar calibration with nonlinear refinement.
///
/// A refinement that has not converged within `max_iterations` is reported
/// as [`SolverFailure::NonConvergence`].
#[derive(Debug, Clone, Copy)]
pub struct PlanarIntrinsicSolver {
    pub max_iterations: usize,
}

impl Default for PlanarIntrinsicSolver {
    fn default() -> Self {
        Self {
            max_iterations: 100,
        }
    }
}

impl IntrinsicSolver for PlanarIntrinsicSolver {
    fn calibrate_single_camera(
        &self,
        object_points: &[&[Point3<f64>]],
        image_points: &[&[Point2<f64>]],
        image_size: ImageSize,
        flags: SolverFlags,
    ) -> Result<IntrinsicSolution, SolverFailure> {
        check_views(object_points, image_points)?;

        let mut homographies = Vec::with_capacity(object_points.len());
        for (view, (objects, images)) in object_points.iter().zip(image_points).enumerate() {
            let plane = board_plane(objects).ok_or_else(|| {
                SolverFailure::DegenerateGeometry(format!("view {} object points are not planar", view))
            })?;
            let h = estimate_homography(&plane, images).ok_or_else(|| {
                SolverFailure::DegenerateGeometry(format!("view {} has no homography", view))
            })?;
            homographies.push(h);
        }

        let centre = image_size.center();
        let nominal = nominal_focal(image_size);
        let initial = if flags.fix_principal_point {
            let (fx, fy) = focal_with_fixed_centre(&homographies, centre, nominal)?;
            CameraModel::pinhole(fx, fy, centre.0, centre.1)
        } else {
            zhang_intrinsics(&homographies, centre, nominal)?
        };
        log::debug!(
            "Closed-form intrinsics: fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            initial.fx,
            initial.fy,
            initial.cx,
            initial.cy
        );

        let k = initial.intrinsic_matrix();
        let poses = homographies
            .iter()
            .enumerate()
            .map(|(view, h)| {
                pose_from_homography(&k, h).ok_or_else(|| {
                    SolverFailure::DegenerateGeometry(format!("view {} pose is undefined", view))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut model = initial;
        fit_distortion(
            &mut model,
            &poses,
            object_points,
            image_points,
            flags.fix_tangential_distortion,
        );

        let layout = Layout {
            free_centre: !flags.fix_principal_point,
            free_tangential: !flags.fix_tangential_distortion,
        };
        let refined = Problem::refine(
            layout,
            model,
            object_points,
            image_points,
            &poses,
            self.max_iterations,
        );
        let model = refined.model;

        let reprojection_error =
            rms_reprojection_error(&model, &refined.poses, object_points, image_points);
        let valid = reprojection_error.is_finite()
            && model.fx.is_finite()
            && model.fy.is_finite()
            && model.fx > 0.0
            && model.fy > 0.0;
        if !valid || !refined.converged {
            return Err(SolverFailure::NonConvergence { reprojection_error });
        }

        Ok(IntrinsicSolution {
            intrinsic_matrix: model.intrinsic_matrix(),
            distortion: model.distortion(),
            reprojection_error,
        })
    }
}

/// Drop the `Z` coordinate of board points, which must all lie on `Z = 0`.
fn board_plane(objects: &[Point3<f64>]) -> Option<Vec<Point2<f64>>> {
    objects
        .iter()
        .map(|p| (p.z.abs() <= 1e-9).then(|| Point2::new(p.x, p.y)))
        .collect()
}

fn nominal_focal(image_size: ImageSize) -> f64 {
    (image_size.width.max(image_size.height).max(1)) as f64
}

/// Homography re-expressed around the image centre and scaled by a
/// nominal focal length, so the intrinsic constraints are well conditioned.
fn centred(h: &Matrix3<f64>, centre: (f64, f64), nominal: f64) -> Matrix3<f64> {
    let shift = Matrix3::new(
        1.0 / nominal,
        0.0,
        -centre.0 / nominal,
        0.0,
        1.0 / nominal,
        -centre.1 / nominal,
        0.0,
        0.0,
        1.0,
    );
    let g = shift * h;
    let norm = g.norm();
    if norm > 0.0 {
        g / norm
    } else {
        g
    }
}

/// Focal lengths with the principal point held at `centre` and zero skew.
///
/// With `K = diag(a, b, 1)` after centring, each view gives two linear
/// constraints on `B = diag(1/a^2, 1/b^2, 1)` up to scale.
fn focal_with_fixed_centre(
    homographies: &[Matrix3<f64>],
    centre: (f64, f64),
    nominal: f64,
) -> Result<(f64, f64), SolverFailure> {
    let mut vtv = Matrix3::<f64>::zeros();
    for h in homographies {
        let g = centred(h, centre, nominal);
        let (h1, h2) = (g.column(0), g.column(1));
        let rows = [
            Vector3::new(h1[0] * h2[0], h1[1] * h2[1], h1[2] * h2[2]),
            Vector3::new(
                h1[0] * h1[0] - h2[0] * h2[0],
                h1[1] * h1[1] - h2[1] * h2[1],
                h1[2] * h1[2] - h2[2] * h2[2],
            ),
        ];
        for row in &rows {
            vtv += row * row.transpose();
        }
    }

    let b = smallest_eigenvector(3, vtv.as_slice());
    let (b11, b22, b33) = (b[0], b[1], b[2]);
    let ax = b33 / b11;
    let ay = b33 / b22;
    if !(ax.is_finite() && ay.is_finite() && ax > 0.0 && ay > 0.0) {
        return Err(SolverFailure::DegenerateGeometry(
            "board poses do not constrain the focal length".to_string(),
        ));
    }
    Ok((nominal * ax.sqrt(), nominal * ay.sqrt()))
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Full closed-form intrinsics (focal lengths and principal point).
///
/// Skew is estimated but discarded.
fn zhang_intrinsics(
    homographies: &[Matrix3<f64>],
    centre: (f64, f64),
    nominal: f64,
) -> Result<CameraModel, SolverFailure> {
    let mut vtv = SMatrix::<f64, 6, 6>::zeros();
    for h in homographies {
        let g = centred(h, centre, nominal);
        let v12 = v_ij(&g, 0, 1);
        let d = v_ij(&g, 0, 0) - v_ij(&g, 1, 1);
        vtv += v12 * v12.transpose();
        vtv += d * d.transpose();
    }

    let b = smallest_eigenvector(6, vtv.as_slice());
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let degenerate = || {
        SolverFailure::DegenerateGeometry("board poses do not constrain the intrinsics".to_string())
    };
    let denom = b11 * b22 - b12 * b12;
    if denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) {
        return Err(degenerate());
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha2 = lambda / b11;
    let beta2 = lambda * b11 / denom;
    if !(alpha2 > 0.0 && beta2 > 0.0) {
        return Err(degenerate());
    }
    let alpha = alpha2.sqrt();
    let beta = beta2.sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(CameraModel::pinhole(
        nominal * alpha,
        nominal * beta,
        centre.0 + nominal * u0,
        centre.1 + nominal * v0,
    ))
}

/// Linear least-squares estimate of k1, k2 (and p1, p2 unless fixed) from
/// the residuals of the current pinhole model. Leaves the model untouched
/// if the system is singular.
fn fit_distortion(
    model: &mut CameraModel,
    poses: &[Isometry3<f64>],
    object_points: &[&[Point3<f64>]],
    image_points: &[&[Point2<f64>]],
    fix_tangential: bool,
) {
    let cols = if fix_tangential { 2 } else { 4 };
    let mut ata = DMatrix::<f64>::zeros(cols, cols);
    let mut atb = DVector::<f64>::zeros(cols);

    for ((pose, objects), images) in poses.iter().zip(object_points).zip(image_points) {
        for (object, image) in objects.iter().zip(images.iter()) {
            let pc = pose * object;
            if pc.z <= f64::EPSILON {
                continue;
            }
            let (x, y) = (pc.x / pc.z, pc.y / pc.z);
            let observed = model.pixel_to_normalized(image);
            let r2 = x * x + y * y;
            let rows = [
                ([x * r2, x * r2 * r2, 2.0 * x * y, r2 + 2.0 * x * x], observed.x - x),
                ([y * r2, y * r2 * r2, r2 + 2.0 * y * y, 2.0 * x * y], observed.y - y),
            ];
            for (row, rhs) in &rows {
                for i in 0..cols {
                    atb[i] += row[i] * rhs;
                    for j in 0..cols {
                        ata[(i, j)] += row[i] * row[j];
                    }
                }
            }
        }
    }

    let Some(solution) = ata.cholesky().map(|c| c.solve(&atb)) else {
        log::debug!("Distortion fit is singular, starting from zero distortion");
        return;
    };
    if solution.iter().any(|v| !v.is_finite()) {
        return;
    }
    model.k1 = solution[0];
    model.k2 = solution[1];
    if !fix_tangential {
        model.p1 = solution[2];
        model.p2 = solution[3];
    }
}

/// Which intrinsic parameters are free during refinement.
///
/// Parameter vector: `fx, fy, [cx, cy], k1, k2, [p1, p2]`, then per view a
/// rotation vector and a translation.
#[derive(Debug, Clone, Copy)]
struct Layout {
    free_centre: bool,
    free_tangential: bool,
}

impl Layout {
    fn intrinsic_len(&self) -> usize {
        4 + if self.free_centre { 2 } else { 0 } + if self.free_tangential { 2 } else { 0 }
    }

    fn pack(&self, model: &CameraModel, poses: &[Isometry3<f64>]) -> DVector<f64> {
        let mut params = Vec::with_capacity(self.intrinsic_len() + 6 * poses.len());
        params.extend([model.fx, model.fy]);
        if self.free_centre {
            params.extend([model.cx, model.cy]);
        }
        params.extend([model.k1, model.k2]);
        if self.free_tangential {
            params.extend([model.p1, model.p2]);
        }
        for pose in poses {
            let r = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            params.extend([r.x, r.y, r.z, t.x, t.y, t.z]);
        }
        DVector::from_vec(params)
    }

    fn model(&self, params: &DVector<f64>, fixed: &CameraModel) -> CameraModel {
        let mut model = *fixed;
        model.fx = params[0];
        model.fy = params[1];
        let mut i = 2;
        if self.free_centre {
            model.cx = params[2];
            model.cy = params[3];
            i = 4;
        }
        model.k1 = params[i];
        model.k2 = params[i + 1];
        if self.free_tangential {
            model.p1 = params[i + 2];
            model.p2 = params[i + 3];
        }
        model
    }

    fn pose(&self, params: &DVector<f64>, view: usize) -> Isometry3<f64> {
        let o = self.intrinsic_len() + 6 * view;
        Isometry3::from_parts(
            Translation3::new(params[o + 3], params[o + 4], params[o + 5]),
            UnitQuaternion::from_scaled_axis(Vector3::new(params[o], params[o + 1], params[o + 2])),
        )
    }
}

/// Residual assigned to each coordinate of a point behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

/// Joint reprojection problem over the intrinsics and every board pose.
struct Problem<'a> {
    layout: Layout,
    /// Supplies the values of parameters that are not refined.
    fixed: CameraModel,
    object_points: &'a [&'a [Point3<f64>]],
    image_points: &'a [&'a [Point2<f64>]],
    params: DVector<f64>,
    /// One Jacobian is evaluated per iteration.
    max_jacobians: usize,
    jacobians: Cell<usize>,
}

/// Refined parameters and whether the optimizer converged.
struct Refinement {
    model: CameraModel,
    poses: Vec<Isometry3<f64>>,
    converged: bool,
}

impl Problem<'_> {
    fn residual_len(&self) -> usize {
        2 * self.image_points.iter().map(|v| v.len()).sum::<usize>()
    }

    /// Pixel residuals at `params`.
    fn residuals_at(&self, params: &DVector<f64>) -> DVector<f64> {
        let model = self.layout.model(params, &self.fixed);
        let mut out = DVector::zeros(self.residual_len());
        let mut row = 0;
        for (view, (objects, images)) in self.object_points.iter().zip(self.image_points).enumerate() {
            let pose = self.layout.pose(params, view);
            for (object, image) in objects.iter().zip(images.iter()) {
                let (dx, dy) = match model.project_board(&pose, object) {
                    Some(predicted) => (predicted.x - image.x, predicted.y - image.y),
                    None => (BEHIND_CAMERA_RESIDUAL, BEHIND_CAMERA_RESIDUAL),
                };
                out[row] = dx;
                out[row + 1] = dy;
                row += 2;
            }
        }
        out
    }

    /// Forward-difference Jacobian of the residuals.
    fn jacobian_at(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let base = self.residuals_at(params);
        let mut j = DMatrix::zeros(base.len(), params.len());
        let mut shifted = params.clone();
        for k in 0..params.len() {
            let step = 1e-7 * (1.0 + params[k].abs());
            shifted[k] = params[k] + step;
            j.set_column(k, &((self.residuals_at(&shifted) - &base) / step));
            shifted[k] = params[k];
        }
        j
    }

    /// Levenberg-Marquardt over all free parameters.
    fn refine(
        layout: Layout,
        fixed: CameraModel,
        object_points: &[&[Point3<f64>]],
        image_points: &[&[Point2<f64>]],
        poses: &[Isometry3<f64>],
        max_iterations: usize,
    ) -> Refinement {
        let problem = Problem {
            layout,
            fixed,
            object_points,
            image_points,
            params: layout.pack(&fixed, poses),
            max_jacobians: max_iterations,
            jacobians: Cell::new(0),
        };

        let lm = LevenbergMarquardt::new()
            .with_ftol(1e-10)
            .with_xtol(1e-10)
            .with_gtol(1e-10)
            .with_patience(max_iterations.max(1));
        let (problem, report) = lm.minimize(problem);

        log::debug!(
            "Refinement finished after {} iterations and {} evaluations: {:?}, cost {:.3e}",
            problem.jacobians.get(),
            report.number_of_evaluations,
            report.termination,
            report.objective_function
        );
        Refinement {
            model: layout.model(&problem.params, &fixed),
            poses: (0..poses.len())
                .map(|view| layout.pose(&problem.params, view))
                .collect(),
            converged: report.termination.was_successful(),
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for Problem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let done = self.jacobians.get();
        if done >= self.max_jacobians {
            return None;
        }
        self.jacobians.set(done + 1);
        Some(self.jacobian_at(&self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternSpec;
    use crate::synthetic::{board_poses, VirtualCamera};

    const SIZE: ImageSize = ImageSize {
        width: 640,
        height: 480,
    };

    fn camera() -> VirtualCamera {
        let (cx, cy) = SIZE.center();
        VirtualCamera {
            model: CameraModel {
                k1: -0.08,
                k2: 0.015,
                ..CameraModel::pinhole(800.0, 790.0, cx, cy)
            },
            image_size: SIZE,
        }
    }

    fn views(count: usize) -> (Vec<Vec<Point3<f64>>>, Vec<Vec<Point2<f64>>>) {
        let pattern = PatternSpec::new(7, 5, 0.035).unwrap();
        let reference = pattern.reference_points();
        let cam = camera();
        let mut objects = Vec::new();
        let mut images = Vec::new();
        for pose in board_poses(&pattern, count) {
            let projected = cam.observe(&pose, &reference).unwrap();
            objects.push(reference.to_vec());
            images.push(projected);
        }
        (objects, images)
    }

    fn slices<T>(v: &[Vec<T>]) -> Vec<&[T]> {
        v.iter().map(|x| x.as_slice()).collect()
    }

    #[test]
    fn test_recovers_synthetic_camera() {
        let (objects, images) = views(8);
        let solution = PlanarIntrinsicSolver::default()
            .calibrate_single_camera(&slices(&objects), &slices(&images), SIZE, SolverFlags::default())
            .unwrap();

        assert!((solution.fx() - 800.0).abs() < 0.5, "fx = {}", solution.fx());
        assert!((solution.fy() - 790.0).abs() < 0.5, "fy = {}", solution.fy());
        assert_eq!(solution.cx(), 319.5);
        assert_eq!(solution.cy(), 239.5);
        assert!((solution.distortion[0] + 0.08).abs() < 5e-3);
        assert_eq!(solution.distortion[2], 0.0);
        assert_eq!(solution.distortion[3], 0.0);
        assert_eq!(solution.distortion.len(), 5);
        assert!(solution.reprojection_error < 1e-3);
    }

    #[test]
    fn test_free_principal_point() {
        let (objects, images) = views(10);
        let flags = SolverFlags {
            fix_principal_point: false,
            fix_tangential_distortion: true,
        };
        let solution = PlanarIntrinsicSolver::default()
            .calibrate_single_camera(&slices(&objects), &slices(&images), SIZE, flags)
            .unwrap();
        assert!((solution.fx() - 800.0).abs() < 2.0);
        assert!((solution.cx() - 319.5).abs() < 2.0);
        assert!((solution.cy() - 239.5).abs() < 2.0);
        assert!(solution.reprojection_error < 1e-2);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let (objects, images) = views(8);
        for max_iterations in [0, 1] {
            let result = PlanarIntrinsicSolver { max_iterations }.calibrate_single_camera(
                &slices(&objects),
                &slices(&images),
                SIZE,
                SolverFlags::default(),
            );
            match result {
                Err(SolverFailure::NonConvergence { reprojection_error }) => {
                    assert!(reprojection_error.is_finite());
                    assert!(reprojection_error > 0.0);
                }
                other => panic!("max_iterations = {}: {:?}", max_iterations, other),
            }
        }
    }

    #[test]
    fn test_refinement_improves_on_closed_form() {
        let (objects, images) = views(8);
        let capped = PlanarIntrinsicSolver { max_iterations: 0 }.calibrate_single_camera(
            &slices(&objects),
            &slices(&images),
            SIZE,
            SolverFlags::default(),
        );
        let Err(SolverFailure::NonConvergence {
            reprojection_error: initial,
        }) = capped
        else {
            panic!("expected non-convergence, got {:?}", capped);
        };
        let refined = PlanarIntrinsicSolver::default()
            .calibrate_single_camera(&slices(&objects), &slices(&images), SIZE, SolverFlags::default())
            .unwrap();
        assert!(refined.reprojection_error < initial);
    }

    #[test]
    fn test_too_few_views_is_a_failure_not_a_zero_matrix() {
        let (objects, images) = views(2);
        let result = PlanarIntrinsicSolver::default().calibrate_single_camera(
            &slices(&objects),
            &slices(&images),
            SIZE,
            SolverFlags::default(),
        );
        assert_eq!(
            result,
            Err(SolverFailure::InsufficientViews {
                got: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_non_planar_objects_rejected() {
        let (mut objects, images) = views(3);
        objects[1][0].z = 0.01;
        let result = PlanarIntrinsicSolver::default().calibrate_single_camera(
            &slices(&objects),
            &slices(&images),
            SIZE,
            SolverFlags::default(),
        );
        assert!(matches!(result, Err(SolverFailure::DegenerateGeometry(_))));
    }
}
