//! Board pose from a plane-induced homography.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Decompose `H = K [r1 r2 t]` into the pose of a `Z = 0` board.
///
/// The scale sign is chosen so that the board lies in front of the camera.
/// Returns `None` when `K` is singular or `H` is degenerate.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let k_inv = k.try_inverse()?;
    let a1 = k_inv * h.column(0);
    let a2 = k_inv * h.column(1);
    let a3 = k_inv * h.column(2);

    let mean_norm = (a1.norm() + a2.norm()) * 0.5;
    if mean_norm <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / mean_norm;
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = a1 * lambda;
    let r2 = a2 * lambda;
    let r3 = r1.cross(&r2);
    let t: Vector3<f64> = a3 * lambda;

    let rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some(Isometry3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

/// Project a 3x3 matrix onto SO(3) (polar decomposition via SVD).
pub fn nearest_rotation(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}
