//! Plane-to-image homographies by normalized DLT.

use nalgebra::{DMatrix, DVector, Matrix3, Point2, SMatrix, Vector3};

/// Hartley normalization: centroid to the origin, mean distance sqrt(2).
///
/// Returns `None` when every point coincides.
fn normalize_points(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t))
}

/// True when the points span a line or less.
pub(crate) fn is_collinear(points: &[Point2<f64>]) -> bool {
    let Some((normalized, _)) = normalize_points(points) else {
        return true;
    };
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in &normalized {
        sxx += p.x * p.x;
        sxy += p.x * p.y;
        syy += p.y * p.y;
    }
    // Smallest eigenvalue of the 2x2 scatter matrix against its trace.
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let disc = (trace * trace * 0.25 - det).max(0.0).sqrt();
    let smallest = trace * 0.5 - disc;
    smallest <= 1e-9 * trace
}

/// Estimate `H` with `image ~ H * plane`.
///
/// Needs at least four non-collinear correspondences; returns `None`
/// otherwise. The result is scaled so that `H[(2, 2)] == 1` when possible.
pub fn estimate_homography(plane: &[Point2<f64>], image: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if plane.len() < 4 || plane.len() != image.len() || is_collinear(plane) {
        return None;
    }

    let (plane_n, t_plane) = normalize_points(plane)?;
    let (image_n, t_image) = normalize_points(image)?;

    // Normal equations A^T A of the 2n x 9 DLT system.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in plane_n.iter().zip(&image_n) {
        let (x, y, u, v) = (p.x, p.y, q.x, q.y);
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for row in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let h = smallest_eigenvector(9, ata.as_slice());
    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let mut h_mat = t_image.try_inverse()? * h_n * t_plane;
    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }
    if h_mat.iter().all(|v| v.is_finite()) {
        Some(h_mat)
    } else {
        None
    }
}

/// Eigenvector of the smallest eigenvalue of a symmetric `n x n` matrix
/// given in column-major order.
pub(crate) fn smallest_eigenvector(n: usize, column_major: &[f64]) -> DVector<f64> {
    let eigen = DMatrix::from_column_slice(n, n, column_major).symmetric_eigen();
    let mut index = 0;
    for i in 1..n {
        if eigen.eigenvalues[i] < eigen.eigenvalues[index] {
            index = i;
        }
    }
    eigen.eigenvectors.column(index).into_owned()
}

/// Map a plane point through `h`.
pub fn apply_homography(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if v.z.abs() <= f64::EPSILON {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Vec<Point2<f64>> {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..3 {
                points.push(Point2::new(i as f64 * 0.03, j as f64 * 0.03));
            }
        }
        points
    }

    #[test]
    fn test_recovers_known_homography() {
        let truth = Matrix3::new(
            812.0, 35.0, 250.0, //
            -20.0, 790.0, 180.0, //
            0.15, -0.2, 1.0,
        );
        let plane = grid();
        let image: Vec<Point2<f64>> = plane
            .iter()
            .map(|p| apply_homography(&truth, p).unwrap())
            .collect();

        let h = estimate_homography(&plane, &image).unwrap();
        assert_relative_eq!(h, truth, epsilon = 1e-6, max_relative = 1e-6);
        for (p, q) in plane.iter().zip(&image) {
            let mapped = apply_homography(&h, p).unwrap();
            assert_relative_eq!(mapped, *q, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_minimal_four_points() {
        let plane = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let image = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        let h = estimate_homography(&plane, &image).unwrap();
        assert_relative_eq!(h[(0, 0)], 2.0, epsilon = 1e-9);
        assert_relative_eq!(h[(1, 1)], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let line: Vec<Point2<f64>> = (0..6).map(|i| Point2::new(i as f64, 0.0)).collect();
        assert!(is_collinear(&line));
        assert!(estimate_homography(&line, &line).is_none());

        let plane = grid();
        assert!(!is_collinear(&plane));
        assert!(estimate_homography(&plane[..3], &plane[..3]).is_none());
        assert!(estimate_homography(&plane, &plane[..5]).is_none());
    }
}
