//! Real eigenpairs of small non-symmetric matrices.

use std::f64::consts::PI;

use nalgebra::{Matrix3, Vector3};

/// Eigenvector of `m` whose eigenvalue has the smallest magnitude among the
/// eigenvectors satisfying the ellipse constraint `4 v₀ v₂ − v₁² > 0`.
///
/// `m` is the reduced scatter system `C₁⁻¹ (S₁ − S₂ S₃⁻¹ S₂ᵀ)` of the direct
/// ellipse fit. It is not symmetric, so eigenvalues come from the
/// characteristic cubic and eigenvectors from the adjugate of `m − λI`.
pub(super) fn elliptic_eigenvector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
        + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for lambda in real_cubic_roots(-trace, minors, -det) {
        let Some(v) = null_vector(&(m - Matrix3::identity() * lambda)) else {
            continue;
        };
        if 4.0 * v[0] * v[2] - v[1] * v[1] <= 0.0 {
            continue;
        }
        match &best {
            Some((l, _)) if *l <= lambda.abs() => {}
            _ => best = Some((lambda.abs(), v)),
        }
    }
    best.map(|(_, v)| v)
}

/// Unit null vector of a rank-2 matrix from its largest adjugate row.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let r0 = m.row(0).transpose();
    let r1 = m.row(1).transpose();
    let r2 = m.row(2).transpose();
    // Cross products of row pairs span the null space of a rank-2 matrix.
    let candidates = [r1.cross(&r2), r2.cross(&r0), r0.cross(&r1)];
    let best = candidates
        .iter()
        .max_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()))?;
    let n2 = best.norm_squared();
    if n2 < 1e-30 {
        return None;
    }
    Some(best / n2.sqrt())
}

/// Real roots of the monic cubic `x³ + b x² + c x + d`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let shift = -b / 3.0;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = q * q / 4.0 + p * p * p / 27.0;

    if disc <= 0.0 {
        // Three real roots (trigonometric form).
        let r = (-p / 3.0).max(0.0).sqrt();
        if r < 1e-300 {
            return vec![shift];
        }
        let phi = (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| 2.0 * r * ((phi + 2.0 * PI * k as f64) / 3.0).cos() + shift)
            .collect()
    } else {
        let s = disc.sqrt();
        vec![(-q / 2.0 + s).cbrt() + (-q / 2.0 - s).cbrt() + shift]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cubic_with_three_roots() {
        // (x - 1)(x - 2)(x + 3) = x³ − 7x + 6
        let mut roots = real_cubic_roots(0.0, -7.0, 6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], -3.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn cubic_with_one_root() {
        // (x - 2)(x² + 1) = x³ − 2x² + x − 2
        let roots = real_cubic_roots(-2.0, 1.0, -2.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn null_vector_of_singular_matrix() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);
        let v = null_vector(&m).expect("rank 2");
        assert!((m * v).norm() < 1e-9);
    }
}
