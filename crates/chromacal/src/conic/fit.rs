//! Direct least-squares ellipse fitting.

use nalgebra::{DMatrix, Matrix3, Vector3};

use super::eigen::elliptic_eigenvector;
use super::types::{ConicCoeffs, Ellipse};

/// Fit a conic constrained to be an ellipse (Fitzgibbon et al. 1999, in the
/// block-reduced form of Halíř & Flusser 1998).
///
/// Points are centred and scaled to unit RMS radius √2 before building the
/// scatter matrix. Needs at least 6 points; returns `None` if the system is
/// singular or the result is not a proper ellipse.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < 6 {
        return None;
    }
    let norm = Normalization::of(points)?;

    let mut design = DMatrix::<f64>::zeros(points.len(), 6);
    for (i, p) in points.iter().enumerate() {
        let [x, y] = norm.apply(*p);
        design
            .row_mut(i)
            .copy_from_slice(&[x * x, x * y, y * y, x, y, 1.0]);
    }
    let scatter = design.transpose() * &design;
    let s1: Matrix3<f64> = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s2: Matrix3<f64> = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s3: Matrix3<f64> = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    let s3_inv = s3.try_inverse()?;
    let linear_from_quadratic = -s3_inv * s2.transpose();
    let reduced = s1 + s2 * linear_from_quadratic;

    // C₁⁻¹ for C₁ = [[0, 0, 2], [0, −1, 0], [2, 0, 0]].
    let c1_inv = Matrix3::new(0.0, 0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0, 0.0);
    let quadratic = elliptic_eigenvector(&(c1_inv * reduced))?;
    let linear: Vector3<f64> = linear_from_quadratic * quadratic;

    let conic = norm.denormalize([
        quadratic[0],
        quadratic[1],
        quadratic[2],
        linear[0],
        linear[1],
        linear[2],
    ]);
    if !conic.is_ellipse() {
        return None;
    }
    conic.to_ellipse()?;
    Some(conic)
}

/// Geometric form of [`fit_conic_direct`].
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// RMS Sampson distance of `points` to `ellipse` (0 for an empty set).
pub fn rms_sampson_distance(ellipse: &Ellipse, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f64 = points
        .iter()
        .map(|&[x, y]| ellipse.sampson_distance(x, y).powi(2))
        .sum();
    (sum / points.len() as f64).sqrt()
}

/// Similarity transform `x' = s (x − m)`.
struct Normalization {
    mx: f64,
    my: f64,
    s: f64,
}

impl Normalization {
    fn of(points: &[[f64; 2]]) -> Option<Self> {
        let n = points.len() as f64;
        let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
        let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
        let mean_r = points
            .iter()
            .map(|p| (p[0] - mx).hypot(p[1] - my))
            .sum::<f64>()
            / n;
        if !(mean_r > 1e-12) || !mx.is_finite() || !my.is_finite() {
            return None;
        }
        Some(Self {
            mx,
            my,
            s: std::f64::consts::SQRT_2 / mean_r,
        })
    }

    fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [(p[0] - self.mx) * self.s, (p[1] - self.my) * self.s]
    }

    /// Express a conic fitted in normalised coordinates in pixel coordinates.
    fn denormalize(&self, c: [f64; 6]) -> ConicCoeffs {
        let [a, b, cc, d, e, f] = c;
        let (mx, my, s) = (self.mx, self.my, self.s);
        let s2 = s * s;
        ConicCoeffs([
            a * s2,
            b * s2,
            cc * s2,
            -2.0 * a * s2 * mx - b * s2 * my + d * s,
            -b * s2 * mx - 2.0 * cc * s2 * my + e * s,
            a * s2 * mx * mx + b * s2 * mx * my + cc * s2 * my * my - d * s * mx - e * s * my + f,
        ])
    }
}
