//! Ellipse and conic representations.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use serde::{Deserialize, Serialize};

/// General conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as
/// `[A, B, C, D, E, F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Geometric ellipse in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Centre x (pixels).
    pub cx: f64,
    /// Centre y (pixels).
    pub cy: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Major-axis angle from +x in radians, in (−π/2, π/2].
    pub angle: f64,
}

impl ConicCoeffs {
    /// Value of the conic polynomial at `(x, y)`.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// `B² − 4AC < 0`.
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Geometric parameters, or `None` for degenerate / non-elliptic conics.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        // Fix the overall sign so the quadratic part is positive definite.
        let sign = if self.0[0] + self.0[2] < 0.0 { -1.0 } else { 1.0 };
        let [a, b, c, d, e, f] = self.0.map(|v| v * sign);
        let denom = 4.0 * a * c - b * b;
        if denom <= 0.0 {
            return None;
        }

        let cx = (b * e - 2.0 * c * d) / denom;
        let cy = (b * d - 2.0 * a * e) / denom;

        // Conic value at the centre; the ellipse is {q(x - c) = -f0}.
        let f0 = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
        if !f0.is_finite() || f0.abs() < 1e-15 {
            return None;
        }

        let mean = 0.5 * (a + c);
        let half_diff = 0.5 * ((a - c).powi(2) + b * b).sqrt();
        let lambda_major_dir = mean - half_diff;
        let lambda_minor_dir = mean + half_diff;

        let a_sq = -f0 / lambda_major_dir;
        let b_sq = -f0 / lambda_minor_dir;
        if !(a_sq > 0.0 && b_sq > 0.0) {
            return None;
        }

        // Orientation of the eigenvector with the smaller eigenvalue (major axis).
        let theta = if (a - c).abs() < 1e-15 && b.abs() < 1e-15 {
            0.0
        } else if (a - c).abs() < 1e-15 {
            if b > 0.0 {
                -FRAC_PI_4
            } else {
                FRAC_PI_4
            }
        } else {
            0.5 * b.atan2(a - c) + FRAC_PI_2
        };

        let ellipse = Ellipse {
            cx,
            cy,
            a: a_sq.sqrt(),
            b: b_sq.sqrt(),
            angle: wrap_half_pi(theta),
        };
        ellipse.is_valid().then_some(ellipse)
    }
}

impl Ellipse {
    /// Circle of radius `r` centred at `(cx, cy)`.
    pub fn circle(cx: f64, cy: f64, r: f64) -> Self {
        Self {
            cx,
            cy,
            a: r,
            b: r,
            angle: 0.0,
        }
    }

    /// Ellipse with the same second-order central moments as a uniformly
    /// filled region.
    ///
    /// `mxx`, `myy`, `mxy` are the (population) variances/covariance of the
    /// region's pixel coordinates. A filled ellipse with semi-axis `s` has
    /// variance `s² / 4` along that axis, hence `s = 2·sqrt(λ)`.
    pub fn from_second_moments(cx: f64, cy: f64, mxx: f64, myy: f64, mxy: f64) -> Option<Self> {
        let mean = 0.5 * (mxx + myy);
        let half_diff = (0.25 * (mxx - myy).powi(2) + mxy * mxy).sqrt();
        let l1 = mean + half_diff;
        let l2 = mean - half_diff;
        if !(l1 > 0.0 && l2 > 0.0) {
            return None;
        }
        let angle = if mxy.abs() < 1e-15 && (mxx - myy).abs() < 1e-15 {
            0.0
        } else {
            0.5 * (2.0 * mxy).atan2(mxx - myy)
        };
        let e = Self {
            cx,
            cy,
            a: 2.0 * l1.sqrt(),
            b: 2.0 * l2.sqrt(),
            angle: wrap_half_pi(angle),
        };
        e.is_valid().then_some(e)
    }

    /// Positive finite axes and finite centre/angle.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && [self.cx, self.cy, self.a, self.b, self.angle]
                .iter()
                .all(|v| v.is_finite())
    }

    /// `a / b` (≥ 1 for a canonical ellipse).
    pub fn aspect_ratio(&self) -> f64 {
        self.a.max(self.b) / self.a.min(self.b)
    }

    /// Centre as `[x, y]`.
    pub fn center(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// Enclosed area.
    pub fn area(&self) -> f64 {
        PI * self.a * self.b
    }

    /// General conic coefficients (scaled so that the boundary is `q = 0`
    /// with `q(centre) = −1`).
    pub fn to_conic(&self) -> ConicCoeffs {
        let (s, c) = self.angle.sin_cos();
        let ia2 = 1.0 / (self.a * self.a);
        let ib2 = 1.0 / (self.b * self.b);
        let qa = c * c * ia2 + s * s * ib2;
        let qb = 2.0 * c * s * (ia2 - ib2);
        let qc = s * s * ia2 + c * c * ib2;
        let qd = -2.0 * qa * self.cx - qb * self.cy;
        let qe = -qb * self.cx - 2.0 * qc * self.cy;
        let qf = qa * self.cx * self.cx + qb * self.cx * self.cy + qc * self.cy * self.cy - 1.0;
        ConicCoeffs([qa, qb, qc, qd, qe, qf])
    }

    /// `n` evenly spaced (in parameter) boundary points.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (s, c) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let (u, v) = (self.a * t.cos(), self.b * t.sin());
                [self.cx + c * u - s * v, self.cy + s * u + c * v]
            })
            .collect()
    }

    /// First-order geometric distance of `(x, y)` to the boundary.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let q = self.to_conic();
        let [a, b, c, d, e, _] = q.0;
        let value = q.algebraic_distance(x, y);
        let gx = 2.0 * a * x + b * y + d;
        let gy = b * x + 2.0 * c * y + e;
        let g2 = gx * gx + gy * gy;
        if g2 < 1e-30 {
            value.abs()
        } else {
            value.abs() / g2.sqrt()
        }
    }
}

fn wrap_half_pi(mut angle: f64) -> f64 {
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tilted() -> Ellipse {
        Ellipse {
            cx: 40.0,
            cy: -12.5,
            a: 18.0,
            b: 7.0,
            angle: 0.4,
        }
    }

    #[test]
    fn conic_conversion_recovers_parameters() {
        let e = tilted();
        let back = e.to_conic().to_ellipse().expect("ellipse");
        assert_relative_eq!(back.cx, e.cx, epsilon = 1e-9);
        assert_relative_eq!(back.cy, e.cy, epsilon = 1e-9);
        assert_relative_eq!(back.a, e.a, epsilon = 1e-9);
        assert_relative_eq!(back.b, e.b, epsilon = 1e-9);
        assert_relative_eq!(back.angle, e.angle, epsilon = 1e-9);
    }

    #[test]
    fn boundary_points_lie_on_conic() {
        let e = tilted();
        let q = e.to_conic();
        for [x, y] in e.sample_points(64) {
            assert!(q.algebraic_distance(x, y).abs() < 1e-10);
            assert!(e.sampson_distance(x, y) < 1e-8);
        }
    }

    #[test]
    fn hyperbola_is_rejected() {
        // x² − y² − 1 = 0
        let q = ConicCoeffs([1.0, 0.0, -1.0, 0.0, 0.0, -1.0]);
        assert!(!q.is_ellipse());
        assert!(q.to_ellipse().is_none());
    }

    #[test]
    fn moments_of_filled_ellipse_give_axes() {
        // Uniform filled ellipse: variance along a semi-axis s is s²/4.
        let (a, b, angle) = (10.0f64, 4.0f64, 0.3f64);
        let (s, c) = angle.sin_cos();
        let (va, vb) = (a * a / 4.0, b * b / 4.0);
        let mxx = c * c * va + s * s * vb;
        let myy = s * s * va + c * c * vb;
        let mxy = c * s * (va - vb);
        let e = Ellipse::from_second_moments(5.0, 6.0, mxx, myy, mxy).expect("valid");
        assert_relative_eq!(e.a, a, epsilon = 1e-9);
        assert_relative_eq!(e.b, b, epsilon = 1e-9);
        assert_relative_eq!(e.angle, angle, epsilon = 1e-9);
        assert_relative_eq!(e.center()[0], 5.0);
    }

    #[test]
    fn degenerate_moments_are_rejected() {
        assert!(Ellipse::from_second_moments(0.0, 0.0, 1.0, 0.0, 0.0).is_none());
    }
}
