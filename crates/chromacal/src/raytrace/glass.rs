//! Wavelength-dependent refractive index.

use serde::{Deserialize, Serialize};

/// Optical medium behind a surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Glass {
    /// Dispersion-free medium.
    Constant { n: f64 },
    /// Three-term Sellmeier equation, `n² = 1 + Σ Bᵢ λ² / (λ² − Cᵢ)` with λ
    /// in micrometres.
    Sellmeier { b: [f64; 3], c: [f64; 3] },
}

/// Fraunhofer d, F and C lines (nm).
const LINE_D_NM: f64 = 587.5618;
const LINE_F_NM: f64 = 486.1327;
const LINE_C_NM: f64 = 656.2725;

impl Glass {
    /// Schott N-BK7 crown.
    pub fn n_bk7() -> Self {
        Self::Sellmeier {
            b: [1.039_612_12, 0.231_792_344, 1.010_469_45],
            c: [0.006_000_698_67, 0.020_017_914_4, 103.560_653],
        }
    }

    /// Schott F2 flint.
    pub fn f2() -> Self {
        Self::Sellmeier {
            b: [1.345_333_59, 0.209_073_176, 0.937_357_162],
            c: [0.009_977_438_71, 0.047_045_076_7, 111.886_764],
        }
    }

    /// Refractive index at `wavelength_nm`.
    pub fn refractive_index(&self, wavelength_nm: f64) -> f64 {
        match *self {
            Self::Constant { n } => n,
            Self::Sellmeier { b, c } => {
                let l2 = (wavelength_nm * 1e-3).powi(2);
                let sum: f64 = b.iter().zip(&c).map(|(bi, ci)| bi * l2 / (l2 - ci)).sum();
                (1.0 + sum).sqrt()
            }
        }
    }

    /// Abbe number `V_d = (n_d − 1) / (n_F − n_C)`; infinite for a
    /// dispersion-free medium.
    pub fn abbe_number(&self) -> f64 {
        let nd = self.refractive_index(LINE_D_NM);
        let spread = self.refractive_index(LINE_F_NM) - self.refractive_index(LINE_C_NM);
        if spread.abs() < 1e-15 {
            f64::INFINITY
        } else {
            (nd - 1.0) / spread
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bk7_catalogue_values() {
        let g = Glass::n_bk7();
        assert_relative_eq!(g.refractive_index(LINE_D_NM), 1.5168, epsilon = 2e-4);
        assert_relative_eq!(g.abbe_number(), 64.17, epsilon = 0.3);
    }

    #[test]
    fn flint_disperses_more_than_crown() {
        assert!(Glass::f2().abbe_number() < Glass::n_bk7().abbe_number());
        assert!(Glass::f2().refractive_index(LINE_D_NM) > 1.6);
    }

    #[test]
    fn normal_dispersion_decreases_with_wavelength() {
        let g = Glass::n_bk7();
        let mut prev = f64::INFINITY;
        for wl in (400..=700).step_by(25) {
            let n = g.refractive_index(wl as f64);
            assert!(n < prev);
            prev = n;
        }
    }

    #[test]
    fn constant_glass_has_no_dispersion() {
        let g = Glass::Constant { n: 1.5 };
        assert_eq!(g.refractive_index(450.0), 1.5);
        assert!(g.abbe_number().is_infinite());
    }
}
