//! Polynomial displacement field over image position and wavelength.
//!
//! ```text
//! u = (x − cx) / s,  v = (y − cy) / s,  w = (λ − λ_ref) / s_λ
//! dx = s · Σ a_pqr · u^p v^q w^r
//! dy = s · Σ b_pqr · u^p v^q w^r       (p + q ≤ spatial, r ≤ spectral)
//! ```
//!
//! With `anchor_reference` only terms with `r ≥ 1` are used, so the
//! displacement vanishes identically at the reference wavelength.

use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};

/// Maximum fixed-point iterations in [`DispersionModel::inverse_map`].
const INVERSE_MAX_ITERS: usize = 50;
/// Convergence threshold of the inverse map (pixels).
const INVERSE_TOL_PX: f64 = 1e-10;

/// One observed disk position at a given wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionSample {
    /// Position in the reference-wavelength frame `[x, y]`.
    pub reference: [f64; 2],
    pub wavelength_nm: f64,
    /// Position observed at `wavelength_nm`.
    pub observed: [f64; 2],
}

/// Exponents `[p, q, r]` of `u^p v^q w^r`, ordered by total spatial degree,
/// then decreasing `p`, then spectral degree.
pub(crate) fn term_exponents(spatial: u32, spectral: u32, anchor: bool) -> Vec<[u32; 3]> {
    let r_min = u32::from(anchor);
    let mut terms = Vec::new();
    for s in 0..=spatial {
        for p in (0..=s).rev() {
            for r in r_min..=spectral {
                terms.push([p, s - p, r]);
            }
        }
    }
    terms
}

/// Fitted dispersion model; maps reference-frame pixels to their position at
/// another wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionModel {
    pub center: [f64; 2],
    pub spatial_scale: f64,
    pub reference_nm: f64,
    pub spectral_scale: f64,
    pub spatial_degree: u32,
    pub spectral_degree: u32,
    pub anchor_reference: bool,
    pub terms: Vec<[u32; 3]>,
    pub coeffs_x: Vec<f64>,
    pub coeffs_y: Vec<f64>,
}

impl DispersionModel {
    /// Model with no displacement for an image of `image_size = [width, height]`.
    pub fn identity(image_size: [usize; 2], reference_nm: f64) -> Self {
        let (center, spatial_scale) = frame(image_size);
        Self {
            center,
            spatial_scale,
            reference_nm,
            spectral_scale: 100.0,
            spatial_degree: 0,
            spectral_degree: 0,
            anchor_reference: true,
            terms: Vec::new(),
            coeffs_x: Vec::new(),
            coeffs_y: Vec::new(),
        }
    }

    /// Structural consistency, e.g. after loading from JSON.
    pub fn validate(&self) -> Result<()> {
        if self.coeffs_x.len() != self.terms.len() || self.coeffs_y.len() != self.terms.len() {
            return Err(ChromaError::mismatch(
                "dispersion coefficients",
                self.terms.len(),
                (self.coeffs_x.len(), self.coeffs_y.len()),
            ));
        }
        if !(self.spatial_scale > 0.0 && self.spectral_scale > 0.0) {
            return Err(ChromaError::invalid("dispersion scales must be > 0"));
        }
        let all_finite = self
            .coeffs_x
            .iter()
            .chain(&self.coeffs_y)
            .chain(&self.center)
            .all(|v| v.is_finite());
        if !all_finite || !self.reference_nm.is_finite() {
            return Err(ChromaError::invalid("dispersion model has non-finite values"));
        }
        Ok(())
    }

    pub fn is_identity(&self) -> bool {
        self.coeffs_x.iter().chain(&self.coeffs_y).all(|&c| c == 0.0)
    }

    /// Normalised coordinates `(u, v, w)`.
    pub(crate) fn normalize(&self, p: [f64; 2], wavelength_nm: f64) -> [f64; 3] {
        [
            (p[0] - self.center[0]) / self.spatial_scale,
            (p[1] - self.center[1]) / self.spatial_scale,
            (wavelength_nm - self.reference_nm) / self.spectral_scale,
        ]
    }

    /// Displacement `[dx, dy]` (pixels) of reference point `p` at `wavelength_nm`.
    pub fn displacement(&self, p: [f64; 2], wavelength_nm: f64) -> [f64; 2] {
        let uvw = self.normalize(p, wavelength_nm);
        let (mut dx, mut dy) = (0.0, 0.0);
        for ((t, cx), cy) in self.terms.iter().zip(&self.coeffs_x).zip(&self.coeffs_y) {
            let m = monomial(uvw, *t);
            dx += cx * m;
            dy += cy * m;
        }
        [dx * self.spatial_scale, dy * self.spatial_scale]
    }

    /// Where reference-frame point `p` appears at `wavelength_nm`.
    pub fn map(&self, p: [f64; 2], wavelength_nm: f64) -> [f64; 2] {
        let d = self.displacement(p, wavelength_nm);
        [p[0] + d[0], p[1] + d[1]]
    }

    /// Reference-frame point that appears at `q` for `wavelength_nm`.
    ///
    /// Solves `p + d(p) = q` by fixed-point iteration; `None` if it does not
    /// converge, which happens when the displacement field is not contractive.
    pub fn inverse_map(&self, q: [f64; 2], wavelength_nm: f64) -> Option<[f64; 2]> {
        let mut p = q;
        for _ in 0..INVERSE_MAX_ITERS {
            let d = self.displacement(p, wavelength_nm);
            let next = [q[0] - d[0], q[1] - d[1]];
            if !(next[0].is_finite() && next[1].is_finite()) {
                return None;
            }
            let step = (next[0] - p[0]).hypot(next[1] - p[1]);
            p = next;
            if step < INVERSE_TOL_PX {
                return Some(p);
            }
        }
        None
    }

    /// Largest displacement magnitude over the corners and centre of a
    /// `[width, height]` image.
    pub fn max_displacement(&self, image_size: [usize; 2], wavelength_nm: f64) -> f64 {
        let w = image_size[0].saturating_sub(1) as f64;
        let h = image_size[1].saturating_sub(1) as f64;
        [[0.0, 0.0], [w, 0.0], [0.0, h], [w, h], [0.5 * w, 0.5 * h]]
            .into_iter()
            .map(|p| {
                let d = self.displacement(p, wavelength_nm);
                d[0].hypot(d[1])
            })
            .fold(0.0, f64::max)
    }
}

/// Normalisation centre and scale for an image of `[width, height]`.
pub(crate) fn frame(image_size: [usize; 2]) -> ([f64; 2], f64) {
    let [w, h] = image_size;
    let center = [
        0.5 * w.saturating_sub(1) as f64,
        0.5 * h.saturating_sub(1) as f64,
    ];
    let scale = (0.5 * w.max(h) as f64).max(1.0);
    (center, scale)
}

pub(crate) fn monomial(uvw: [f64; 3], t: [u32; 3]) -> f64 {
    uvw[0].powi(t[0] as i32) * uvw[1].powi(t[1] as i32) * uvw[2].powi(t[2] as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shifting_model() -> DispersionModel {
        let mut model = DispersionModel::identity([200, 100], 550.0);
        model.spatial_degree = 1;
        model.spectral_degree = 1;
        model.terms = term_exponents(1, 1, true);
        // terms: [0,0,1], [1,0,1], [0,1,1]
        model.coeffs_x = vec![0.01, 0.02, 0.0];
        model.coeffs_y = vec![-0.005, 0.0, 0.01];
        model
    }

    #[test]
    fn term_layout() {
        assert_eq!(term_exponents(1, 1, true), vec![[0, 0, 1], [1, 0, 1], [0, 1, 1]]);
        assert_eq!(term_exponents(2, 2, false).len(), 6 * 3);
        assert_eq!(term_exponents(3, 0, true).len(), 0);
    }

    #[test]
    fn anchored_model_is_identity_at_reference() {
        let model = shifting_model();
        assert_eq!(model.displacement([13.0, 77.0], 550.0), [0.0, 0.0]);
        let d = model.displacement([model.center[0], model.center[1]], 650.0);
        assert_relative_eq!(d[0], 0.01 * 100.0, epsilon = 1e-12);
        assert_relative_eq!(d[1], -0.005 * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn inverse_undoes_map() {
        let model = shifting_model();
        for p in [[0.0, 0.0], [150.5, 20.25], [199.0, 99.0]] {
            for wl in [420.0, 500.0, 700.0] {
                let q = model.map(p, wl);
                let back = model.inverse_map(q, wl).expect("converges");
                assert_relative_eq!(back[0], p[0], epsilon = 1e-8);
                assert_relative_eq!(back[1], p[1], epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn expanding_field_fails_to_invert() {
        let mut model = shifting_model();
        model.coeffs_x = vec![0.0, 30.0, 0.0];
        assert!(model.inverse_map([150.0, 50.0], 650.0).is_none());
    }

    #[test]
    fn validate_checks_coefficient_count() {
        let mut model = shifting_model();
        model.validate().unwrap();
        model.coeffs_y.pop();
        assert!(model.validate().is_err());
    }

    #[test]
    fn identity_has_zero_displacement() {
        let model = DispersionModel::identity([64, 48], 550.0);
        assert!(model.is_identity());
        assert_eq!(model.max_displacement([64, 48], 700.0), 0.0);
        assert_eq!(model.map([3.0, 4.0], 700.0), [3.0, 4.0]);
    }
}
