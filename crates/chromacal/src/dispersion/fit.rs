//! Least-squares fit of the dispersion polynomial.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::model::{frame, monomial, term_exponents, DispersionModel, DispersionSample};
use crate::error::{ChromaError, Result};

/// Model structure for [`fit_dispersion`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionFitConfig {
    /// Maximum total degree in (x, y).
    pub spatial_degree: u32,
    /// Maximum degree in wavelength.
    pub spectral_degree: u32,
    /// Wavelength of the reference frame (nm).
    pub reference_nm: f64,
    /// Force zero displacement at `reference_nm`.
    pub anchor_reference: bool,
}

impl Default for DispersionFitConfig {
    fn default() -> Self {
        Self {
            spatial_degree: 3,
            spectral_degree: 2,
            reference_nm: 550.0,
            anchor_reference: true,
        }
    }
}

impl DispersionFitConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.reference_nm.is_finite() && self.reference_nm > 0.0) {
            return Err(ChromaError::invalid("reference_nm must be > 0"));
        }
        if self.spatial_degree > 8 || self.spectral_degree > 6 {
            return Err(ChromaError::invalid(format!(
                "polynomial degrees ({}, {}) are too high",
                self.spatial_degree, self.spectral_degree
            )));
        }
        if self.anchor_reference && self.spectral_degree == 0 {
            return Err(ChromaError::invalid(
                "anchor_reference needs spectral_degree >= 1",
            ));
        }
        Ok(())
    }

    pub fn n_terms(&self) -> usize {
        term_exponents(self.spatial_degree, self.spectral_degree, self.anchor_reference).len()
    }
}

/// Residuals of a dispersion fit (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionFitStats {
    pub n_samples: usize,
    pub n_terms: usize,
    pub rms_residual_px: f64,
    pub max_residual_px: f64,
}

/// Fit a [`DispersionModel`] for an image of `image_size = [width, height]`.
pub fn fit_dispersion(
    samples: &[DispersionSample],
    image_size: [usize; 2],
    config: &DispersionFitConfig,
) -> Result<(DispersionModel, DispersionFitStats)> {
    config.validate()?;
    if image_size[0] == 0 || image_size[1] == 0 {
        return Err(ChromaError::invalid("image size must be non-zero"));
    }
    let terms = term_exponents(
        config.spatial_degree,
        config.spectral_degree,
        config.anchor_reference,
    );
    if samples.len() < terms.len() {
        return Err(ChromaError::InsufficientData {
            needed: terms.len(),
            got: samples.len(),
        });
    }
    let finite = samples.iter().all(|s| {
        s.reference
            .iter()
            .chain(&s.observed)
            .chain(std::iter::once(&s.wavelength_nm))
            .all(|v| v.is_finite())
    });
    if !finite {
        return Err(ChromaError::invalid("dispersion samples contain non-finite values"));
    }

    let (center, spatial_scale) = frame(image_size);
    let spectral_scale = samples
        .iter()
        .map(|s| (s.wavelength_nm - config.reference_nm).abs())
        .fold(0.0, f64::max);
    let spectral_scale = if spectral_scale > 0.0 { spectral_scale } else { 1.0 };

    let mut model = DispersionModel {
        center,
        spatial_scale,
        reference_nm: config.reference_nm,
        spectral_scale,
        spatial_degree: config.spatial_degree,
        spectral_degree: config.spectral_degree,
        anchor_reference: config.anchor_reference,
        terms,
        coeffs_x: Vec::new(),
        coeffs_y: Vec::new(),
    };

    let n = samples.len();
    let m = model.terms.len();
    let mut design = DMatrix::<f64>::zeros(n, m);
    let mut rhs = DMatrix::<f64>::zeros(n, 2);
    for (i, s) in samples.iter().enumerate() {
        let uvw = model.normalize(s.reference, s.wavelength_nm);
        for (j, t) in model.terms.iter().enumerate() {
            design[(i, j)] = monomial(uvw, *t);
        }
        rhs[(i, 0)] = (s.observed[0] - s.reference[0]) / spatial_scale;
        rhs[(i, 1)] = (s.observed[1] - s.reference[1]) / spatial_scale;
    }

    let svd = design.svd(true, true);
    let sv_max = svd.singular_values.max();
    let eps = sv_max * 1e-12;
    let rank = svd.singular_values.iter().filter(|&&s| s > eps).count();
    if rank < m {
        tracing::warn!(
            "dispersion design is rank deficient ({} of {} terms); using minimum-norm solution",
            rank,
            m
        );
    }
    let solution = svd
        .solve(&rhs, eps)
        .map_err(|e| ChromaError::Numerical(format!("dispersion least squares: {e}")))?;
    model.coeffs_x = solution.column(0).iter().copied().collect();
    model.coeffs_y = solution.column(1).iter().copied().collect();

    let residuals: DVector<f64> = DVector::from_iterator(
        n,
        samples.iter().map(|s| {
            let q = model.map(s.reference, s.wavelength_nm);
            (q[0] - s.observed[0]).hypot(q[1] - s.observed[1])
        }),
    );
    let stats = DispersionFitStats {
        n_samples: n,
        n_terms: m,
        rms_residual_px: (residuals.norm_squared() / n as f64).sqrt(),
        max_residual_px: residuals.max(),
    };
    tracing::info!(
        "dispersion fit: {} samples, {} terms, rms {:.4} px, max {:.4} px",
        stats.n_samples,
        stats.n_terms,
        stats.rms_residual_px,
        stats.max_residual_px
    );
    Ok((model, stats))
}
