use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};

/// Linear transform a prior penalises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    /// Forward differences along x and y within every band.
    SpatialGradient,
    /// Forward difference between neighbouring bands.
    SpectralGradient,
    /// The cube itself.
    Intensity,
}

impl PriorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::SpatialGradient => "spatial_gradient",
            Self::SpectralGradient => "spectral_gradient",
            Self::Intensity => "intensity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Norm {
    /// `‖v‖₁`
    L1,
    /// `‖v‖₂²`
    L2,
}

/// One regularisation term `weight · norm(kind(x))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub kind: PriorKind,
    pub norm: Norm,
    pub weight: f64,
}

impl Prior {
    pub fn new(kind: PriorKind, norm: Norm, weight: f64) -> Self {
        Self { kind, norm, weight }
    }

    /// Column label used in reports, e.g. `spatial_gradient_l1`.
    pub fn label(&self) -> String {
        let norm = match self.norm {
            Norm::L1 => "l1",
            Norm::L2 => "l2",
        };
        format!("{}_{}", self.kind.name(), norm)
    }
}

/// ADMM solver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmConfig {
    pub priors: Vec<Prior>,
    /// Project the solution onto `x ≥ 0`.
    pub non_negative: bool,
    /// Initial penalty parameter.
    pub rho: f64,
    pub max_iters: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Residual balancing: rescale `rho` when the primal and dual residuals
    /// differ by more than a factor of 10.
    pub adaptive_rho: bool,
    pub cg_max_iters: usize,
    /// Relative residual tolerance for the inner conjugate-gradient solve.
    pub cg_tol: f64,
    pub record_history: bool,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            priors: vec![
                Prior::new(PriorKind::SpatialGradient, Norm::L1, 0.01),
                Prior::new(PriorKind::SpectralGradient, Norm::L2, 0.01),
            ],
            non_negative: true,
            rho: 1.0,
            max_iters: 200,
            abs_tol: 1e-4,
            rel_tol: 1e-3,
            adaptive_rho: true,
            cg_max_iters: 25,
            cg_tol: 1e-6,
            record_history: false,
        }
    }
}

impl AdmmConfig {
    pub fn validate(&self, bands: usize) -> Result<()> {
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(ChromaError::invalid(format!("rho must be > 0, got {}", self.rho)));
        }
        if self.max_iters == 0 || self.cg_max_iters == 0 {
            return Err(ChromaError::invalid("iteration limits must be > 0"));
        }
        if !(self.abs_tol >= 0.0 && self.rel_tol >= 0.0) {
            return Err(ChromaError::invalid("abs_tol and rel_tol must be non-negative"));
        }
        if !(self.cg_tol > 0.0) {
            return Err(ChromaError::invalid(format!(
                "cg_tol must be positive, got {}",
                self.cg_tol
            )));
        }
        for (i, p) in self.priors.iter().enumerate() {
            if !(p.weight.is_finite() && p.weight >= 0.0) {
                return Err(ChromaError::invalid(format!(
                    "prior {} has invalid weight {}",
                    p.label(),
                    p.weight
                )));
            }
            if self.priors[..i].iter().any(|q| q.kind == p.kind) {
                return Err(ChromaError::invalid(format!(
                    "duplicate prior {}",
                    p.kind.name()
                )));
            }
            if p.kind == PriorKind::SpectralGradient && bands < 2 {
                return Err(ChromaError::invalid(
                    "spectral gradient prior needs at least two bands",
                ));
            }
        }
        Ok(())
    }

    /// Same settings with prior weights replaced, in prior order.
    pub fn with_weights(&self, weights: &[f64]) -> Result<Self> {
        if weights.len() != self.priors.len() {
            return Err(ChromaError::mismatch("prior weights", self.priors.len(), weights.len()));
        }
        let mut out = self.clone();
        for (p, &w) in out.priors.iter_mut().zip(weights) {
            p.weight = w;
        }
        Ok(out)
    }
}

/// Tiling of [`solve_patches`](super::solve_patches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Side of the written-back tile interior.
    pub patch_size: usize,
    /// Extra context solved around each tile and then discarded.
    pub padding: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_size: 64,
            padding: 8,
        }
    }
}

impl PatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(ChromaError::invalid("patch_size must be > 0"));
        }
        if self.padding >= self.patch_size {
            return Err(ChromaError::invalid(format!(
                "padding ({}) must be smaller than patch_size ({})",
                self.padding, self.patch_size
            )));
        }
        Ok(())
    }
}
