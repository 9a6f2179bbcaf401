use std::ops::Range;

use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};

use super::operator::ImagingOperator;
use crate::color::ColorWeights;
use crate::dispersion::DispersionModel;
use crate::error::{ChromaError, Result};
use crate::mosaic::BayerPattern;
use crate::{Cube, Plane};

/// Captured image the reconstruction has to explain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    /// Single-plane Bayer mosaic.
    Raw { plane: Plane, pattern: BayerPattern },
    /// Fully sampled (e.g. demosaiced) channels.
    Rgb { cube: Cube },
}

impl Observation {
    /// `(height, width)`.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Raw { plane, .. } => plane.dim(),
            Self::Rgb { cube } => {
                let (h, w, _) = cube.dim();
                (h, w)
            }
        }
    }

    pub fn pattern(&self) -> Option<BayerPattern> {
        match self {
            Self::Raw { pattern, .. } => Some(*pattern),
            Self::Rgb { .. } => None,
        }
    }

    /// Flattened observation over `rows × cols`, matching the output layout
    /// of [`ImagingOperator`].
    pub(crate) fn window(&self, rows: Range<usize>, cols: Range<usize>) -> Vec<f64> {
        match self {
            Self::Raw { plane, .. } => plane
                .slice(s![rows, cols])
                .iter()
                .copied()
                .collect(),
            Self::Rgb { cube } => cube
                .slice(s![rows, cols, ..])
                .iter()
                .copied()
                .collect(),
        }
    }

    fn values_finite(&self) -> bool {
        match self {
            Self::Raw { plane, .. } => plane.iter().all(|v| v.is_finite()),
            Self::Rgb { cube } => cube.iter().all(|v| v.is_finite()),
        }
    }
}

/// Per-band dispersion applied by the forward model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralWarp {
    pub model: DispersionModel,
    /// Centre wavelength of every latent band.
    pub wavelengths_nm: Vec<f64>,
}

/// Everything [`solve_patches`](super::solve_patches) needs besides solver
/// settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionProblem {
    pub observation: Observation,
    pub weights: ColorWeights,
    #[serde(default)]
    pub dispersion: Option<SpectralWarp>,
}

impl ReconstructionProblem {
    pub fn validate(&self) -> Result<()> {
        let (h, w) = self.observation.dim();
        if h == 0 || w == 0 {
            return Err(ChromaError::invalid("observation is empty"));
        }
        if !self.observation.values_finite() {
            return Err(ChromaError::invalid("observation contains non-finite values"));
        }
        let channels = self.weights.channels();
        match &self.observation {
            Observation::Raw { .. } if channels != 3 => {
                return Err(ChromaError::mismatch("RAW weight channels", 3, channels));
            }
            Observation::Rgb { cube } if cube.len_of(Axis(2)) != channels => {
                return Err(ChromaError::mismatch(
                    "observation channels",
                    channels,
                    cube.len_of(Axis(2)),
                ));
            }
            _ => {}
        }
        if let Some(warp) = &self.dispersion {
            warp.model.validate()?;
            if warp.wavelengths_nm.len() != self.weights.bands() {
                return Err(ChromaError::mismatch(
                    "band wavelengths",
                    self.weights.bands(),
                    warp.wavelengths_nm.len(),
                ));
            }
        }
        Ok(())
    }

    pub fn bands(&self) -> usize {
        self.weights.bands()
    }

    /// Forward model over the window starting at `origin = [row, col]`.
    pub fn operator(&self, origin: [usize; 2], size: [usize; 2]) -> ImagingOperator {
        ImagingOperator::new(
            &self.weights,
            self.observation.pattern(),
            self.dispersion.as_ref(),
            origin,
            size,
        )
    }
}
