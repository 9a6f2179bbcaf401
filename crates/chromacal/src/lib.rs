//! chromacal: chromatic aberration calibration and spectral reconstruction.
//!
//! The crate covers the full calibration loop for dispersive imaging systems:
//!
//! 1. **Raytrace** – closed-form sphere intersections through a lens stack,
//!    spot diagrams and irradiance density per wavelength.
//! 2. **Disk** – threshold → morphological cleanup → connected components →
//!    ellipse fit on images of a disk calibration target.
//! 3. **Dispersion** – polynomial model over (x, y, λ) mapping reference-frame
//!    pixels to their position at another wavelength; image correction.
//! 4. **Color** / **Mosaic** – spectral sampling, camera weight matrices, Bayer
//!    mosaicking and baseline demosaicking.
//! 5. **Admm** – patch-wise ADMM reconstruction of a latent spectral cube from
//!    a RAW or RGB capture with L1 / L2 / non-negativity priors.
//! 6. **Regularization** – weight grid search over the ADMM priors with
//!    L-hypersurface, Pareto-front and minimum-distance-function analysis.
//! 7. **Evaluate** – metrics and CSV evaluation tables against ground truth.
//!
//! Images are `ndarray` arrays indexed `[row, col]` ([`Plane`]) or
//! `[row, col, band]` ([`Cube`]). Pixel coordinates are `[x, y]` with pixel
//! centres at integer positions.

pub mod admm;
pub mod color;
mod conic;
pub mod disk;
pub mod dispersion;
mod error;
pub mod evaluate;
pub mod io;
pub mod mosaic;
mod numeric;
pub mod raytrace;
pub mod regularization;

#[cfg(test)]
pub(crate) mod test_utils;

pub use admm::{
    objective_terms, solve_admm, solve_patches, AdmmConfig, AdmmResult, ImagingOperator,
    LinearOperator, Norm, Observation, PatchConfig, PatchSolution, Prior, PriorKind,
    ReconstructionProblem, SpectralWarp,
};
pub use color::{ColorWeights, SensitivityCurve, SpectralSampling, WeightNormalization};
pub use conic::{fit_conic_direct, fit_ellipse_direct, rms_sampson_distance, ConicCoeffs, Ellipse};
pub use disk::{fit_disks, fit_disks_per_channel, DiskFit, DiskFitConfig};
pub use dispersion::{
    correct_image, fit_dispersion, DispersionFitConfig, DispersionFitStats, DispersionModel,
    DispersionSample,
};
pub use error::{ChromaError, Result};
pub use evaluate::{evaluate_demosaicking, EvaluationRow, EvaluationTable, Metrics};
pub use mosaic::{demosaic, mosaic, BayerPattern, DemosaicMethod};
pub use raytrace::{
    best_focus, irradiance, trace_spectrum, trace_spot, Glass, IrradianceConfig, LensSystem,
    RaySampling, Source, SpotDiagram, Surface, TraceConfig,
};
pub use regularization::{
    grid_search, lcurve_corner, logspace, minimum_distance_index, pareto_front, GridSearchConfig,
    GridSearchReport, LPoint,
};

/// Single-channel image indexed `[row, col]`.
pub type Plane = ndarray::Array2<f64>;

/// Multi-channel image indexed `[row, col, band]`.
pub type Cube = ndarray::Array3<f64>;
