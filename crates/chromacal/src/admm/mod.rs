//! ADMM reconstruction of a latent spectral cube.
//!
//! The forward model `A = M · Ω · Φ` warps each band by the inverse
//! dispersion map, mixes bands into camera channels and (for RAW captures)
//! keeps the Bayer channel of every pixel. [`solve_admm`] minimises
//!
//! ```text
//! ½‖A x − b‖² + Σ_k w_k R_k(G_k x) + ι(x ≥ 0)
//! ```
//!
//! with one split per prior plus one for the bound, and [`solve_patches`]
//! applies it tile by tile over a whole image.

mod config;
mod operator;
mod patches;
mod problem;
mod solver;

pub use config::{AdmmConfig, Norm, PatchConfig, Prior, PriorKind};
pub use operator::{ImagingOperator, LinearOperator};
pub use patches::{solve_patches, PatchSolution};
pub use problem::{Observation, ReconstructionProblem, SpectralWarp};
pub use solver::{
    objective_terms, soft_threshold, solve_admm, AdmmResult, IterationRecord, ObjectiveTerms,
};
