//! Ellipse geometry for disk calibration targets.
//!
//! - Geometric ellipse ↔ general conic conversion and Sampson distance.
//! - Region-property ellipses from second-order central moments.
//! - Direct least-squares conic fit (Fitzgibbon, Pilu & Fisher 1999) used to
//!   refine disk outlines from boundary pixels.

mod eigen;
mod fit;
mod types;

pub use fit::{fit_conic_direct, fit_ellipse_direct, rms_sampson_distance};
pub use types::{ConicCoeffs, Ellipse};
