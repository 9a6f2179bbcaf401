//! Chromatic dispersion model.
//!
//! A polynomial in image position and wavelength predicts where a point of
//! the reference-wavelength frame lands at any other wavelength. Fitted from
//! disk correspondences, it drives both image correction and the warp
//! operator of the spectral reconstruction.

mod correct;
mod fit;
mod model;

pub use correct::correct_image;
pub use fit::{fit_dispersion, DispersionFitConfig, DispersionFitStats};
pub use model::{DispersionModel, DispersionSample};
