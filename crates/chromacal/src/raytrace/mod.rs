//! Sequential ray tracing through coaxial spherical surfaces.
//!
//! Surfaces are intersected in closed form and rays are refracted with the
//! vector form of Snell's law, using per-wavelength indices from Sellmeier
//! glass models. Longitudinal chromatic aberration shows up as a shift of
//! [`best_focus`] across wavelengths, lateral chromatic aberration as a
//! shift of the off-axis [`SpotDiagram`] centroid.

mod glass;
mod irradiance;
mod spot;
mod system;
mod trace;

pub use glass::Glass;
pub use irradiance::{irradiance, IrradianceConfig};
pub use spot::{
    best_focus, trace_spectrum, trace_spot, FocusResult, RaySampling, Source, SpotDiagram,
    TraceConfig,
};
pub use system::{LensSystem, Surface};
pub use trace::{intersect_sphere, propagate, refract, trace_ray, Hit, Ray};
