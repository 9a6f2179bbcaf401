//! Ray launching, spot diagrams and focus search.

use nalgebra::Vector3;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::system::LensSystem;
use super::trace::{propagate, Ray};
use crate::error::{ChromaError, Result};
use crate::numeric::golden_section_minimize;

/// Distance in front of the first vertex at which collimated rays start (mm).
const LAUNCH_SETBACK: f64 = 10.0;

/// Object-side light source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    /// Plane wave tilted by `field_angle_rad` in the y–z plane.
    Collimated { field_angle_rad: f64 },
    /// Point emitter at `position` (mm), in front of the first surface.
    Point { position: [f64; 3] },
}

impl Default for Source {
    fn default() -> Self {
        Self::Collimated {
            field_angle_rad: 0.0,
        }
    }
}

/// How launch points are distributed over the entrance aperture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaySampling {
    /// `n × n` square grid clipped to the aperture disk.
    Grid { n: usize },
    /// `n` uniform samples on the aperture disk.
    Random { n: usize, seed: u64 },
}

impl Default for RaySampling {
    fn default() -> Self {
        Self::Grid { n: 41 }
    }
}

impl RaySampling {
    /// Points `[x, y]` on a disk of radius `radius`.
    pub fn pupil_points(&self, radius: f64) -> Vec<[f64; 2]> {
        match *self {
            Self::Grid { n } => {
                if n == 0 {
                    return Vec::new();
                }
                if n == 1 {
                    return vec![[0.0, 0.0]];
                }
                // Integer offsets from the centre keep the grid exactly
                // mirror-symmetric about both axes.
                let half = n as i64 - 1;
                let step = radius / half as f64;
                let mut out = Vec::with_capacity(n * n);
                for j in 0..n as i64 {
                    let dv = 2 * j - half;
                    for i in 0..n as i64 {
                        let du = 2 * i - half;
                        if du * du + dv * dv <= half * half {
                            out.push([du as f64 * step, dv as f64 * step]);
                        }
                    }
                }
                out
            }
            Self::Random { n, seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..n)
                    .map(|_| {
                        let r = radius * rng.gen::<f64>().sqrt();
                        let phi = rng.gen_range(0.0..std::f64::consts::TAU);
                        [r * phi.cos(), r * phi.sin()]
                    })
                    .collect()
            }
        }
    }
}

/// Source, pupil sampling and wavelengths of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub source: Source,
    pub sampling: RaySampling,
    pub wavelengths_nm: Vec<f64>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            source: Source::default(),
            sampling: RaySampling::default(),
            wavelengths_nm: vec![450.0, 550.0, 650.0],
        }
    }
}

impl TraceConfig {
    pub fn validate(&self) -> Result<()> {
        match self.sampling {
            RaySampling::Grid { n } | RaySampling::Random { n, .. } if n == 0 => {
                return Err(ChromaError::invalid("ray sampling needs n > 0"));
            }
            _ => {}
        }
        if let Some(w) = self
            .wavelengths_nm
            .iter()
            .find(|w| !(w.is_finite() && **w > 0.0))
        {
            return Err(ChromaError::invalid(format!("wavelength {w} nm is not positive")));
        }
        match self.source {
            Source::Collimated { field_angle_rad } => {
                if !(field_angle_rad.is_finite()
                    && field_angle_rad.abs() < std::f64::consts::FRAC_PI_2)
                {
                    return Err(ChromaError::invalid("field angle must lie in (-pi/2, pi/2)"));
                }
            }
            Source::Point { position } => {
                if !position.iter().all(|v| v.is_finite()) {
                    return Err(ChromaError::invalid("point source position is not finite"));
                }
            }
        }
        Ok(())
    }

    /// Rays launched towards the entrance aperture of `system`.
    pub(crate) fn launch_rays(&self, system: &LensSystem) -> Vec<Ray> {
        let Some(first) = system.surfaces.first() else {
            return Vec::new();
        };
        let pupil = self.sampling.pupil_points(first.semi_diameter);
        match self.source {
            Source::Collimated { field_angle_rad } => {
                let dir = Vector3::new(0.0, field_angle_rad.sin(), field_angle_rad.cos());
                pupil
                    .into_iter()
                    .filter_map(|[x, y]| {
                        // Aim each ray at its pupil point on the vertex plane.
                        let target = Vector3::new(x, y, first.vertex_z);
                        let origin = target - dir * (LAUNCH_SETBACK / dir.z);
                        Ray::new(origin, dir)
                    })
                    .collect()
            }
            Source::Point { position } => {
                let origin = Vector3::from(position);
                pupil
                    .into_iter()
                    .filter_map(|[x, y]| Ray::new(origin, Vector3::new(x, y, first.vertex_z) - origin))
                    .collect()
            }
        }
    }
}

/// Ray hits on the image plane for one wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotDiagram {
    pub wavelength_nm: f64,
    pub image_z: f64,
    /// Rays launched, including those lost to vignetting or TIR.
    pub n_launched: usize,
    pub hits: Vec<[f64; 2]>,
    pub centroid: Option<[f64; 2]>,
    /// RMS distance of hits from the centroid (mm).
    pub rms_radius: Option<f64>,
}

impl SpotDiagram {
    pub(crate) fn from_hits(wavelength_nm: f64, image_z: f64, n_launched: usize, hits: Vec<[f64; 2]>) -> Self {
        let (centroid, rms_radius) = spot_stats(&hits)
            .map(|(c, r)| (Some(c), Some(r)))
            .unwrap_or((None, None));
        Self {
            wavelength_nm,
            image_z,
            n_launched,
            hits,
            centroid,
            rms_radius,
        }
    }

    /// Fraction of launched rays that reached the image plane.
    pub fn transmission(&self) -> f64 {
        if self.n_launched == 0 {
            0.0
        } else {
            self.hits.len() as f64 / self.n_launched as f64
        }
    }
}

fn spot_stats(hits: &[[f64; 2]]) -> Option<([f64; 2], f64)> {
    if hits.is_empty() {
        return None;
    }
    let n = hits.len() as f64;
    let cx = hits.iter().map(|h| h[0]).sum::<f64>() / n;
    let cy = hits.iter().map(|h| h[1]).sum::<f64>() / n;
    let ms = hits
        .iter()
        .map(|h| (h[0] - cx).powi(2) + (h[1] - cy).powi(2))
        .sum::<f64>()
        / n;
    Some(([cx, cy], ms.sqrt()))
}

/// Rays after the last surface, paired with the number launched.
fn exit_rays(system: &LensSystem, config: &TraceConfig, wavelength_nm: f64) -> (usize, Vec<Ray>) {
    let launched = config.launch_rays(system);
    let n = launched.len();
    let exits = launched
        .iter()
        .filter_map(|r| propagate(system, r, wavelength_nm))
        .filter(|r| r.dir.z > 0.0)
        .collect();
    (n, exits)
}

fn hits_at(exits: &[Ray], z: f64) -> Vec<[f64; 2]> {
    exits.iter().filter_map(|r| r.at_z(z)).collect()
}

/// Spot diagram at the image plane of `system` for one wavelength.
pub fn trace_spot(system: &LensSystem, config: &TraceConfig, wavelength_nm: f64) -> Result<SpotDiagram> {
    system.validate()?;
    config.validate()?;
    if !(wavelength_nm.is_finite() && wavelength_nm > 0.0) {
        return Err(ChromaError::invalid(format!("wavelength {wavelength_nm} nm is not positive")));
    }
    let (n_launched, exits) = exit_rays(system, config, wavelength_nm);
    let spot = SpotDiagram::from_hits(wavelength_nm, system.image_z, n_launched, hits_at(&exits, system.image_z));
    tracing::debug!(
        "{:.1} nm: {}/{} rays reached the image plane",
        wavelength_nm,
        spot.hits.len(),
        n_launched
    );
    Ok(spot)
}

/// Spot diagrams for every wavelength in `config`.
pub fn trace_spectrum(system: &LensSystem, config: &TraceConfig) -> Result<Vec<SpotDiagram>> {
    if config.wavelengths_nm.is_empty() {
        return Err(ChromaError::invalid("no wavelengths to trace"));
    }
    config
        .wavelengths_nm
        .iter()
        .map(|&w| trace_spot(system, config, w))
        .collect()
}

/// Best image-plane position for one wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusResult {
    pub wavelength_nm: f64,
    pub image_z: f64,
    pub rms_radius: f64,
}

/// Image-plane position in `z_range` minimising the RMS spot radius.
///
/// Positions where no ray arrives score `+inf`.
pub fn best_focus(
    system: &LensSystem,
    config: &TraceConfig,
    wavelength_nm: f64,
    z_range: [f64; 2],
) -> Result<FocusResult> {
    system.validate()?;
    config.validate()?;
    let [z0, z1] = z_range;
    if !(z0.is_finite() && z1.is_finite() && z1 > z0) {
        return Err(ChromaError::invalid(format!("focus range [{z0}, {z1}] is empty")));
    }
    let (_, exits) = exit_rays(system, config, wavelength_nm);
    if exits.is_empty() {
        return Err(ChromaError::InsufficientData { needed: 1, got: 0 });
    }
    let (z, rms) = golden_section_minimize(
        |z| {
            spot_stats(&hits_at(&exits, z))
                .map(|(_, r)| r)
                .unwrap_or(f64::INFINITY)
        },
        z0,
        z1,
        80,
    );
    tracing::debug!("{:.1} nm: best focus z={:.4} mm, rms={:.5} mm", wavelength_nm, z, rms);
    Ok(FocusResult {
        wavelength_nm,
        image_z: z,
        rms_radius: rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raytrace::Surface;
    use approx::assert_relative_eq;

    #[test]
    fn grid_sampling_stays_inside_pupil() {
        let pts = RaySampling::Grid { n: 11 }.pupil_points(2.0);
        assert!(!pts.is_empty());
        assert!(pts.iter().all(|p| p[0].hypot(p[1]) <= 2.0 + 1e-12));
        assert!(pts.contains(&[0.0, 0.0]));
    }

    #[test]
    fn grid_sampling_is_mirror_symmetric() {
        for n in [2, 40, 41, 61] {
            let pts = RaySampling::Grid { n }.pupil_points(1.5);
            for p in &pts {
                assert!(pts.contains(&[-p[0], p[1]]), "n={n}: {p:?}");
                assert!(pts.contains(&[p[0], -p[1]]), "n={n}: {p:?}");
            }
            let sx: f64 = pts.iter().map(|p| p[0]).sum();
            let sy: f64 = pts.iter().map(|p| p[1]).sum();
            assert_relative_eq!(sx, 0.0, epsilon = 1e-12);
            assert_relative_eq!(sy, 0.0, epsilon = 1e-12);
        }
        assert_eq!(RaySampling::Grid { n: 1 }.pupil_points(1.0), vec![[0.0, 0.0]]);
    }

    #[test]
    fn random_sampling_is_seeded() {
        let s = RaySampling::Random { n: 50, seed: 3 };
        assert_eq!(s.pupil_points(1.0), s.pupil_points(1.0));
        assert_eq!(s.pupil_points(1.0).len(), 50);
    }

    #[test]
    fn on_axis_spot_is_centred() {
        let spot = trace_spot(&LensSystem::default(), &TraceConfig::default(), 550.0).unwrap();
        let c = spot.centroid.expect("hits");
        assert_relative_eq!(c[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(c[1], 0.0, epsilon = 1e-9);
        assert_eq!(spot.hits.len(), spot.n_launched);
    }

    #[test]
    fn off_axis_field_moves_centroid() {
        let config = TraceConfig {
            source: Source::Collimated {
                field_angle_rad: 0.05,
            },
            ..TraceConfig::default()
        };
        let spot = trace_spot(&LensSystem::default(), &config, 550.0).unwrap();
        // y ≈ f · tan(θ) with f ≈ 50 mm.
        let y = spot.centroid.expect("hits")[1];
        assert!(y > 2.0 && y < 3.0, "centroid y = {y}");
    }

    #[test]
    fn blue_focuses_before_red() {
        let system = LensSystem::default();
        let config = TraceConfig {
            sampling: RaySampling::Grid { n: 21 },
            ..TraceConfig::default()
        };
        let blue = best_focus(&system, &config, 450.0, [40.0, 60.0]).unwrap();
        let red = best_focus(&system, &config, 650.0, [40.0, 60.0]).unwrap();
        assert!(blue.image_z < red.image_z);
        assert!(blue.image_z > 45.0 && red.image_z < 58.0);
    }

    #[test]
    fn spectrum_traces_every_wavelength() {
        let spots = trace_spectrum(&LensSystem::default(), &TraceConfig::default()).unwrap();
        assert_eq!(spots.len(), 3);
        assert_eq!(spots[2].wavelength_nm, 650.0);
    }

    #[test]
    fn fully_vignetted_spot_has_no_centroid() {
        let stop = |vertex_z: f64, semi_diameter: f64| Surface {
            vertex_z,
            radius: 0.0,
            semi_diameter,
            glass_after: None,
        };
        let system = LensSystem {
            surfaces: vec![stop(0.0, 4.0), stop(1.0, 1.0)],
            image_z: 5.0,
        };
        let config = TraceConfig {
            source: Source::Collimated {
                field_angle_rad: 1.4,
            },
            ..TraceConfig::default()
        };
        let spot = trace_spot(&system, &config, 550.0).unwrap();
        assert!(spot.hits.is_empty());
        assert!(spot.centroid.is_none());
        assert!(spot.n_launched > 0);
        assert_eq!(spot.transmission(), 0.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TraceConfig {
            sampling: RaySampling::Grid { n: 0 },
            ..TraceConfig::default()
        };
        assert!(trace_spot(&LensSystem::default(), &config, 550.0).is_err());
        assert!(best_focus(&LensSystem::default(), &TraceConfig::default(), 550.0, [5.0, 1.0]).is_err());
    }
}
