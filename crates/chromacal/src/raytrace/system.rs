//! Lens prescription: a stack of coaxial spherical surfaces.

use serde::{Deserialize, Serialize};

use super::glass::Glass;
use crate::error::{ChromaError, Result};

/// Radii with magnitude above this are treated as planes.
pub(crate) const PLANE_RADIUS: f64 = 1e12;

/// One refracting surface, rotationally symmetric about the z axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Axial position of the vertex (mm).
    pub vertex_z: f64,
    /// Signed radius of curvature (mm); the centre sits at
    /// `vertex_z + radius`. Zero or a huge value means a plane.
    pub radius: f64,
    /// Clear aperture radius (mm); hits further from the axis are vignetted.
    pub semi_diameter: f64,
    /// Medium after the surface; `None` is air (n = 1).
    #[serde(default)]
    pub glass_after: Option<Glass>,
}

impl Surface {
    pub fn is_plane(&self) -> bool {
        self.radius == 0.0 || !self.radius.is_finite() || self.radius.abs() > PLANE_RADIUS
    }

    /// Index of the medium after the surface.
    pub fn index_after(&self, wavelength_nm: f64) -> f64 {
        self.glass_after
            .map(|g| g.refractive_index(wavelength_nm))
            .unwrap_or(1.0)
    }
}

/// Ordered surfaces followed by an image plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensSystem {
    pub surfaces: Vec<Surface>,
    /// Axial position of the image (sensor) plane (mm).
    pub image_z: f64,
}

impl Default for LensSystem {
    /// 50 mm equi-convex N-BK7 singlet, f/6.25, sensor near the d-line focus.
    fn default() -> Self {
        Self::singlet(51.0, -51.0, 4.0, 4.0, Glass::n_bk7(), 52.7)
    }
}

impl LensSystem {
    /// Two-surface lens with its front vertex at z = 0.
    pub fn singlet(
        r1: f64,
        r2: f64,
        thickness: f64,
        semi_diameter: f64,
        glass: Glass,
        image_z: f64,
    ) -> Self {
        Self {
            surfaces: vec![
                Surface {
                    vertex_z: 0.0,
                    radius: r1,
                    semi_diameter,
                    glass_after: Some(glass),
                },
                Surface {
                    vertex_z: thickness,
                    radius: r2,
                    semi_diameter,
                    glass_after: None,
                },
            ],
            image_z,
        }
    }

    /// Entrance aperture radius (first surface).
    pub fn entrance_radius(&self) -> f64 {
        self.surfaces.first().map(|s| s.semi_diameter).unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.surfaces.first() else {
            return Err(ChromaError::invalid("lens system has no surfaces"));
        };
        for (i, s) in self.surfaces.iter().enumerate() {
            if !(s.semi_diameter.is_finite() && s.semi_diameter > 0.0) {
                return Err(ChromaError::invalid(format!(
                    "surface {i}: semi_diameter must be finite and > 0"
                )));
            }
            if !s.vertex_z.is_finite() {
                return Err(ChromaError::invalid(format!("surface {i}: vertex_z is not finite")));
            }
            if !s.is_plane() && s.radius.abs() < s.semi_diameter {
                return Err(ChromaError::invalid(format!(
                    "surface {i}: |radius| {} is smaller than semi_diameter {}",
                    s.radius.abs(),
                    s.semi_diameter
                )));
            }
        }
        for (i, pair) in self.surfaces.windows(2).enumerate() {
            if pair[1].vertex_z <= pair[0].vertex_z {
                return Err(ChromaError::invalid(format!(
                    "surface {} vertex must lie after surface {i}",
                    i + 1
                )));
            }
        }
        let last = self.surfaces.last().unwrap_or(first);
        if !(self.image_z > last.vertex_z) {
            return Err(ChromaError::invalid(
                "image plane must lie after the last surface",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_singlet_is_valid() {
        LensSystem::default().validate().unwrap();
    }

    #[test]
    fn unordered_surfaces_are_rejected() {
        let mut lens = LensSystem::default();
        lens.surfaces[1].vertex_z = -1.0;
        assert!(lens.validate().is_err());
    }

    #[test]
    fn aperture_larger_than_radius_is_rejected() {
        let lens = LensSystem::singlet(3.0, -3.0, 2.0, 4.0, Glass::n_bk7(), 10.0);
        assert!(lens.validate().is_err());
    }

    #[test]
    fn image_plane_inside_lens_is_rejected() {
        let mut lens = LensSystem::default();
        lens.image_z = 1.0;
        assert!(lens.validate().is_err());
    }

    #[test]
    fn zero_radius_means_plane() {
        let s = Surface {
            vertex_z: 0.0,
            radius: 0.0,
            semi_diameter: 1.0,
            glass_after: None,
        };
        assert!(s.is_plane());
        assert_eq!(s.index_after(500.0), 1.0);
    }
}
