//! Closed-form ray/surface intersection and vector refraction.

use nalgebra::Vector3;

use super::system::{LensSystem, Surface};

/// Minimum parametric distance accepted for a hit (mm).
const T_EPS: f64 = 1e-9;

/// Half-line `origin + t · dir`, `dir` unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f64>,
    pub dir: Vector3<f64>,
}

impl Ray {
    /// Build a ray, normalising `dir`. `None` for a zero direction.
    pub fn new(origin: Vector3<f64>, dir: Vector3<f64>) -> Option<Self> {
        let n = dir.norm();
        if !(n > 0.0) || !n.is_finite() {
            return None;
        }
        Some(Self {
            origin,
            dir: dir / n,
        })
    }

    pub fn at(&self, t: f64) -> Vector3<f64> {
        self.origin + self.dir * t
    }

    /// Transverse position where the ray crosses the plane `z`.
    pub fn at_z(&self, z: f64) -> Option<[f64; 2]> {
        if self.dir.z.abs() < 1e-15 {
            return None;
        }
        let t = (z - self.origin.z) / self.dir.z;
        if t < -T_EPS {
            return None;
        }
        let p = self.at(t);
        Some([p.x, p.y])
    }
}

/// Surface hit: point and unit normal (pointing towards −z at the vertex).
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub point: Vector3<f64>,
    pub normal: Vector3<f64>,
}

/// Intersect `ray` with the cap of `surface` around its vertex.
///
/// Returns `None` if the ray misses the sphere, only meets the far cap, or
/// lands outside the clear aperture.
pub fn intersect_sphere(ray: &Ray, surface: &Surface) -> Option<Hit> {
    let hit = if surface.is_plane() {
        if ray.dir.z.abs() < 1e-15 {
            return None;
        }
        let t = (surface.vertex_z - ray.origin.z) / ray.dir.z;
        if t <= T_EPS {
            return None;
        }
        Hit {
            point: ray.at(t),
            normal: Vector3::new(0.0, 0.0, -1.0),
        }
    } else {
        let r = surface.radius;
        let center = Vector3::new(0.0, 0.0, surface.vertex_z + r);
        let oc = ray.origin - center;
        let b = oc.dot(&ray.dir);
        let c = oc.norm_squared() - r * r;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        // The vertex cap is the hemisphere facing away from the centre along
        // the axis: sign(z − z_c) = −sign(r).
        let on_vertex_cap = |t: f64| {
            let z = ray.origin.z + t * ray.dir.z;
            (z - center.z) * r.signum() <= 0.0
        };
        let t = [-b - sq, -b + sq]
            .into_iter()
            .filter(|&t| t > T_EPS && on_vertex_cap(t))
            .reduce(f64::min)?;
        let point = ray.at(t);
        Hit {
            point,
            normal: (point - center) / r,
        }
    };

    if hit.point.x.hypot(hit.point.y) > surface.semi_diameter {
        return None;
    }
    Some(hit)
}

/// Refract unit direction `d` at a surface with unit normal `normal` going
/// from index `n1` into `n2`. `None` on total internal reflection.
pub fn refract(d: &Vector3<f64>, normal: &Vector3<f64>, n1: f64, n2: f64) -> Option<Vector3<f64>> {
    let mut n = *normal;
    let mut cos_i = -n.dot(d);
    if cos_i < 0.0 {
        n = -n;
        cos_i = -cos_i;
    }
    let eta = n1 / n2;
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        return None;
    }
    let t = d * eta + n * (eta * cos_i - k.sqrt());
    Some(t.normalize())
}

/// Propagate `ray` through every surface of `system` at `wavelength_nm`,
/// returning the ray leaving the last surface.
pub fn propagate(system: &LensSystem, ray: &Ray, wavelength_nm: f64) -> Option<Ray> {
    let mut current = *ray;
    let mut n_before = 1.0;
    for surface in &system.surfaces {
        let hit = intersect_sphere(&current, surface)?;
        let n_after = surface.index_after(wavelength_nm);
        let dir = refract(&current.dir, &hit.normal, n_before, n_after)?;
        current = Ray {
            origin: hit.point,
            dir,
        };
        n_before = n_after;
    }
    Some(current)
}

/// Trace `ray` to the image plane of `system`.
pub fn trace_ray(system: &LensSystem, ray: &Ray, wavelength_nm: f64) -> Option<[f64; 2]> {
    let out = propagate(system, ray, wavelength_nm)?;
    if out.dir.z <= 0.0 {
        return None;
    }
    out.at_z(system.image_z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raytrace::Glass;
    use approx::assert_relative_eq;

    fn surface(radius: f64) -> Surface {
        Surface {
            vertex_z: 10.0,
            radius,
            semi_diameter: 5.0,
            glass_after: None,
        }
    }

    fn axial_ray(y: f64) -> Ray {
        Ray::new(Vector3::new(0.0, y, -5.0), Vector3::new(0.0, 0.0, 1.0)).unwrap()
    }

    #[test]
    fn convex_surface_hit_on_axis_is_the_vertex() {
        let hit = intersect_sphere(&axial_ray(0.0), &surface(20.0)).expect("hit");
        assert_relative_eq!(hit.point.z, 10.0, epsilon = 1e-12);
        assert_relative_eq!(hit.normal.z, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn sag_matches_sphere_geometry() {
        for radius in [20.0, -20.0] {
            let hit = intersect_sphere(&axial_ray(3.0), &surface(radius)).expect("hit");
            let sag = radius - radius.signum() * (radius * radius - 9.0f64).sqrt();
            assert_relative_eq!(hit.point.z, 10.0 + sag, epsilon = 1e-10);
            assert_relative_eq!(hit.point.y, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn vignetted_ray_is_dropped() {
        assert!(intersect_sphere(&axial_ray(6.0), &surface(20.0)).is_none());
        assert!(intersect_sphere(&axial_ray(6.0), &surface(0.0)).is_none());
    }

    #[test]
    fn snell_law_holds() {
        let d = Vector3::new(0.5f64.sin(), 0.0, 0.5f64.cos());
        let n = Vector3::new(0.0, 0.0, -1.0);
        let t = refract(&d, &n, 1.0, 1.5).expect("refracts");
        assert_relative_eq!(t.x, 0.5f64.sin() / 1.5, epsilon = 1e-12);
        assert_relative_eq!(t.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn total_internal_reflection_is_none() {
        let d = Vector3::new(0.9f64.sin(), 0.0, 0.9f64.cos());
        let n = Vector3::new(0.0, 0.0, -1.0);
        assert!(refract(&d, &n, 1.5, 1.0).is_none());
    }

    #[test]
    fn flat_window_shifts_but_keeps_direction() {
        let glass = Glass::Constant { n: 1.5 };
        let system = LensSystem {
            surfaces: vec![
                Surface {
                    vertex_z: 0.0,
                    radius: 0.0,
                    semi_diameter: 10.0,
                    glass_after: Some(glass),
                },
                Surface {
                    vertex_z: 3.0,
                    radius: 0.0,
                    semi_diameter: 10.0,
                    glass_after: None,
                },
            ],
            image_z: 20.0,
        };
        let ray = Ray::new(Vector3::new(0.0, 0.0, -1.0), Vector3::new(0.0, 0.2, 1.0)).unwrap();
        let out = propagate(&system, &ray, 550.0).expect("passes");
        assert_relative_eq!(out.dir.y, ray.dir.y, epsilon = 1e-12);
        assert_relative_eq!(out.dir.z, ray.dir.z, epsilon = 1e-12);
        let straight = ray.at_z(20.0).unwrap();
        let traced = trace_ray(&system, &ray, 550.0).unwrap();
        assert!(traced[1] < straight[1]);
    }
}
