//! Synthetic fixtures shared by unit tests.

use rand::prelude::*;

use crate::{Cube, Plane};

/// Render filled disks of `radius` at `centers` (`[x, y]`) with 4×4
/// supersampled coverage.
pub(crate) fn draw_disks(
    width: usize,
    height: usize,
    centers: &[[f64; 2]],
    radius: f64,
    fg: f64,
    bg: f64,
) -> Plane {
    const SS: usize = 4;
    let mut plane = Plane::from_elem((height, width), bg);
    for row in 0..height {
        for col in 0..width {
            let mut inside = 0usize;
            for sy in 0..SS {
                for sx in 0..SS {
                    let x = col as f64 - 0.5 + (sx as f64 + 0.5) / SS as f64;
                    let y = row as f64 - 0.5 + (sy as f64 + 0.5) / SS as f64;
                    if centers
                        .iter()
                        .any(|c| (x - c[0]).hypot(y - c[1]) <= radius)
                    {
                        inside += 1;
                    }
                }
            }
            let cover = inside as f64 / (SS * SS) as f64;
            plane[[row, col]] = bg + (fg - bg) * cover;
        }
    }
    plane
}

/// Regular `nx × ny` lattice of centres with spacing `pitch`, starting at
/// `origin`.
pub(crate) fn lattice(nx: usize, ny: usize, origin: [f64; 2], pitch: f64) -> Vec<[f64; 2]> {
    let mut out = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            out.push([origin[0] + i as f64 * pitch, origin[1] + j as f64 * pitch]);
        }
    }
    out
}

/// Smooth, strictly positive spectral cube (values in roughly [0.2, 0.8]).
pub(crate) fn smooth_cube(height: usize, width: usize, bands: usize, seed: u64) -> Cube {
    let mut rng = StdRng::seed_from_u64(seed);
    let fx: f64 = rng.gen_range(0.05..0.2);
    let fy: f64 = rng.gen_range(0.05..0.2);
    let phase: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
    Cube::from_shape_fn((height, width, bands), |(r, c, b)| {
        let t = if bands > 1 {
            b as f64 / (bands - 1) as f64
        } else {
            0.0
        };
        0.5 + 0.15 * (fx * c as f64 + phase).sin() * (1.0 - 0.5 * t)
            + 0.15 * (fy * r as f64).cos() * (0.5 + 0.5 * t)
    })
}

/// Add uniform noise in `[-amplitude, amplitude]`.
pub(crate) fn add_noise(plane: &Plane, amplitude: f64, seed: u64) -> Plane {
    let mut rng = StdRng::seed_from_u64(seed);
    plane.mapv(|v| v + rng.gen_range(-amplitude..amplitude))
}
