//! Irradiance density estimate from a spot diagram.

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use super::spot::SpotDiagram;
use crate::error::{ChromaError, Result};
use crate::Plane;

/// Sensor grid onto which ray hits are binned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrradianceConfig {
    /// Image-plane position (mm) of the centre of pixel `(0, 0)`.
    pub origin_mm: [f64; 2],
    pub pixel_pitch_mm: f64,
    pub width: usize,
    pub height: usize,
    /// Gaussian smoothing applied after binning (pixels); 0 disables it.
    pub smoothing_sigma_px: f64,
}

impl Default for IrradianceConfig {
    fn default() -> Self {
        Self::centered([0.0, 0.0], 0.005, 64, 64, 1.0)
    }
}

impl IrradianceConfig {
    /// Grid of `width × height` pixels centred on `center_mm`.
    pub fn centered(
        center_mm: [f64; 2],
        pixel_pitch_mm: f64,
        width: usize,
        height: usize,
        smoothing_sigma_px: f64,
    ) -> Self {
        let half = |n: usize| 0.5 * (n.max(1) - 1) as f64 * pixel_pitch_mm;
        Self {
            origin_mm: [center_mm[0] - half(width), center_mm[1] - half(height)],
            pixel_pitch_mm,
            width,
            height,
            smoothing_sigma_px,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_pitch_mm.is_finite() && self.pixel_pitch_mm > 0.0) {
            return Err(ChromaError::invalid("pixel_pitch_mm must be > 0"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ChromaError::invalid("irradiance grid must be non-empty"));
        }
        if !(self.smoothing_sigma_px.is_finite() && self.smoothing_sigma_px >= 0.0) {
            return Err(ChromaError::invalid("smoothing_sigma_px must be >= 0"));
        }
        if !self.origin_mm.iter().all(|v| v.is_finite()) {
            return Err(ChromaError::invalid("origin_mm is not finite"));
        }
        Ok(())
    }
}

/// Relative irradiance (per mm²) of `spot` on the grid of `config`.
///
/// Every launched ray carries power `1 / n_launched`, so summing the result
/// times the pixel area gives the fraction of launched power that landed on
/// the grid. Hits outside the grid are dropped.
pub fn irradiance(spot: &SpotDiagram, config: &IrradianceConfig) -> Result<Plane> {
    config.validate()?;
    let mut density = Plane::zeros((config.height, config.width));
    if spot.n_launched == 0 {
        return Ok(density);
    }
    let pitch = config.pixel_pitch_mm;
    let weight = 1.0 / (spot.n_launched as f64 * pitch * pitch);
    let mut dropped = 0usize;
    for &[x, y] in &spot.hits {
        let col = ((x - config.origin_mm[0]) / pitch).round();
        let row = ((y - config.origin_mm[1]) / pitch).round();
        if col < 0.0 || row < 0.0 || col >= config.width as f64 || row >= config.height as f64 {
            dropped += 1;
            continue;
        }
        density[[row as usize, col as usize]] += weight;
    }
    if dropped > 0 {
        tracing::debug!("{} of {} hits fell outside the irradiance grid", dropped, spot.hits.len());
    }
    if config.smoothing_sigma_px > 0.0 {
        density = smooth(&density, config.smoothing_sigma_px as f32);
    }
    Ok(density)
}

fn smooth(plane: &Plane, sigma: f32) -> Plane {
    let (h, w) = plane.dim();
    let f = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(w as u32, h as u32, |x, y| {
        Luma([plane[[y as usize, x as usize]] as f32])
    });
    let blurred = imageproc::filter::gaussian_blur_f32(&f, sigma);
    Plane::from_shape_fn((h, w), |(r, c)| blurred.get_pixel(c as u32, r as u32)[0] as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spot(hits: Vec<[f64; 2]>, n_launched: usize) -> SpotDiagram {
        SpotDiagram::from_hits(550.0, 50.0, n_launched, hits)
    }

    #[test]
    fn binned_density_integrates_to_transmitted_power() {
        let hits = vec![[0.0, 0.0], [0.01, 0.0], [0.0, -0.02], [5.0, 5.0]];
        let cfg = IrradianceConfig::centered([0.0, 0.0], 0.01, 21, 21, 0.0);
        let e = irradiance(&spot(hits, 8), &cfg).unwrap();
        let power = e.sum() * cfg.pixel_pitch_mm * cfg.pixel_pitch_mm;
        // Three of eight launched rays land on the grid.
        assert_relative_eq!(power, 3.0 / 8.0, epsilon = 1e-12);
        assert!(e[[10, 10]] > 0.0 && e[[10, 11]] > 0.0 && e[[8, 10]] > 0.0);
    }

    #[test]
    fn smoothing_roughly_preserves_power() {
        let hits = vec![[0.0, 0.0]; 10];
        let cfg = IrradianceConfig::centered([0.0, 0.0], 0.01, 41, 41, 2.0);
        let e = irradiance(&spot(hits, 10), &cfg).unwrap();
        let power = e.sum() * 1e-4;
        assert_relative_eq!(power, 1.0, epsilon = 1e-3);
        assert!(e[[20, 20]] > e[[20, 23]]);
        assert_relative_eq!(e[[20, 17]], e[[20, 23]], max_relative = 1e-4);
    }

    #[test]
    fn traced_spot_lands_on_grid() {
        use crate::raytrace::{trace_spot, LensSystem, TraceConfig};
        let s = trace_spot(&LensSystem::default(), &TraceConfig::default(), 550.0).unwrap();
        let cfg = IrradianceConfig::centered([0.0, 0.0], 0.01, 101, 101, 0.0);
        let e = irradiance(&s, &cfg).unwrap();
        let on_grid = e.sum() * 1e-4;
        assert!(on_grid > 0.5 && on_grid <= 1.0 + 1e-9, "on grid {on_grid}");
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let cfg = IrradianceConfig {
            pixel_pitch_mm: 0.0,
            ..IrradianceConfig::default()
        };
        assert!(irradiance(&spot(vec![], 1), &cfg).is_err());
    }
}
