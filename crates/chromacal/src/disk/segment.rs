//! Binarisation of calibration-target images.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use ndarray::ArrayView2;

use super::config::{DiskFitConfig, Polarity, Threshold};
use crate::error::{ChromaError, Result};

/// Otsu threshold of `[0, 1]` data on a 256-bin histogram.
///
/// Returns the lower edge of the first foreground bin, so `v >= t`
/// selects the brighter class. Values outside `[0, 1]` are clamped.
pub fn otsu_threshold(plane: &ArrayView2<f64>) -> f64 {
    let mut histogram = [0u64; 256];
    for &v in plane.iter() {
        let bin = (v.clamp(0.0, 1.0) * 255.0) as usize;
        histogram[bin.min(255)] += 1;
    }
    let total = plane.len() as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut best = (0.0, 0usize);
    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }
        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let between = weight_b * weight_f * (mean_b - mean_f).powi(2);
        if between > best.0 {
            best = (between, i);
        }
    }
    (best.1 + 1) as f64 / 255.0
}

/// Foreground mask (255 = disk) after thresholding and morphological
/// opening/closing.
pub fn segment(plane: &ArrayView2<f64>, config: &DiskFitConfig) -> Result<GrayImage> {
    config.validate()?;
    if let Some(((row, col), _)) = plane.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(ChromaError::invalid(format!(
            "non-finite pixel at row {row}, col {col}"
        )));
    }
    let (h, w) = plane.dim();
    if h == 0 || w == 0 {
        return Err(ChromaError::invalid("empty image"));
    }

    let oriented = match config.polarity {
        Polarity::BrightOnDark => plane.to_owned(),
        Polarity::DarkOnBright => plane.mapv(|v| 1.0 - v),
    };
    let threshold = match config.threshold {
        Threshold::Otsu => otsu_threshold(&oriented.view()),
        Threshold::Fixed(t) => match config.polarity {
            Polarity::BrightOnDark => t,
            Polarity::DarkOnBright => 1.0 - t,
        },
    };
    tracing::debug!("segmentation threshold {:.4}", threshold);

    let mut mask = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if oriented[[y as usize, x as usize]] >= threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    if config.open_radius > 0 {
        mask = imageproc::morphology::open(&mask, Norm::LInf, config.open_radius);
    }
    if config.close_radius > 0 {
        mask = imageproc::morphology::close(&mask, Norm::LInf, config.close_radius);
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn otsu_separates_two_levels() {
        let mut plane = Array2::from_elem((20, 20), 0.1);
        plane.slice_mut(ndarray::s![5..15, 5..15]).fill(0.9);
        let t = otsu_threshold(&plane.view());
        assert!(t > 0.1 && t <= 0.9, "threshold {t}");
    }

    #[test]
    fn opening_removes_isolated_specks() {
        let mut plane = Array2::from_elem((30, 30), 0.0);
        plane.slice_mut(ndarray::s![10..20, 10..20]).fill(1.0);
        plane[[2, 2]] = 1.0;
        let config = DiskFitConfig {
            open_radius: 1,
            close_radius: 0,
            ..DiskFitConfig::default()
        };
        let mask = segment(&plane.view(), &config).unwrap();
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
        assert_eq!(mask.get_pixel(15, 15)[0], 255);
    }

    #[test]
    fn dark_disks_are_foreground_when_inverted() {
        let mut plane = Array2::from_elem((20, 20), 0.8);
        plane.slice_mut(ndarray::s![8..12, 8..12]).fill(0.2);
        let config = DiskFitConfig {
            polarity: Polarity::DarkOnBright,
            open_radius: 0,
            close_radius: 0,
            ..DiskFitConfig::default()
        };
        let mask = segment(&plane.view(), &config).unwrap();
        assert_eq!(mask.get_pixel(9, 9)[0], 255);
        assert_eq!(mask.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn non_finite_pixels_are_rejected() {
        let mut plane = Array2::from_elem((4, 4), 0.0);
        plane[[1, 2]] = f64::NAN;
        assert!(segment(&plane.view(), &DiskFitConfig::default()).is_err());
    }
}
