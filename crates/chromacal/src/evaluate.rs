//! Image-quality metrics and evaluation tables against ground truth.

use std::path::Path;

use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};
use crate::mosaic::{demosaic, mosaic, BayerPattern, DemosaicMethod};
use crate::Cube;

/// Full-reference error statistics over the cropped image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub mse: f64,
    pub rmse: f64,
    /// `10 log10(peak² / mse)`; infinite for a perfect estimate.
    pub psnr: f64,
    pub mae: f64,
    pub max_abs_error: f64,
    /// Mean angle between estimated and true pixel spectra (degrees), over
    /// pixels where both spectra are non-zero.
    pub mean_spectral_angle_deg: f64,
}

impl Metrics {
    /// Compare `estimate` with `truth` after dropping `border` pixels on
    /// every side.
    pub fn compute(estimate: &Cube, truth: &Cube, border: usize, peak: f64) -> Result<Self> {
        if estimate.dim() != truth.dim() {
            return Err(ChromaError::mismatch("estimate shape", truth.dim(), estimate.dim()));
        }
        if !(peak > 0.0) {
            return Err(ChromaError::invalid(format!("peak must be > 0, got {peak}")));
        }
        let (h, w, _) = truth.dim();
        if 2 * border >= h || 2 * border >= w {
            return Err(ChromaError::invalid(format!(
                "border {border} leaves nothing of a {h}x{w} image"
            )));
        }
        let crop = s![border..h - border, border..w - border, ..];
        let est = estimate.slice(crop);
        let tru = truth.slice(crop);

        let n = tru.len() as f64;
        let (mut sq, mut abs, mut max) = (0.0, 0.0, 0.0f64);
        for (a, b) in est.iter().zip(tru.iter()) {
            let d = a - b;
            sq += d * d;
            abs += d.abs();
            max = max.max(d.abs());
        }
        let mse = sq / n;

        let (mut angle_sum, mut counted) = (0.0, 0usize);
        for (a, b) in est.lanes(Axis(2)).into_iter().zip(tru.lanes(Axis(2))) {
            let na = a.dot(&a).sqrt();
            let nb = b.dot(&b).sqrt();
            if na > 0.0 && nb > 0.0 {
                let c = (a.dot(&b) / (na * nb)).clamp(-1.0, 1.0);
                angle_sum += c.acos();
                counted += 1;
            }
        }
        let mean_spectral_angle_deg = if counted > 0 {
            (angle_sum / counted as f64).to_degrees()
        } else {
            0.0
        };

        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            psnr: if mse > 0.0 {
                10.0 * (peak * peak / mse).log10()
            } else {
                f64::INFINITY
            },
            mae: abs / n,
            max_abs_error: max,
            mean_spectral_angle_deg,
        })
    }

    fn mean(all: &[Metrics]) -> Self {
        let n = all.len().max(1) as f64;
        let avg = |f: fn(&Metrics) -> f64| all.iter().map(f).sum::<f64>() / n;
        Self {
            mse: avg(|m| m.mse),
            rmse: avg(|m| m.rmse),
            psnr: avg(|m| m.psnr),
            mae: avg(|m| m.mae),
            max_abs_error: avg(|m| m.max_abs_error),
            mean_spectral_angle_deg: avg(|m| m.mean_spectral_angle_deg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub method: String,
    pub image: String,
    pub metrics: Metrics,
}

/// Scores of several methods over several images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTable {
    pub rows: Vec<EvaluationRow>,
}

impl EvaluationTable {
    pub fn push(&mut self, method: impl Into<String>, image: impl Into<String>, metrics: Metrics) {
        self.rows.push(EvaluationRow {
            method: method.into(),
            image: image.into(),
            metrics,
        });
    }

    /// Mean metrics per method, in order of first appearance.
    pub fn summary(&self) -> Vec<(String, Metrics)> {
        let mut methods: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !methods.contains(&row.method.as_str()) {
                methods.push(&row.method);
            }
        }
        methods
            .into_iter()
            .map(|m| {
                let of_method: Vec<Metrics> = self
                    .rows
                    .iter()
                    .filter(|r| r.method == m)
                    .map(|r| r.metrics)
                    .collect();
                (m.to_string(), Metrics::mean(&of_method))
            })
            .collect()
    }

    /// One line per row followed by one `mean` line per method.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record([
            "method",
            "image",
            "mse",
            "rmse",
            "psnr",
            "mae",
            "max_abs_error",
            "mean_spectral_angle_deg",
        ])?;
        let record = |method: &str, image: &str, m: &Metrics| {
            vec![
                method.to_string(),
                image.to_string(),
                format!("{:.8e}", m.mse),
                format!("{:.8e}", m.rmse),
                format!("{:.4}", m.psnr),
                format!("{:.8e}", m.mae),
                format!("{:.8e}", m.max_abs_error),
                format!("{:.4}", m.mean_spectral_angle_deg),
            ]
        };
        for row in &self.rows {
            wtr.write_record(record(&row.method, &row.image, &row.metrics))?;
        }
        for (method, m) in self.summary() {
            wtr.write_record(record(&method, "mean", &m))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Mosaic every ground-truth RGB image with `pattern`, demosaic it with each
/// of `methods` and score the result (`peak = 1`).
pub fn evaluate_demosaicking(
    images: &[(String, Cube)],
    pattern: BayerPattern,
    methods: &[DemosaicMethod],
    border: usize,
) -> Result<EvaluationTable> {
    let mut table = EvaluationTable::default();
    for (name, truth) in images {
        let raw = mosaic(truth, pattern)?;
        for &method in methods {
            let estimate = demosaic(&raw, pattern, method);
            let metrics = Metrics::compute(&estimate, truth, border, 1.0)?;
            tracing::info!(
                "{} / {}: rmse {:.5}, psnr {:.2} dB",
                name,
                method.name(),
                metrics.rmse,
                metrics.psnr
            );
            table.push(method.name(), name.as_str(), metrics);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::smooth_cube;
    use approx::assert_relative_eq;

    #[test]
    fn metrics_of_constant_offset() {
        let truth = Cube::from_elem((6, 6, 3), 0.5);
        let estimate = Cube::from_elem((6, 6, 3), 0.6);
        let m = Metrics::compute(&estimate, &truth, 1, 1.0).unwrap();
        assert_relative_eq!(m.mse, 0.01, epsilon = 1e-12);
        assert_relative_eq!(m.rmse, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.mae, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.max_abs_error, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.psnr, 20.0, epsilon = 1e-9);
        // Parallel spectra.
        assert_relative_eq!(m.mean_spectral_angle_deg, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn border_is_excluded() {
        let truth = Cube::zeros((5, 5, 1));
        let mut estimate = truth.clone();
        estimate[[0, 0, 0]] = 1.0;
        let m = Metrics::compute(&estimate, &truth, 1, 1.0).unwrap();
        assert_eq!(m.mse, 0.0);
        assert!(m.psnr.is_infinite());
        assert!(Metrics::compute(&estimate, &truth, 3, 1.0).is_err());
        assert!(Metrics::compute(&Cube::zeros((5, 4, 1)), &truth, 0, 1.0).is_err());
    }

    #[test]
    fn orthogonal_spectra_are_ninety_degrees_apart() {
        let truth = Cube::from_shape_fn((2, 2, 2), |(_, _, b)| if b == 0 { 1.0 } else { 0.0 });
        let estimate = Cube::from_shape_fn((2, 2, 2), |(_, _, b)| if b == 1 { 1.0 } else { 0.0 });
        let m = Metrics::compute(&estimate, &truth, 0, 1.0).unwrap();
        assert_relative_eq!(m.mean_spectral_angle_deg, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn summary_averages_per_method() {
        let mut table = EvaluationTable::default();
        let m = |mse: f64| Metrics {
            mse,
            rmse: mse.sqrt(),
            psnr: 0.0,
            mae: 0.0,
            max_abs_error: 0.0,
            mean_spectral_angle_deg: 0.0,
        };
        table.push("a", "x", m(1.0));
        table.push("b", "x", m(4.0));
        table.push("a", "y", m(3.0));
        let summary = table.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].0, "a");
        assert_relative_eq!(summary[0].1.mse, 2.0);
        assert_relative_eq!(summary[1].1.mse, 4.0);
    }

    #[test]
    fn bilinear_beats_nearest_on_smooth_images() {
        let images = vec![
            ("first".to_string(), smooth_cube(24, 24, 3, 1)),
            ("second".to_string(), smooth_cube(24, 24, 3, 2)),
        ];
        let table = evaluate_demosaicking(
            &images,
            BayerPattern::Rggb,
            &DemosaicMethod::ALL,
            2,
        )
        .unwrap();
        assert_eq!(table.rows.len(), 4);
        let summary = table.summary();
        let bilinear = &summary.iter().find(|(m, _)| m == "bilinear").unwrap().1;
        let nearest = &summary.iter().find(|(m, _)| m == "nearest").unwrap().1;
        assert!(bilinear.rmse < nearest.rmse);

        let path = std::env::temp_dir().join(format!("chromacal-eval-{}.csv", std::process::id()));
        table.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(text.lines().count(), 1 + 4 + 2);
        assert!(text.lines().last().unwrap().starts_with("nearest,mean,"));
    }

    #[test]
    fn demosaicking_needs_rgb_truth() {
        let images = vec![("gray".to_string(), Cube::zeros((4, 4, 1)))];
        assert!(evaluate_demosaicking(&images, BayerPattern::Rggb, &DemosaicMethod::ALL, 0).is_err());
    }
}
