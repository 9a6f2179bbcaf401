//! Spectral sampling and camera colour weights.
//!
//! A [`ColorWeights`] matrix (channels × bands) integrates a spectral cube
//! into camera channels: `c[k] = Σ_b W[k, b] · x[b]`, where `W[k, b]` is the
//! channel sensitivity at band `b` times the band's quadrature width.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};
use crate::Cube;

/// Strictly increasing band-centre wavelengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralSampling {
    pub wavelengths_nm: Vec<f64>,
}

impl SpectralSampling {
    pub fn new(wavelengths_nm: Vec<f64>) -> Result<Self> {
        if wavelengths_nm.is_empty() {
            return Err(ChromaError::invalid("spectral sampling needs at least one band"));
        }
        if !wavelengths_nm.iter().all(|w| w.is_finite() && *w > 0.0) {
            return Err(ChromaError::invalid("wavelengths must be finite and > 0"));
        }
        if wavelengths_nm.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ChromaError::invalid("wavelengths must be strictly increasing"));
        }
        Ok(Self { wavelengths_nm })
    }

    /// `start, start + step, …` up to and including `end` (within half a step).
    pub fn uniform(start_nm: f64, end_nm: f64, step_nm: f64) -> Result<Self> {
        if !(step_nm > 0.0 && end_nm >= start_nm) {
            return Err(ChromaError::invalid(format!(
                "invalid sampling {start_nm}..{end_nm} step {step_nm}"
            )));
        }
        let n = ((end_nm - start_nm) / step_nm + 0.5).floor() as usize + 1;
        Self::new((0..n).map(|i| start_nm + i as f64 * step_nm).collect())
    }

    pub fn len(&self) -> usize {
        self.wavelengths_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths_nm.is_empty()
    }

    /// Trapezoidal quadrature widths; a single band has width 1.
    pub fn band_widths(&self) -> Vec<f64> {
        let w = &self.wavelengths_nm;
        let n = w.len();
        if n < 2 {
            return vec![1.0; n];
        }
        (0..n)
            .map(|i| {
                let lo = if i == 0 { w[0] } else { w[i - 1] };
                let hi = if i + 1 == n { w[n - 1] } else { w[i + 1] };
                0.5 * (hi - lo)
            })
            .collect()
    }
}

/// Tabulated spectral response of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityCurve {
    pub wavelengths_nm: Vec<f64>,
    pub values: Vec<f64>,
}

impl SensitivityCurve {
    pub fn new(wavelengths_nm: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if wavelengths_nm.len() != values.len() {
            return Err(ChromaError::mismatch(
                "sensitivity table",
                wavelengths_nm.len(),
                values.len(),
            ));
        }
        if wavelengths_nm.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ChromaError::invalid("sensitivity wavelengths must increase"));
        }
        Ok(Self {
            wavelengths_nm,
            values,
        })
    }

    /// Linearly interpolated response; zero outside the table.
    pub fn sample(&self, wavelength_nm: f64) -> f64 {
        let w = &self.wavelengths_nm;
        let (Some(&first), Some(&last)) = (w.first(), w.last()) else {
            return 0.0;
        };
        if wavelength_nm < first || wavelength_nm > last {
            return 0.0;
        }
        let i = w.partition_point(|&x| x <= wavelength_nm);
        if i == 0 {
            return self.values[0];
        }
        if i >= w.len() {
            return self.values[w.len() - 1];
        }
        let t = (wavelength_nm - w[i - 1]) / (w[i] - w[i - 1]);
        self.values[i - 1] * (1.0 - t) + self.values[i] * t
    }
}

/// Scaling applied to a weight matrix built from sensitivities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightNormalization {
    None,
    /// Every channel row sums to one.
    #[default]
    RowSum,
    /// The largest row sum becomes one; relative channel gains are kept.
    MaxRowSum,
}

/// Channels × bands mixing matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorWeights {
    pub matrix: Array2<f64>,
}

impl ColorWeights {
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self> {
        if matrix.is_empty() {
            return Err(ChromaError::invalid("weight matrix is empty"));
        }
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(ChromaError::invalid("weight matrix has non-finite entries"));
        }
        Ok(Self { matrix })
    }

    /// One channel per band.
    pub fn identity(bands: usize) -> Self {
        Self {
            matrix: Array2::eye(bands),
        }
    }

    /// Integrate `curves` over `sampling`.
    pub fn from_sensitivities(
        curves: &[SensitivityCurve],
        sampling: &SpectralSampling,
        normalization: WeightNormalization,
    ) -> Result<Self> {
        if curves.is_empty() {
            return Err(ChromaError::invalid("no sensitivity curves"));
        }
        let widths = sampling.band_widths();
        let mut matrix = Array2::from_shape_fn((curves.len(), sampling.len()), |(c, b)| {
            curves[c].sample(sampling.wavelengths_nm[b]) * widths[b]
        });
        let row_sums = matrix.sum_axis(Axis(1));
        match normalization {
            WeightNormalization::None => {}
            WeightNormalization::RowSum => {
                for (mut row, &s) in matrix.axis_iter_mut(Axis(0)).zip(&row_sums) {
                    if s <= 0.0 {
                        return Err(ChromaError::invalid(
                            "a channel has no response over the sampled range",
                        ));
                    }
                    row /= s;
                }
            }
            WeightNormalization::MaxRowSum => {
                let max = row_sums.fold(0.0f64, |a, &b| a.max(b));
                if max <= 0.0 {
                    return Err(ChromaError::invalid("sensitivities are zero over the sampled range"));
                }
                matrix /= max;
            }
        }
        Self::from_matrix(matrix)
    }

    pub fn channels(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn bands(&self) -> usize {
        self.matrix.ncols()
    }

    /// Mix a `[row, col, band]` cube into `[row, col, channel]`.
    pub fn project(&self, cube: &Cube) -> Result<Cube> {
        let (h, w, b) = cube.dim();
        if b != self.bands() {
            return Err(ChromaError::mismatch("cube bands", self.bands(), b));
        }
        let flat = cube.to_shape((h * w, b)).map_err(shape_error)?;
        let mixed = flat.dot(&self.matrix.t());
        mixed
            .into_shape_with_order((h, w, self.channels()))
            .map_err(shape_error)
    }
}

fn shape_error(e: ndarray::ShapeError) -> ChromaError {
    ChromaError::Numerical(format!("reshape failed: {e}"))
}

/// Gaussian channel responses with peaks at `centers_nm`, tabulated on
/// `sampling`.
pub fn gaussian_sensitivities(
    centers_nm: &[f64],
    fwhm_nm: f64,
    sampling: &SpectralSampling,
) -> Result<Vec<SensitivityCurve>> {
    if !(fwhm_nm > 0.0) {
        return Err(ChromaError::invalid("fwhm must be > 0"));
    }
    let sigma = fwhm_nm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
    centers_nm
        .iter()
        .map(|&c| {
            let values = sampling
                .wavelengths_nm
                .iter()
                .map(|&w| (-0.5 * ((w - c) / sigma).powi(2)).exp())
                .collect();
            SensitivityCurve::new(sampling.wavelengths_nm.clone(), values)
        })
        .collect()
}

/// Sensitivity-weighted mean wavelength of each channel.
pub fn channel_wavelengths(weights: &ColorWeights, sampling: &SpectralSampling) -> Result<Vec<f64>> {
    if weights.bands() != sampling.len() {
        return Err(ChromaError::mismatch("weight bands", sampling.len(), weights.bands()));
    }
    weights
        .matrix
        .axis_iter(Axis(0))
        .map(|row| {
            let total: f64 = row.sum();
            if total <= 0.0 {
                return Err(ChromaError::invalid("channel has no positive response"));
            }
            let moment: f64 = row.iter().zip(&sampling.wavelengths_nm).map(|(w, l)| w * l).sum();
            Ok(moment / total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_sampling_includes_end() {
        let s = SpectralSampling::uniform(400.0, 700.0, 10.0).unwrap();
        assert_eq!(s.len(), 31);
        assert_eq!(s.wavelengths_nm[30], 700.0);
        let total: f64 = s.band_widths().iter().sum();
        assert_relative_eq!(total, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn non_increasing_wavelengths_are_rejected() {
        assert!(SpectralSampling::new(vec![500.0, 500.0]).is_err());
        assert!(SpectralSampling::new(vec![]).is_err());
    }

    #[test]
    fn curve_interpolates_and_vanishes_outside() {
        let c = SensitivityCurve::new(vec![400.0, 500.0, 600.0], vec![0.0, 1.0, 0.5]).unwrap();
        assert_relative_eq!(c.sample(450.0), 0.5);
        assert_relative_eq!(c.sample(600.0), 0.5);
        assert_relative_eq!(c.sample(550.0), 0.75);
        assert_eq!(c.sample(399.0), 0.0);
        assert_eq!(c.sample(650.0), 0.0);
    }

    #[test]
    fn row_sum_normalisation() {
        let s = SpectralSampling::uniform(400.0, 700.0, 10.0).unwrap();
        let curves = gaussian_sensitivities(&[460.0, 540.0, 610.0], 60.0, &s).unwrap();
        let w = ColorWeights::from_sensitivities(&curves, &s, WeightNormalization::RowSum).unwrap();
        assert_eq!((w.channels(), w.bands()), (3, 31));
        for row in w.matrix.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        let centres = channel_wavelengths(&w, &s).unwrap();
        assert_relative_eq!(centres[1], 540.0, epsilon = 1.0);
        assert!(centres[0] < centres[1] && centres[1] < centres[2]);
    }

    #[test]
    fn max_row_sum_keeps_relative_gain() {
        let s = SpectralSampling::uniform(400.0, 700.0, 10.0).unwrap();
        let mut curves = gaussian_sensitivities(&[500.0, 600.0], 50.0, &s).unwrap();
        curves[1].values.iter_mut().for_each(|v| *v *= 0.5);
        let w = ColorWeights::from_sensitivities(&curves, &s, WeightNormalization::MaxRowSum).unwrap();
        let sums = w.matrix.sum_axis(Axis(1));
        assert_relative_eq!(sums[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(sums[1], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn projection_mixes_bands() {
        let w = ColorWeights::from_matrix(ndarray::array![[0.5, 0.5, 0.0], [0.0, 0.0, 1.0]]).unwrap();
        let cube = Cube::from_shape_fn((2, 3, 3), |(r, c, b)| (r + c + b) as f64);
        let out = w.project(&cube).unwrap();
        assert_eq!(out.dim(), (2, 3, 2));
        assert_relative_eq!(out[[1, 2, 0]], 3.5);
        assert_relative_eq!(out[[1, 2, 1]], 5.0);
        assert!(w.project(&Cube::zeros((2, 2, 4))).is_err());
    }
}
