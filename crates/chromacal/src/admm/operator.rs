//! Linear operators acting on flattened `[row, col, band]` cubes.

use crate::color::ColorWeights;
use crate::dispersion::DispersionModel;
use crate::mosaic::BayerPattern;
use crate::numeric::bilinear_taps;

use super::problem::SpectralWarp;

/// Matrix-free linear map `y = A x` with its adjoint `x = Aᵀ y`.
pub trait LinearOperator {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;
    /// Overwrite `y` with `A x`.
    fn apply(&self, x: &[f64], y: &mut [f64]);
    /// Overwrite `x` with `Aᵀ y`.
    fn adjoint(&self, y: &[f64], x: &mut [f64]);
}

/// Sparse bilinear resampling rows in compressed form: row `i` owns
/// `entries[offsets[i]..offsets[i + 1]]`.
#[derive(Debug, Clone)]
struct WarpTaps {
    offsets: Vec<usize>,
    entries: Vec<(usize, f64)>,
}

impl WarpTaps {
    fn row(&self, i: usize) -> &[(usize, f64)] {
        &self.entries[self.offsets[i]..self.offsets[i + 1]]
    }
}

/// Weight deficit above which a bilinear footprint counts as clipped.
const FOOTPRINT_TOL: f64 = 1e-9;

/// Forward model `A = M · Ω · Φ` for one image tile.
///
/// `Φ` resamples each band of the latent (reference-frame) cube at the
/// inverse dispersion map, `Ω` mixes bands into camera channels and `M`
/// keeps the Bayer channel of each pixel for RAW observations. Pixel
/// positions are global, so the Bayer phase and the dispersion field are
/// consistent across tiles.
///
/// A pixel whose resampling footprint leaves the tile in any band is not
/// modelled: its rows of `A` are zero, so the observation there does not
/// constrain the solve.
#[derive(Debug, Clone)]
pub struct ImagingOperator {
    height: usize,
    width: usize,
    bands: usize,
    weights: ColorWeights,
    pattern: Option<BayerPattern>,
    origin: [usize; 2],
    /// One tap table per band; `None` when there is no dispersion.
    warp: Option<Vec<WarpTaps>>,
    /// Per-pixel flag, `false` where the footprint is clipped.
    observed: Option<Vec<bool>>,
}

impl ImagingOperator {
    /// Operator for the `size = [height, width]` tile whose top-left pixel is
    /// `origin = [row, col]` in the full image. `pattern` selects a RAW
    /// observation; `None` observes every channel.
    pub fn new(
        weights: &ColorWeights,
        pattern: Option<BayerPattern>,
        warp: Option<&SpectralWarp>,
        origin: [usize; 2],
        size: [usize; 2],
    ) -> Self {
        let [height, width] = size;
        let bands = weights.bands();
        let mut observed = None;
        let warp = warp.filter(|w| !w.model.is_identity()).map(|w| {
            let mut complete = vec![true; height * width];
            let taps: Vec<WarpTaps> = w
                .wavelengths_nm
                .iter()
                .map(|&wl| build_taps(&w.model, wl, origin, size, &mut complete))
                .collect();
            let dropped = complete.iter().filter(|&&c| !c).count();
            if dropped > 0 {
                tracing::debug!(
                    "tile at {:?}: {} of {} pixels fall outside the warp footprint",
                    origin,
                    dropped,
                    complete.len()
                );
            }
            observed = Some(complete);
            taps
        });
        Self {
            height,
            width,
            bands,
            weights: weights.clone(),
            pattern,
            origin,
            warp,
            observed,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.bands]
    }

    /// Whether the observation at local pixel `(row, col)` enters the model.
    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        self.observed
            .as_ref()
            .map_or(true, |o| o[row * self.width + col])
    }

    /// Zero the entries of an observation vector that the model ignores.
    pub fn mask_unobserved(&self, y: &mut [f64]) {
        let Some(observed) = &self.observed else {
            return;
        };
        let nc = self.channels_out();
        for (chunk, &o) in y.chunks_mut(nc).zip(observed) {
            if !o {
                chunk.fill(0.0);
            }
        }
    }

    fn channels_out(&self) -> usize {
        if self.pattern.is_some() {
            1
        } else {
            self.weights.channels()
        }
    }

    /// Warped band values at pixel `p` (flat pixel index).
    fn warped(&self, x: &[f64], p: usize, out: &mut [f64]) {
        let nb = self.bands;
        match &self.warp {
            None => out.copy_from_slice(&x[p * nb..(p + 1) * nb]),
            Some(taps) => {
                for (b, t) in taps.iter().enumerate() {
                    out[b] = t
                        .row(p)
                        .iter()
                        .map(|&(src, w)| w * x[src * nb + b])
                        .sum();
                }
            }
        }
    }

    fn scatter(&self, g: &[f64], p: usize, x: &mut [f64]) {
        let nb = self.bands;
        match &self.warp {
            None => {
                for (b, v) in g.iter().enumerate() {
                    x[p * nb + b] += v;
                }
            }
            Some(taps) => {
                for (b, t) in taps.iter().enumerate() {
                    for &(src, w) in t.row(p) {
                        x[src * nb + b] += w * g[b];
                    }
                }
            }
        }
    }

    fn channel_at(&self, row: usize, col: usize) -> Option<usize> {
        self.pattern
            .map(|p| p.channel_at(row + self.origin[0], col + self.origin[1]))
    }
}

/// Resampling rows of one band. Pixels whose bilinear footprint is clipped
/// by the tile, or where the inverse map fails, get an empty row and are
/// cleared in `complete`.
fn build_taps(
    model: &DispersionModel,
    wavelength_nm: f64,
    origin: [usize; 2],
    size: [usize; 2],
    complete: &mut [bool],
) -> WarpTaps {
    let [height, width] = size;
    let mut offsets = Vec::with_capacity(height * width + 1);
    let mut entries = Vec::with_capacity(4 * height * width);
    let mut failed = 0usize;
    offsets.push(0);
    for row in 0..height {
        for col in 0..width {
            let q = [(col + origin[1]) as f64, (row + origin[0]) as f64];
            match model.inverse_map(q, wavelength_nm) {
                Some(p) => {
                    let local = [p[0] - origin[1] as f64, p[1] - origin[0] as f64];
                    let taps = bilinear_taps(local[0], local[1], width, height);
                    let total: f64 = taps.iter().map(|&(_, w)| w).sum();
                    if (1.0 - total).abs() <= FOOTPRINT_TOL {
                        entries.extend(taps);
                    } else {
                        complete[row * width + col] = false;
                    }
                }
                None => {
                    failed += 1;
                    complete[row * width + col] = false;
                }
            }
            offsets.push(entries.len());
        }
    }
    if failed > 0 {
        tracing::warn!(
            "{:.1} nm: dispersion inverse did not converge at {} pixels",
            wavelength_nm,
            failed
        );
    }
    WarpTaps { offsets, entries }
}

impl LinearOperator for ImagingOperator {
    fn input_len(&self) -> usize {
        self.height * self.width * self.bands
    }

    fn output_len(&self) -> usize {
        self.height * self.width * self.channels_out()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let nc = self.channels_out();
        let mut band_values = vec![0.0; self.bands];
        for row in 0..self.height {
            for col in 0..self.width {
                let p = row * self.width + col;
                if !self.is_observed(row, col) {
                    y[p * nc..(p + 1) * nc].fill(0.0);
                    continue;
                }
                self.warped(x, p, &mut band_values);
                match self.channel_at(row, col) {
                    Some(ch) => {
                        let w = self.weights.matrix.row(ch);
                        y[p] = w.iter().zip(&band_values).map(|(a, b)| a * b).sum();
                    }
                    None => {
                        for (ch, w) in self.weights.matrix.rows().into_iter().enumerate() {
                            y[p * nc + ch] = w.iter().zip(&band_values).map(|(a, b)| a * b).sum();
                        }
                    }
                }
            }
        }
    }

    fn adjoint(&self, y: &[f64], x: &mut [f64]) {
        x.fill(0.0);
        let nc = self.channels_out();
        let mut g = vec![0.0; self.bands];
        for row in 0..self.height {
            for col in 0..self.width {
                let p = row * self.width + col;
                if !self.is_observed(row, col) {
                    continue;
                }
                g.fill(0.0);
                match self.channel_at(row, col) {
                    Some(ch) => {
                        for (gb, w) in g.iter_mut().zip(self.weights.matrix.row(ch)) {
                            *gb = w * y[p];
                        }
                    }
                    None => {
                        for (ch, w) in self.weights.matrix.rows().into_iter().enumerate() {
                            let v = y[p * nc + ch];
                            for (gb, wb) in g.iter_mut().zip(w) {
                                *gb += wb * v;
                            }
                        }
                    }
                }
                self.scatter(&g, p, x);
            }
        }
    }
}

/// Regulariser transforms `G_k` on a `[height, width, bands]` cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PriorOperator {
    /// Forward differences along x then y (output `2N`), zero at the far edge.
    SpatialGradient { shape: [usize; 3] },
    /// Forward difference across bands, zero at the last band.
    SpectralGradient { shape: [usize; 3] },
    Identity { len: usize },
}

impl LinearOperator for PriorOperator {
    fn input_len(&self) -> usize {
        match *self {
            Self::SpatialGradient { shape } | Self::SpectralGradient { shape } => {
                shape.iter().product()
            }
            Self::Identity { len } => len,
        }
    }

    fn output_len(&self) -> usize {
        match *self {
            Self::SpatialGradient { .. } => 2 * self.input_len(),
            _ => self.input_len(),
        }
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        match *self {
            Self::Identity { .. } => y.copy_from_slice(x),
            Self::SpectralGradient { shape: [h, w, nb] } => {
                for p in 0..h * w {
                    let base = p * nb;
                    for b in 0..nb {
                        y[base + b] = if b + 1 < nb {
                            x[base + b + 1] - x[base + b]
                        } else {
                            0.0
                        };
                    }
                }
            }
            Self::SpatialGradient { shape: [h, w, nb] } => {
                let n = h * w * nb;
                let (gx, gy) = y.split_at_mut(n);
                for r in 0..h {
                    for c in 0..w {
                        for b in 0..nb {
                            let i = (r * w + c) * nb + b;
                            gx[i] = if c + 1 < w { x[i + nb] - x[i] } else { 0.0 };
                            gy[i] = if r + 1 < h { x[i + w * nb] - x[i] } else { 0.0 };
                        }
                    }
                }
            }
        }
    }

    fn adjoint(&self, y: &[f64], x: &mut [f64]) {
        match *self {
            Self::Identity { .. } => x.copy_from_slice(y),
            Self::SpectralGradient { shape: [h, w, nb] } => {
                for p in 0..h * w {
                    let base = p * nb;
                    for b in 0..nb {
                        let from_prev = if b >= 1 { y[base + b - 1] } else { 0.0 };
                        let own = if b + 1 < nb { y[base + b] } else { 0.0 };
                        x[base + b] = from_prev - own;
                    }
                }
            }
            Self::SpatialGradient { shape: [h, w, nb] } => {
                let n = h * w * nb;
                let (gx, gy) = y.split_at(n);
                for r in 0..h {
                    for c in 0..w {
                        for b in 0..nb {
                            let i = (r * w + c) * nb + b;
                            let mut v = 0.0;
                            if c + 1 < w {
                                v -= gx[i];
                            }
                            if c >= 1 {
                                v += gx[i - nb];
                            }
                            if r + 1 < h {
                                v -= gy[i];
                            }
                            if r >= 1 {
                                v += gy[i - w * nb];
                            }
                            x[i] = v;
                        }
                    }
                }
            }
        }
    }
}
