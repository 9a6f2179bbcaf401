//! Bayer colour-filter mosaics.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};
use crate::{Cube, Plane};

/// 2×2 colour-filter layout, named by the top-left cell in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BayerPattern {
    #[default]
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl BayerPattern {
    pub const ALL: [BayerPattern; 4] = [Self::Rggb, Self::Bggr, Self::Grbg, Self::Gbrg];

    /// Channel (0 = R, 1 = G, 2 = B) sampled at `(row, col)`.
    pub fn channel_at(self, row: usize, col: usize) -> usize {
        let cell = match self {
            Self::Rggb => [[0, 1], [1, 2]],
            Self::Bggr => [[2, 1], [1, 0]],
            Self::Grbg => [[1, 0], [2, 1]],
            Self::Gbrg => [[1, 2], [0, 1]],
        };
        cell[row % 2][col % 2]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rggb => "rggb",
            Self::Bggr => "bggr",
            Self::Grbg => "grbg",
            Self::Gbrg => "gbrg",
        }
    }
}

impl FromStr for BayerPattern {
    type Err = ChromaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChromaError::invalid(format!("unknown Bayer pattern '{s}'")))
    }
}

/// Baseline demosaicking algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemosaicMethod {
    /// Normalised 1-2-1 interpolation of same-colour neighbours.
    Bilinear,
    /// Each 2×2 cell replicates its samples.
    Nearest,
}

impl DemosaicMethod {
    pub const ALL: [DemosaicMethod; 2] = [Self::Bilinear, Self::Nearest];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Nearest => "nearest",
        }
    }
}

impl FromStr for DemosaicMethod {
    type Err = ChromaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChromaError::invalid(format!("unknown demosaic method '{s}'")))
    }
}

/// Keep, at each pixel, the channel selected by `pattern`.
pub fn mosaic(cube: &Cube, pattern: BayerPattern) -> Result<Plane> {
    let (h, w, c) = cube.dim();
    if c != 3 {
        return Err(ChromaError::mismatch("mosaic channels", 3, c));
    }
    Ok(Plane::from_shape_fn((h, w), |(r, col)| {
        cube[[r, col, pattern.channel_at(r, col)]]
    }))
}

/// Reconstruct a 3-channel image from a Bayer mosaic.
pub fn demosaic(raw: &Plane, pattern: BayerPattern, method: DemosaicMethod) -> Cube {
    match method {
        DemosaicMethod::Bilinear => demosaic_bilinear(raw, pattern),
        DemosaicMethod::Nearest => demosaic_nearest(raw, pattern),
    }
}

fn demosaic_bilinear(raw: &Plane, pattern: BayerPattern) -> Cube {
    const K: [f64; 3] = [1.0, 2.0, 1.0];
    let (h, w) = raw.dim();
    let mut out = Cube::zeros((h, w, 3));
    for r in 0..h {
        for c in 0..w {
            let own = pattern.channel_at(r, c);
            let mut acc = [0.0f64; 3];
            let mut norm = [0.0f64; 3];
            for (dr, kr) in K.iter().enumerate() {
                let Some(rr) = (r + dr).checked_sub(1).filter(|&v| v < h) else {
                    continue;
                };
                for (dc, kc) in K.iter().enumerate() {
                    let Some(cc) = (c + dc).checked_sub(1).filter(|&v| v < w) else {
                        continue;
                    };
                    let ch = pattern.channel_at(rr, cc);
                    acc[ch] += kr * kc * raw[[rr, cc]];
                    norm[ch] += kr * kc;
                }
            }
            for ch in 0..3 {
                out[[r, c, ch]] = if ch == own {
                    raw[[r, c]]
                } else if norm[ch] > 0.0 {
                    acc[ch] / norm[ch]
                } else {
                    0.0
                };
            }
        }
    }
    out
}

fn demosaic_nearest(raw: &Plane, pattern: BayerPattern) -> Cube {
    let (h, w) = raw.dim();
    // Cell origin; an odd trailing row/column borrows the previous cell.
    let origin = |i: usize, n: usize| {
        let o = i - i % 2;
        if o + 1 >= n && o >= 2 {
            o - 2
        } else {
            o
        }
    };
    let mut out = Cube::zeros((h, w, 3));
    for r in 0..h {
        for c in 0..w {
            let (r0, c0) = (origin(r, h), origin(c, w));
            let mut acc = [0.0f64; 3];
            let mut count = [0usize; 3];
            for rr in r0..(r0 + 2).min(h) {
                for cc in c0..(c0 + 2).min(w) {
                    let ch = pattern.channel_at(rr, cc);
                    acc[ch] += raw[[rr, cc]];
                    count[ch] += 1;
                }
            }
            for ch in 0..3 {
                if count[ch] > 0 {
                    out[[r, c, ch]] = acc[ch] / count[ch] as f64;
                }
            }
        }
    }
    out
}
