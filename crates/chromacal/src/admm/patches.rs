use std::ops::Range;

use ndarray::{s, ArrayView3};
use serde::{Deserialize, Serialize};

use super::config::{AdmmConfig, PatchConfig};
use super::problem::ReconstructionProblem;
use super::solver::solve_admm;
use crate::error::{ChromaError, Result};
use crate::Cube;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSolution {
    /// Reconstructed `[row, col, band]` cube in the reference frame.
    pub cube: Cube,
    pub n_patches: usize,
    pub n_converged: usize,
    pub mean_iterations: f64,
}

/// A tile interior and the padded window solved around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tile {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    pub padded_rows: Range<usize>,
    pub padded_cols: Range<usize>,
}

pub(crate) fn tiles(height: usize, width: usize, config: &PatchConfig) -> Vec<Tile> {
    let step = config.patch_size;
    let pad = config.padding;
    let mut out = Vec::new();
    for r0 in (0..height).step_by(step) {
        let r1 = (r0 + step).min(height);
        for c0 in (0..width).step_by(step) {
            let c1 = (c0 + step).min(width);
            out.push(Tile {
                rows: r0..r1,
                cols: c0..c1,
                padded_rows: r0.saturating_sub(pad)..(r1 + pad).min(height),
                padded_cols: c0.saturating_sub(pad)..(c1 + pad).min(width),
            });
        }
    }
    out
}

/// Reconstruct the full latent cube tile by tile.
///
/// Each tile is solved on its padded window with the forward model placed at
/// the window's global offset, and only the interior is kept.
pub fn solve_patches(
    problem: &ReconstructionProblem,
    admm: &AdmmConfig,
    patches: &PatchConfig,
) -> Result<PatchSolution> {
    problem.validate()?;
    patches.validate()?;
    let bands = problem.bands();
    admm.validate(bands)?;
    let (height, width) = problem.observation.dim();
    let tiles = tiles(height, width, patches);
    tracing::info!(
        "reconstructing {}x{}x{} cube in {} patches ({} px, padding {})",
        height,
        width,
        bands,
        tiles.len(),
        patches.patch_size,
        patches.padding
    );

    let mut cube = Cube::zeros((height, width, bands));
    let mut n_converged = 0usize;
    let mut total_iterations = 0usize;
    for (i, tile) in tiles.iter().enumerate() {
        let (ph, pw) = (tile.padded_rows.len(), tile.padded_cols.len());
        let origin = [tile.padded_rows.start, tile.padded_cols.start];
        let operator = problem.operator(origin, [ph, pw]);
        let b = problem
            .observation
            .window(tile.padded_rows.clone(), tile.padded_cols.clone());
        let result = solve_admm(&operator, &b, [ph, pw, bands], admm, None)?;
        if result.converged {
            n_converged += 1;
        }
        total_iterations += result.iterations;

        let solved = ArrayView3::from_shape((ph, pw, bands), &result.x)
            .map_err(|e| ChromaError::Numerical(format!("patch {i}: {e}")))?;
        let r = tile.rows.start - origin[0]..tile.rows.end - origin[0];
        let c = tile.cols.start - origin[1]..tile.cols.end - origin[1];
        cube.slice_mut(s![tile.rows.clone(), tile.cols.clone(), ..])
            .assign(&solved.slice(s![r, c, ..]));
        tracing::debug!(
            "patch {}/{} rows {:?} cols {:?}: {} iterations, converged={}",
            i + 1,
            tiles.len(),
            tile.rows,
            tile.cols,
            result.iterations,
            result.converged
        );
    }

    let n_patches = tiles.len();
    if n_converged < n_patches {
        tracing::warn!(
            "{} of {} patches hit max_iters={}",
            n_patches - n_converged,
            n_patches,
            admm.max_iters
        );
    }
    Ok(PatchSolution {
        cube,
        n_patches,
        n_converged,
        mean_iterations: total_iterations as f64 / n_patches.max(1) as f64,
    })
}
