use ndarray::{Axis, Zip};

use super::model::DispersionModel;
use crate::error::{ChromaError, Result};
use crate::numeric::bilinear_clamped;
use crate::Cube;

/// Align every band of `cube` to the reference frame of `model`.
///
/// Output pixel `p` of band `k` is band `k` of the input sampled at
/// `model.map(p, wavelengths_nm[k])` (bilinear, border clamped).
pub fn correct_image(
    cube: &Cube,
    wavelengths_nm: &[f64],
    model: &DispersionModel,
) -> Result<Cube> {
    model.validate()?;
    let bands = cube.len_of(Axis(2));
    if bands != wavelengths_nm.len() {
        return Err(ChromaError::mismatch("band wavelengths", bands, wavelengths_nm.len()));
    }
    let mut out = Cube::zeros(cube.raw_dim());
    for (k, &wl) in wavelengths_nm.iter().enumerate() {
        let src = cube.index_axis(Axis(2), k);
        let mut dst = out.index_axis_mut(Axis(2), k);
        Zip::indexed(&mut dst).for_each(|(row, col), v| {
            let q = model.map([col as f64, row as f64], wl);
            *v = bilinear_clamped(&src, q[0], q[1]);
        });
        tracing::debug!(
            "band {} ({:.1} nm): max displacement {:.3} px",
            k,
            wl,
            model.max_displacement([cube.dim().1, cube.dim().0], wl)
        );
    }
    Ok(out)
}
