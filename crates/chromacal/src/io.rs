//! File interchange: images in, images and JSON out.
//!
//! Images are decoded with the `image` crate and normalised to `[0, 1]`
//! regardless of bit depth. Written images are always 16-bit so calibrated
//! intermediate results survive a round trip without banding.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use ndarray::{Array2, Array3};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ChromaError, Result};
use crate::{Cube, Plane};

/// Load an image as a cube with 1 (gray) or 3 (colour) channels.
pub fn load_cube(path: &Path) -> Result<Cube> {
    let img = image::open(path)?;
    tracing::debug!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );
    dynamic_to_cube(&img)
}

/// Load an image as a single plane (colour images are converted to luma).
pub fn load_plane(path: &Path) -> Result<Plane> {
    let img = image::open(path)?;
    let luma = img.to_luma32f();
    let (w, h) = luma.dimensions();
    let data: Vec<f64> = luma.into_raw().into_iter().map(f64::from).collect();
    let (h, w) = (h as usize, w as usize);
    let len = data.len();
    Array2::from_shape_vec((h, w), data)
        .map_err(|_| ChromaError::mismatch("image samples", h * w, len))
}

pub(crate) fn dynamic_to_cube(img: &DynamicImage) -> Result<Cube> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    if img.color().has_color() {
        let rgb = img.to_rgb32f();
        samples_to_cube(rgb.into_raw(), [h, w, 3])
    } else {
        let luma = img.to_luma32f();
        samples_to_cube(luma.into_raw(), [h, w, 1])
    }
}

/// Interleaved `[row, col, channel]` samples as a cube of `shape`.
fn samples_to_cube(samples: Vec<f32>, shape: [usize; 3]) -> Result<Cube> {
    let len = samples.len();
    let data: Vec<f64> = samples.into_iter().map(f64::from).collect();
    Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)
        .map_err(|_| ChromaError::mismatch("image samples", shape[0] * shape[1] * shape[2], len))
}

fn to_u16(v: f64) -> u16 {
    if !v.is_finite() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// Save a 1- or 3-channel cube as a 16-bit image. The format follows the
/// file extension.
pub fn save_cube(path: &Path, cube: &Cube) -> Result<()> {
    let (h, w, c) = cube.dim();
    match c {
        1 => save_plane(path, &cube.index_axis(ndarray::Axis(2), 0).to_owned()),
        3 => {
            let mut buf = ImageBuffer::<Rgb<u16>, Vec<u16>>::new(w as u32, h as u32);
            for ((row, col, ch), &v) in cube.indexed_iter() {
                buf.get_pixel_mut(col as u32, row as u32)[ch] = to_u16(v);
            }
            buf.save(path)?;
            Ok(())
        }
        other => Err(ChromaError::invalid(format!(
            "cannot encode a {other}-channel cube as an image (need 1 or 3)"
        ))),
    }
}

/// Save a plane as a 16-bit grayscale image.
pub fn save_plane(path: &Path, plane: &Plane) -> Result<()> {
    let (h, w) = plane.dim();
    let mut buf = ImageBuffer::<Luma<u16>, Vec<u16>>::new(w as u32, h as u32);
    for ((row, col), &v) in plane.indexed_iter() {
        buf.put_pixel(col as u32, row as u32, Luma([to_u16(v)]));
    }
    buf.save(path)?;
    Ok(())
}

/// Read a JSON document into `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Write `value` as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
