//! Per-component ellipse estimation.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::config::{CenterMethod, DiskFitConfig};
use super::segment::segment;
use crate::conic::{fit_ellipse_direct, rms_sampson_distance, Ellipse};
use crate::error::{ChromaError, Result};
use crate::Cube;

/// One detected calibration disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskFit {
    pub ellipse: Ellipse,
    /// Component area in pixels.
    pub area: usize,
    /// Inclusive bounding box `[x_min, y_min, x_max, y_max]`.
    pub bbox: [u32; 4],
    /// Estimator that produced `ellipse`.
    pub method: CenterMethod,
    /// RMS Sampson distance of the outline points (boundary fits only).
    pub boundary_rms: Option<f64>,
}

impl DiskFit {
    pub fn center(&self) -> [f64; 2] {
        self.ellipse.center()
    }
}

#[derive(Default, Clone)]
struct Accum {
    n: usize,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    bbox: [u32; 4],
    touches_border: bool,
}

impl Accum {
    fn push(&mut self, x: u32, y: u32, w: u32, h: u32) {
        if self.n == 0 {
            self.bbox = [x, y, x, y];
        } else {
            self.bbox[0] = self.bbox[0].min(x);
            self.bbox[1] = self.bbox[1].min(y);
            self.bbox[2] = self.bbox[2].max(x);
            self.bbox[3] = self.bbox[3].max(y);
        }
        let (xf, yf) = (x as f64, y as f64);
        self.n += 1;
        self.sx += xf;
        self.sy += yf;
        self.sxx += xf * xf;
        self.syy += yf * yf;
        self.sxy += xf * yf;
        self.touches_border |= x == 0 || y == 0 || x + 1 == w || y + 1 == h;
    }

    /// Moment ellipse; the 1/12 term is the variance of a unit pixel.
    fn ellipse(&self) -> Option<Ellipse> {
        let n = self.n as f64;
        let (mx, my) = (self.sx / n, self.sy / n);
        let mxx = self.sxx / n - mx * mx + 1.0 / 12.0;
        let myy = self.syy / n - my * my + 1.0 / 12.0;
        let mxy = self.sxy / n - mx * my;
        Ellipse::from_second_moments(mx, my, mxx, myy, mxy)
    }
}

/// Sub-pixel outline of component `label`: midpoints between each member
/// pixel and its 4-neighbours outside the component.
fn outline_points(
    labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    label: u32,
    bbox: [u32; 4],
) -> Vec<[f64; 2]> {
    let (w, h) = labels.dimensions();
    let mut pts = Vec::new();
    for y in bbox[1]..=bbox[3] {
        for x in bbox[0]..=bbox[2] {
            if labels.get_pixel(x, y)[0] != label {
                continue;
            }
            let neighbours = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)];
            for (dx, dy) in neighbours {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                let outside = nx < 0
                    || ny < 0
                    || nx >= w as i64
                    || ny >= h as i64
                    || labels.get_pixel(nx as u32, ny as u32)[0] != label;
                if outside {
                    pts.push([x as f64 + 0.5 * dx as f64, y as f64 + 0.5 * dy as f64]);
                }
            }
        }
    }
    pts
}

/// Detect disks in `mask`, a binary image from [`segment`].
pub fn fit_mask(mask: &GrayImage, config: &DiskFitConfig) -> Vec<DiskFit> {
    let (w, h) = mask.dimensions();
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let n_labels = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut accums = vec![Accum::default(); n_labels + 1];
    for (x, y, p) in labels.enumerate_pixels() {
        let l = p[0] as usize;
        if l != 0 {
            accums[l].push(x, y, w, h);
        }
    }

    let mut rejected = 0usize;
    let mut disks = Vec::new();
    for (label, acc) in accums.iter().enumerate().skip(1) {
        if acc.n < config.min_area
            || acc.n > config.max_area
            || (config.exclude_border && acc.touches_border)
        {
            rejected += 1;
            continue;
        }
        let Some(moments) = acc.ellipse() else {
            rejected += 1;
            continue;
        };
        let mut fit = DiskFit {
            ellipse: moments,
            area: acc.n,
            bbox: acc.bbox,
            method: CenterMethod::Moments,
            boundary_rms: None,
        };
        if config.center_method == CenterMethod::BoundaryConic {
            let pts = outline_points(&labels, label as u32, acc.bbox);
            match fit_ellipse_direct(&pts) {
                // Reject conic fits that wander away from the blob.
                Some(e) if (e.cx - moments.cx).hypot(e.cy - moments.cy) < moments.b => {
                    fit.boundary_rms = Some(rms_sampson_distance(&e, &pts));
                    fit.ellipse = e;
                    fit.method = CenterMethod::BoundaryConic;
                }
                _ => tracing::debug!(
                    "boundary conic fit failed for component {}, keeping moments",
                    label
                ),
            }
        }
        disks.push(fit);
    }
    sort_reading_order(&mut disks);
    tracing::debug!("{} components rejected by area/border/shape filters", rejected);
    disks
}

/// Sort by `(y, x)`: disks whose centres differ in y by less than the
/// median semi-minor axis share a row and are ordered left to right.
fn sort_reading_order(disks: &mut [DiskFit]) {
    if disks.is_empty() {
        return;
    }
    disks.sort_by(|a, b| a.ellipse.cy.total_cmp(&b.ellipse.cy));
    let mut minors: Vec<f64> = disks.iter().map(|d| d.ellipse.b).collect();
    minors.sort_by(f64::total_cmp);
    let tol = minors[minors.len() / 2];
    let mut start = 0;
    for i in 1..=disks.len() {
        if i == disks.len() || disks[i].ellipse.cy - disks[start].ellipse.cy >= tol {
            disks[start..i].sort_by(|a, b| a.ellipse.cx.total_cmp(&b.ellipse.cx));
            start = i;
        }
    }
}

/// Detect and fit disks in a single-channel `[0, 1]` image.
pub fn fit_disks(plane: &ArrayView2<f64>, config: &DiskFitConfig) -> Result<Vec<DiskFit>> {
    let mask = segment(plane, config)?;
    let disks = fit_mask(&mask, config);
    tracing::info!("{} disks found", disks.len());
    Ok(disks)
}

/// [`fit_disks`] on every band of `cube`.
pub fn fit_disks_per_channel(cube: &Cube, config: &DiskFitConfig) -> Result<Vec<Vec<DiskFit>>> {
    if cube.len_of(Axis(2)) == 0 {
        return Err(ChromaError::invalid("cube has no channels"));
    }
    cube.axis_iter(Axis(2))
        .enumerate()
        .map(|(c, band)| -> Result<Vec<DiskFit>> {
            let disks = fit_disks(&band, config)?;
            tracing::debug!("channel {}: {} disks", c, disks.len());
            Ok(disks)
        })
        .collect()
}
