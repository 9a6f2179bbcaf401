//! Disk calibration-target detection.
//!
//! Pipeline: threshold (Otsu or fixed) → morphological opening/closing →
//! 8-connected components → area/border filters → per-component ellipse
//! from second moments, optionally refined by a direct conic fit to the
//! component outline. Disk centres matched across channels feed the
//! dispersion fit.

mod config;
mod fit;
mod matching;
mod segment;

pub use config::{CenterMethod, DiskFitConfig, Polarity, Threshold};
pub use fit::{fit_disks, fit_disks_per_channel, fit_mask, DiskFit};
pub use matching::{correspondences, match_disks};
pub use segment::{otsu_threshold, segment};
