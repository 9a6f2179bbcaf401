use serde::{Deserialize, Serialize};

use crate::error::{ChromaError, Result};

/// How the foreground threshold is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Otsu,
    /// Intensity on the `[0, 1]` input scale.
    Fixed(f64),
}

/// Whether disks are brighter or darker than the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    BrightOnDark,
    DarkOnBright,
}

/// Estimator for the per-disk ellipse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterMethod {
    /// Second-order moments of the component pixels.
    Moments,
    /// Direct conic fit to the component outline.
    BoundaryConic,
}

/// Disk detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskFitConfig {
    pub threshold: Threshold,
    pub polarity: Polarity,
    /// Opening radius (L∞ norm) removing specks; 0 disables.
    pub open_radius: u8,
    /// Closing radius (L∞ norm) filling pinholes; 0 disables.
    pub close_radius: u8,
    /// Component area bounds in pixels.
    pub min_area: usize,
    pub max_area: usize,
    /// Drop components touching the image border.
    pub exclude_border: bool,
    pub center_method: CenterMethod,
}

impl Default for DiskFitConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::Otsu,
            polarity: Polarity::BrightOnDark,
            open_radius: 1,
            close_radius: 1,
            min_area: 12,
            max_area: 1_000_000,
            exclude_border: true,
            center_method: CenterMethod::Moments,
        }
    }
}

impl DiskFitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_area > self.max_area {
            return Err(ChromaError::invalid(format!(
                "min_area {} exceeds max_area {}",
                self.min_area, self.max_area
            )));
        }
        if let Threshold::Fixed(t) = self.threshold {
            if !t.is_finite() {
                return Err(ChromaError::invalid("fixed threshold must be finite"));
            }
        }
        Ok(())
    }
}
