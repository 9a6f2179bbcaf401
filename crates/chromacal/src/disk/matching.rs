//! Disk correspondences between channels.

use super::fit::DiskFit;
use crate::dispersion::DispersionSample;
use crate::error::{ChromaError, Result};

fn nearest(p: [f64; 2], candidates: &[DiskFit]) -> Option<(usize, f64)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let c = d.center();
            (i, (c[0] - p[0]).hypot(c[1] - p[1]))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Mutual nearest-neighbour pairs `(reference_index, target_index)` whose
/// centres lie within `max_distance` pixels.
pub fn match_disks(
    reference: &[DiskFit],
    target: &[DiskFit],
    max_distance: f64,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, r) in reference.iter().enumerate() {
        let Some((j, d)) = nearest(r.center(), target) else {
            continue;
        };
        if d > max_distance {
            continue;
        }
        if matches!(nearest(target[j].center(), reference), Some((back, _)) if back == i) {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Dispersion samples from disks matched between a reference channel and
/// every channel of `per_channel` (one wavelength per channel).
pub fn correspondences(
    reference: &[DiskFit],
    per_channel: &[Vec<DiskFit>],
    wavelengths_nm: &[f64],
    max_distance: f64,
) -> Result<Vec<DispersionSample>> {
    if per_channel.len() != wavelengths_nm.len() {
        return Err(ChromaError::mismatch(
            "channel wavelengths",
            per_channel.len(),
            wavelengths_nm.len(),
        ));
    }
    if !(max_distance > 0.0) {
        return Err(ChromaError::invalid("max_distance must be > 0"));
    }
    let mut samples = Vec::new();
    for (disks, &wavelength_nm) in per_channel.iter().zip(wavelengths_nm) {
        let pairs = match_disks(reference, disks, max_distance);
        tracing::debug!(
            "{:.1} nm: matched {}/{} reference disks",
            wavelength_nm,
            pairs.len(),
            reference.len()
        );
        samples.extend(pairs.into_iter().map(|(i, j)| DispersionSample {
            reference: reference[i].center(),
            wavelength_nm,
            observed: disks[j].center(),
        }));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conic::Ellipse;
    use crate::disk::CenterMethod;

    fn disk(x: f64, y: f64) -> DiskFit {
        DiskFit {
            ellipse: Ellipse::circle(x, y, 5.0),
            area: 78,
            bbox: [0, 0, 0, 0],
            method: CenterMethod::Moments,
            boundary_rms: None,
        }
    }

    #[test]
    fn mutual_nearest_pairs_only() {
        let reference = vec![disk(10.0, 10.0), disk(40.0, 10.0), disk(70.0, 10.0)];
        // Two targets compete for the first reference disk; one is far away.
        let target = vec![
            disk(11.0, 10.0),
            disk(12.5, 10.0),
            disk(41.0, 11.0),
            disk(200.0, 0.0),
        ];
        let pairs = match_disks(&reference, &target, 5.0);
        assert_eq!(pairs, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn correspondences_carry_wavelengths() {
        let reference = vec![disk(10.0, 10.0), disk(40.0, 10.0)];
        let channels = vec![
            vec![disk(9.0, 10.0), disk(39.0, 10.0)],
            reference.clone(),
        ];
        let samples = correspondences(&reference, &channels, &[450.0, 550.0], 3.0).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].wavelength_nm, 450.0);
        assert_eq!(samples[0].observed, [9.0, 10.0]);
        assert_eq!(samples[3].reference, samples[3].observed);
    }

    #[test]
    fn wavelength_count_must_match_channels() {
        let reference = vec![disk(10.0, 10.0)];
        assert!(correspondences(&reference, &[reference.clone()], &[450.0, 550.0], 3.0).is_err());
    }
}
