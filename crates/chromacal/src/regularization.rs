//! Regularisation-weight selection for the ADMM priors.
//!
//! [`grid_search`] reconstructs the image for every combination of prior
//! weights and records the data residual and the unweighted penalty of each
//! prior: one point on the L-hypersurface per combination. A weight set is
//! then picked by the minimum distance function (nearest point to the utopia
//! point after log-scaling and normalising every criterion), by the corner of
//! a one-dimensional L-curve, or by the error against a reference cube when
//! one is available.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::admm::{objective_terms, solve_patches, AdmmConfig, PatchConfig, ReconstructionProblem};
use crate::error::{ChromaError, Result};
use crate::Cube;

/// `n` values `10^e` with `e` evenly spaced over `[start_exp, end_exp]`.
pub fn logspace(start_exp: f64, end_exp: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exp)],
        _ => (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                10f64.powf(start_exp + t * (end_exp - start_exp))
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSearchConfig {
    /// Candidate weights, one axis per prior in prior order.
    pub axes: Vec<Vec<f64>>,
    /// Ground truth for `error_rmse`.
    #[serde(skip)]
    pub reference: Option<Cube>,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            axes: vec![logspace(-4.0, -1.0, 4), logspace(-4.0, -1.0, 4)],
            reference: None,
        }
    }
}

impl GridSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            return Err(ChromaError::invalid("grid search needs at least one axis"));
        }
        for (k, axis) in self.axes.iter().enumerate() {
            if axis.is_empty() {
                return Err(ChromaError::invalid(format!("weight axis {k} is empty")));
            }
            if !axis.iter().all(|w| w.is_finite() && *w >= 0.0) {
                return Err(ChromaError::invalid(format!(
                    "weight axis {k} has negative or non-finite values"
                )));
            }
        }
        Ok(())
    }

    pub fn n_points(&self) -> usize {
        self.axes.iter().map(Vec::len).product()
    }

    /// Cartesian product of the axes, last axis fastest.
    pub fn combinations(&self) -> Vec<Vec<f64>> {
        let mut out: Vec<Vec<f64>> = vec![Vec::new()];
        for axis in &self.axes {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    axis.iter().map(move |&w| {
                        let mut next = prefix.clone();
                        next.push(w);
                        next
                    })
                })
                .collect();
        }
        out
    }
}

/// One evaluated weight combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LPoint {
    pub weights: Vec<f64>,
    /// `‖A x − b‖₂` over the whole image.
    pub data_residual: f64,
    /// Unweighted `R_k(G_k x)`, one per prior.
    pub penalties: Vec<f64>,
    pub error_rmse: Option<f64>,
    /// Mean ADMM iterations per patch.
    pub iterations: f64,
}

impl LPoint {
    fn criteria(&self) -> impl Iterator<Item = f64> + '_ {
        std::iter::once(self.data_residual).chain(self.penalties.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchReport {
    /// `kind_norm` label of every prior.
    pub prior_labels: Vec<String>,
    pub points: Vec<LPoint>,
    pub pareto: Vec<usize>,
    pub mdf_index: Option<usize>,
    pub corner_index: Option<usize>,
    pub best_error_index: Option<usize>,
}

impl GridSearchReport {
    pub fn from_points(prior_labels: Vec<String>, points: Vec<LPoint>) -> Self {
        let best_error_index = points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.error_rmse.map(|e| (i, e)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);
        Self {
            prior_labels,
            pareto: pareto_front(&points),
            mdf_index: minimum_distance_index(&points),
            corner_index: lcurve_corner(&points),
            best_error_index,
            points,
        }
    }

    /// Selected weights: best error when a reference was given, else MDF.
    pub fn selected(&self) -> Option<&LPoint> {
        self.best_error_index
            .or(self.mdf_index)
            .map(|i| &self.points[i])
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        let mut header: Vec<String> = self.prior_labels.iter().map(|l| format!("w_{l}")).collect();
        header.push("data_residual".into());
        header.extend(self.prior_labels.iter().map(|l| format!("penalty_{l}")));
        header.extend(
            ["error_rmse", "iterations", "pareto", "mdf", "corner"]
                .iter()
                .map(|s| s.to_string()),
        );
        wtr.write_record(&header)?;

        let flag = |hit: bool| if hit { "1" } else { "0" }.to_string();
        for (i, p) in self.points.iter().enumerate() {
            let mut record: Vec<String> = p.weights.iter().map(|w| format!("{w:.6e}")).collect();
            record.push(format!("{:.10e}", p.data_residual));
            record.extend(p.penalties.iter().map(|v| format!("{v:.10e}")));
            record.push(p.error_rmse.map(|e| format!("{e:.10e}")).unwrap_or_default());
            record.push(format!("{:.2}", p.iterations));
            record.push(flag(self.pareto.contains(&i)));
            record.push(flag(self.mdf_index == Some(i)));
            record.push(flag(self.corner_index == Some(i)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Reconstruct `problem` for every weight combination of `config`.
pub fn grid_search(
    problem: &ReconstructionProblem,
    base_admm: &AdmmConfig,
    patches: &PatchConfig,
    config: &GridSearchConfig,
) -> Result<GridSearchReport> {
    config.validate()?;
    problem.validate()?;
    if config.axes.len() != base_admm.priors.len() {
        return Err(ChromaError::mismatch(
            "weight axes",
            base_admm.priors.len(),
            config.axes.len(),
        ));
    }
    let (h, w) = problem.observation.dim();
    let bands = problem.bands();
    if let Some(reference) = &config.reference {
        if reference.dim() != (h, w, bands) {
            return Err(ChromaError::mismatch("reference cube", (h, w, bands), reference.dim()));
        }
    }

    let operator = problem.operator([0, 0], [h, w]);
    let mut b = problem.observation.window(0..h, 0..w);
    operator.mask_unobserved(&mut b);
    let combos = config.combinations();
    let mut points = Vec::with_capacity(combos.len());
    for (i, weights) in combos.into_iter().enumerate() {
        let admm = base_admm.with_weights(&weights)?;
        let solution = solve_patches(problem, &admm, patches)?;
        let x = solution
            .cube
            .as_slice()
            .ok_or_else(|| ChromaError::Numerical("solution cube is not contiguous".into()))?;
        let terms = objective_terms(&operator, &b, x, &admm.priors, [h, w, bands])?;
        let error_rmse = config.reference.as_ref().map(|r| {
            let sq: f64 = r.iter().zip(x).map(|(a, b)| (a - b).powi(2)).sum();
            (sq / r.len() as f64).sqrt()
        });
        tracing::info!(
            "grid point {}/{} weights {:?}: residual {:.4e}, penalties {:?}",
            i + 1,
            config.n_points(),
            weights,
            terms.data_residual,
            terms.penalties
        );
        points.push(LPoint {
            weights,
            data_residual: terms.data_residual,
            penalties: terms.penalties,
            error_rmse,
            iterations: solution.mean_iterations,
        });
    }

    let labels = base_admm.priors.iter().map(|p| p.label()).collect();
    let report = GridSearchReport::from_points(labels, points);
    if let Some(p) = report.selected() {
        tracing::info!("selected weights {:?}", p.weights);
    }
    Ok(report)
}

/// Indices of points not dominated in `(residual, penalties…)`.
pub fn pareto_front(points: &[LPoint]) -> Vec<usize> {
    let dominates = |a: &LPoint, b: &LPoint| {
        let mut strictly = false;
        for (x, y) in a.criteria().zip(b.criteria()) {
            if x > y {
                return false;
            }
            strictly |= x < y;
        }
        strictly
    };
    (0..points.len())
        .filter(|&i| !points.iter().any(|q| dominates(q, &points[i])))
        .collect()
}

fn log_floor(v: f64) -> f64 {
    v.max(f64::MIN_POSITIVE).ln()
}

/// Minimum distance function: log-scale every criterion, normalise it to
/// `[0, 1]` over the point set and return the point closest to the origin
/// (the utopia point).
pub fn minimum_distance_index(points: &[LPoint]) -> Option<usize> {
    let first = points.first()?;
    let n_criteria = first.penalties.len() + 1;
    let logs: Vec<Vec<f64>> = points
        .iter()
        .map(|p| p.criteria().map(log_floor).collect())
        .collect();
    let mut lo = vec![f64::INFINITY; n_criteria];
    let mut hi = vec![f64::NEG_INFINITY; n_criteria];
    for row in &logs {
        for (k, &v) in row.iter().enumerate() {
            lo[k] = lo[k].min(v);
            hi[k] = hi[k].max(v);
        }
    }
    logs.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(k, &v)| {
                    let span = hi[k] - lo[k];
                    if span > 0.0 {
                        ((v - lo[k]) / span).powi(2)
                    } else {
                        0.0
                    }
                })
                .sum::<f64>()
        })
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Corner of a one-dimensional L-curve: the point of maximum Menger
/// curvature in `(log residual, log penalty)`, ordered by weight.
///
/// Only defined when exactly one weight varies across `points`; the penalty
/// of that prior is used.
pub fn lcurve_corner(points: &[LPoint]) -> Option<usize> {
    if points.len() < 3 {
        return None;
    }
    let n_axes = points[0].weights.len();
    let varying: Vec<usize> = (0..n_axes)
        .filter(|&k| points.iter().any(|p| p.weights[k] != points[0].weights[k]))
        .collect();
    let &[axis] = varying.as_slice() else {
        return None;
    };
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| points[a].weights[axis].total_cmp(&points[b].weights[axis]));
    let curve: Vec<[f64; 2]> = order
        .iter()
        .map(|&i| {
            [
                log_floor(points[i].data_residual),
                log_floor(points[i].penalties[axis]),
            ]
        })
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for j in 1..curve.len() - 1 {
        let kappa = menger_curvature(curve[j - 1], curve[j], curve[j + 1]);
        if kappa > 0.0 && best.map_or(true, |(_, k)| kappa > k) {
            best = Some((order[j], kappa));
        }
    }
    best.map(|(i, _)| i)
}

/// Signed curvature of the circle through `a, b, c`; positive for a left
/// turn.
fn menger_curvature(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let bc = [c[0] - b[0], c[1] - b[1]];
    let cross = ab[0] * bc[1] - ab[1] * bc[0];
    let ca = (c[0] - a[0]).hypot(c[1] - a[1]);
    let denom = ab[0].hypot(ab[1]) * bc[0].hypot(bc[1]) * ca;
    if denom > 0.0 {
        2.0 * cross / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admm::{Norm, Observation, Prior, PriorKind};
    use crate::color::ColorWeights;
    use crate::test_utils::add_noise;
    use crate::Plane;
    use approx::assert_relative_eq;
    use ndarray::Axis;

    fn point(weights: Vec<f64>, residual: f64, penalties: Vec<f64>) -> LPoint {
        LPoint {
            weights,
            data_residual: residual,
            penalties,
            error_rmse: None,
            iterations: 1.0,
        }
    }

    /// Samples of an L-curve with its corner at weight 1e-2.
    fn l_curve() -> Vec<LPoint> {
        [
            (1e-4, 1.0, 100.0),
            (1e-3, 1.1, 30.0),
            (1e-2, 1.3, 2.0),
            (1e-1, 10.0, 1.5),
            (1e0, 80.0, 1.2),
        ]
        .into_iter()
        .map(|(w, r, p)| point(vec![w], r, vec![p]))
        .collect()
    }

    #[test]
    fn logspace_endpoints() {
        let v = logspace(-2.0, 0.0, 3);
        assert_eq!(v.len(), 3);
        assert_relative_eq!(v[0], 0.01, max_relative = 1e-12);
        assert_relative_eq!(v[1], 0.1, max_relative = 1e-12);
        assert_relative_eq!(v[2], 1.0, max_relative = 1e-12);
        assert!(logspace(0.0, 1.0, 0).is_empty());
        assert_eq!(logspace(-1.0, 3.0, 1), vec![0.1]);
    }

    #[test]
    fn combinations_enumerate_cartesian_product() {
        let config = GridSearchConfig {
            axes: vec![vec![1.0, 2.0], vec![10.0, 20.0, 30.0]],
            reference: None,
        };
        let combos = config.combinations();
        assert_eq!(combos.len(), config.n_points());
        assert_eq!(combos[0], vec![1.0, 10.0]);
        assert_eq!(combos[2], vec![1.0, 30.0]);
        assert_eq!(combos[5], vec![2.0, 30.0]);
        assert!(GridSearchConfig {
            axes: vec![vec![]],
            reference: None
        }
        .validate()
        .is_err());
    }

    #[test]
    fn pareto_front_drops_dominated_points() {
        let points = vec![
            point(vec![0.0], 1.0, vec![5.0]),
            point(vec![0.0], 2.0, vec![2.0]),
            point(vec![0.0], 3.0, vec![3.0]),
            point(vec![0.0], 4.0, vec![1.0]),
            point(vec![0.0], 2.0, vec![2.0]),
        ];
        assert_eq!(pareto_front(&points), vec![0, 1, 3, 4]);
    }

    #[test]
    fn corner_and_mdf_agree_on_l_curve() {
        let points = l_curve();
        assert_eq!(lcurve_corner(&points), Some(2));
        assert_eq!(minimum_distance_index(&points), Some(2));
        assert_eq!(pareto_front(&points).len(), 5);
    }

    #[test]
    fn corner_needs_a_single_varying_axis() {
        let mut points = l_curve();
        for (i, p) in points.iter_mut().enumerate() {
            p.weights.push(i as f64);
            p.penalties.push(1.0);
        }
        assert_eq!(lcurve_corner(&points), None);
        assert_eq!(lcurve_corner(&l_curve()[..2]), None);
        assert_eq!(minimum_distance_index(&[]), None);
    }

    #[test]
    fn denoising_sweep_traces_an_l_curve() {
        let clean = Plane::from_shape_fn((12, 12), |(r, c)| if r + c < 12 { 0.3 } else { 0.7 });
        let noisy = add_noise(&clean, 0.1, 5);
        let problem = ReconstructionProblem {
            observation: Observation::Rgb {
                cube: noisy.insert_axis(Axis(2)),
            },
            weights: ColorWeights::identity(1),
            dispersion: None,
        };
        let admm = AdmmConfig {
            priors: vec![Prior::new(PriorKind::SpatialGradient, Norm::L1, 0.0)],
            max_iters: 300,
            ..AdmmConfig::default()
        };
        let patches = PatchConfig {
            patch_size: 12,
            padding: 0,
        };
        let config = GridSearchConfig {
            axes: vec![logspace(-3.0, 0.0, 4)],
            reference: Some(clean.insert_axis(Axis(2))),
        };
        let report = grid_search(&problem, &admm, &patches, &config).unwrap();
        assert_eq!(report.points.len(), 4);
        assert_eq!(report.prior_labels, vec!["spatial_gradient_l1".to_string()]);
        let first = &report.points[0];
        let last = &report.points[3];
        assert!(first.data_residual < last.data_residual);
        assert!(first.penalties[0] > last.penalties[0]);
        assert!(report.best_error_index.is_some());
        assert!(report.mdf_index.is_some());
        assert_eq!(report.selected(), report.best_error_index.map(|i| &report.points[i]));

        let path = std::env::temp_dir().join(format!("chromacal-grid-{}.csv", std::process::id()));
        report.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "w_spatial_gradient_l1,data_residual,penalty_spatial_gradient_l1,\
             error_rmse,iterations,pareto,mdf,corner"
        );
        assert_eq!(lines.count(), 4);
    }

    #[test]
    fn axis_count_must_match_priors() {
        let problem = ReconstructionProblem {
            observation: Observation::Rgb {
                cube: Cube::zeros((4, 4, 1)),
            },
            weights: ColorWeights::identity(1),
            dispersion: None,
        };
        let admm = AdmmConfig {
            priors: vec![Prior::new(PriorKind::Intensity, Norm::L2, 0.0)],
            ..AdmmConfig::default()
        };
        let config = GridSearchConfig::default();
        assert!(grid_search(&problem, &admm, &PatchConfig::default(), &config).is_err());
    }
}
