//! Scaled-form ADMM with a conjugate-gradient x-update.

use serde::{Deserialize, Serialize};

use super::config::{AdmmConfig, Norm, Prior, PriorKind};
use super::operator::{LinearOperator, PriorOperator};
use crate::error::{ChromaError, Result};
use crate::numeric::{dot, norm2};

/// Residual balancing threshold and step (Boyd et al., §3.4.1).
const BALANCE_MU: f64 = 10.0;
const BALANCE_TAU: f64 = 2.0;
/// Residual balancing keeps `rho` within this factor of its initial value.
const RHO_RANGE: f64 = 1e6;

/// Soft-thresholding, the proximal map of `t · |v|`.
pub fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub primal_residual: f64,
    pub dual_residual: f64,
    pub rho: f64,
    pub cg_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmmResult {
    /// Solution, flattened `[row, col, band]`.
    pub x: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub final_primal: f64,
    pub final_dual: f64,
    pub final_rho: f64,
    /// Empty unless `record_history` was set.
    pub history: Vec<IterationRecord>,
}

/// Data fidelity and unweighted prior values at a given `x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveTerms {
    /// `‖A x − b‖₂`.
    pub data_residual: f64,
    /// `R_k(G_k x)` per prior, in prior order.
    pub penalties: Vec<f64>,
}

impl ObjectiveTerms {
    /// `½‖A x − b‖² + Σ w_k R_k`.
    pub fn total(&self, priors: &[Prior]) -> f64 {
        0.5 * self.data_residual.powi(2)
            + priors
                .iter()
                .zip(&self.penalties)
                .map(|(p, v)| p.weight * v)
                .sum::<f64>()
    }
}

pub(crate) fn prior_operator(kind: PriorKind, shape: [usize; 3]) -> PriorOperator {
    match kind {
        PriorKind::SpatialGradient => PriorOperator::SpatialGradient { shape },
        PriorKind::SpectralGradient => PriorOperator::SpectralGradient { shape },
        PriorKind::Intensity => PriorOperator::Identity {
            len: shape.iter().product(),
        },
    }
}

fn penalty(norm: Norm, v: &[f64]) -> f64 {
    match norm {
        Norm::L1 => v.iter().map(|x| x.abs()).sum(),
        Norm::L2 => dot(v, v),
    }
}

pub fn objective_terms<A: LinearOperator + ?Sized>(
    operator: &A,
    b: &[f64],
    x: &[f64],
    priors: &[Prior],
    shape: [usize; 3],
) -> Result<ObjectiveTerms> {
    check_lengths(operator, b, shape)?;
    if x.len() != operator.input_len() {
        return Err(ChromaError::mismatch("solution length", operator.input_len(), x.len()));
    }
    let mut ax = vec![0.0; operator.output_len()];
    operator.apply(x, &mut ax);
    ax.iter_mut().zip(b).for_each(|(a, bi)| *a -= bi);
    let penalties = priors
        .iter()
        .map(|p| {
            let op = prior_operator(p.kind, shape);
            let mut gx = vec![0.0; op.output_len()];
            op.apply(x, &mut gx);
            penalty(p.norm, &gx)
        })
        .collect();
    Ok(ObjectiveTerms {
        data_residual: norm2(&ax),
        penalties,
    })
}

fn check_lengths<A: LinearOperator + ?Sized>(operator: &A, b: &[f64], shape: [usize; 3]) -> Result<()> {
    let n: usize = shape.iter().product();
    if operator.input_len() != n {
        return Err(ChromaError::mismatch("operator input", n, operator.input_len()));
    }
    if b.len() != operator.output_len() {
        return Err(ChromaError::mismatch("observation length", operator.output_len(), b.len()));
    }
    if !b.iter().all(|v| v.is_finite()) {
        return Err(ChromaError::invalid("observation contains non-finite values"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Prox {
    L1(f64),
    L2(f64),
    NonNegative,
    /// Consensus copy of `x`; keeps the x-update system positive definite
    /// when non-negativity is off.
    Free,
}

impl Prox {
    /// `argmin_z f(z) + ρ/2 ‖z − v‖²`, element-wise.
    fn apply(self, v: f64, rho: f64) -> f64 {
        match self {
            Self::L1(w) => soft_threshold(v, w / rho),
            Self::L2(w) => rho * v / (2.0 * w + rho),
            Self::NonNegative => v.max(0.0),
            Self::Free => v,
        }
    }
}

/// One `z_k = G_k x` constraint with its scaled dual `u_k`.
struct Split {
    op: PriorOperator,
    prox: Prox,
    z: Vec<f64>,
    u: Vec<f64>,
    gx: Vec<f64>,
}

impl Split {
    fn new(op: PriorOperator, prox: Prox, x: &[f64]) -> Self {
        let mut z = vec![0.0; op.output_len()];
        op.apply(x, &mut z);
        let len = z.len();
        Self {
            op,
            prox,
            z,
            u: vec![0.0; len],
            gx: vec![0.0; len],
        }
    }
}

/// Minimise `½‖A x − b‖² + Σ w_k R_k(G_k x) (+ ι(x ≥ 0))` for a cube of
/// `shape = [height, width, bands]`.
///
/// Priors with zero weight do not get a split. `x0` warm-starts the solve;
/// the default start is zero.
pub fn solve_admm<A: LinearOperator + ?Sized>(
    operator: &A,
    b: &[f64],
    shape: [usize; 3],
    config: &AdmmConfig,
    x0: Option<&[f64]>,
) -> Result<AdmmResult> {
    config.validate(shape[2])?;
    check_lengths(operator, b, shape)?;
    let n = operator.input_len();
    let mut x = match x0 {
        Some(x0) if x0.len() != n => {
            return Err(ChromaError::mismatch("initial guess", n, x0.len()));
        }
        Some(x0) => x0.to_vec(),
        None => vec![0.0; n],
    };

    let mut splits: Vec<Split> = config
        .priors
        .iter()
        .filter(|p| p.weight > 0.0)
        .map(|p| {
            let prox = match p.norm {
                Norm::L1 => Prox::L1(p.weight),
                Norm::L2 => Prox::L2(p.weight),
            };
            Split::new(prior_operator(p.kind, shape), prox, &x)
        })
        .collect();
    let bound = if config.non_negative {
        Prox::NonNegative
    } else {
        Prox::Free
    };
    splits.push(Split::new(PriorOperator::Identity { len: n }, bound, &x));
    let p_total: usize = splits.iter().map(|s| s.z.len()).sum();

    let mut atb = vec![0.0; n];
    operator.adjoint(b, &mut atb);

    let mut rho = config.rho;
    let (rho_min, rho_max) = (config.rho / RHO_RANGE, config.rho * RHO_RANGE);
    let mut ax = vec![0.0; operator.output_len()];
    let mut scratch = vec![0.0; n];
    let mut rhs = vec![0.0; n];
    let mut dual_vec = vec![0.0; n];
    let mut ktu = vec![0.0; n];
    let ops: Vec<PriorOperator> = splits.iter().map(|s| s.op).collect();
    let mut gbuf: Vec<Vec<f64>> = splits.iter().map(|s| vec![0.0; s.z.len()]).collect();
    let mut history = Vec::new();
    let mut converged = false;
    let mut iterations = 0;
    let (mut primal, mut dual) = (f64::INFINITY, f64::INFINITY);

    for iter in 1..=config.max_iters {
        iterations = iter;

        // x-update: (AᵀA + ρ Σ G_kᵀG_k) x = Aᵀb + ρ Σ G_kᵀ(z_k − u_k)
        rhs.copy_from_slice(&atb);
        for s in &mut splits {
            for ((g, z), u) in s.gx.iter_mut().zip(&s.z).zip(&s.u) {
                *g = z - u;
            }
            s.op.adjoint(&s.gx, &mut scratch);
            rhs.iter_mut().zip(&scratch).for_each(|(r, v)| *r += rho * v);
        }
        let mut normal = |v: &[f64], out: &mut [f64]| {
            operator.apply(v, &mut ax);
            operator.adjoint(&ax, out);
            for (op, g) in ops.iter().zip(gbuf.iter_mut()) {
                op.apply(v, g);
                op.adjoint(g, &mut scratch);
                out.iter_mut().zip(&scratch).for_each(|(o, s)| *o += rho * s);
            }
        };
        let cg_iterations =
            conjugate_gradient(&mut normal, &rhs, &mut x, config.cg_max_iters, config.cg_tol);

        // z- and u-updates with residual bookkeeping
        let (mut primal_sq, mut kx_sq, mut z_sq) = (0.0, 0.0, 0.0);
        dual_vec.fill(0.0);
        ktu.fill(0.0);
        for s in &mut splits {
            s.op.apply(&x, &mut s.gx);
            for i in 0..s.z.len() {
                let g = s.gx[i];
                let z_old = s.z[i];
                let z_new = s.prox.apply(g + s.u[i], rho);
                let r = g - z_new;
                s.u[i] += r;
                s.z[i] = z_new;
                primal_sq += r * r;
                kx_sq += g * g;
                z_sq += z_new * z_new;
                // reuse gx for Δz
                s.gx[i] = z_new - z_old;
            }
            s.op.adjoint(&s.gx, &mut scratch);
            dual_vec.iter_mut().zip(&scratch).for_each(|(d, v)| *d += v);
            s.op.adjoint(&s.u, &mut scratch);
            ktu.iter_mut().zip(&scratch).for_each(|(d, v)| *d += v);
        }
        primal = primal_sq.sqrt();
        dual = rho * norm2(&dual_vec);
        let eps_pri = (p_total as f64).sqrt() * config.abs_tol
            + config.rel_tol * kx_sq.sqrt().max(z_sq.sqrt());
        let eps_dual = (n as f64).sqrt() * config.abs_tol + config.rel_tol * rho * norm2(&ktu);

        if config.record_history {
            history.push(IterationRecord {
                iteration: iter,
                primal_residual: primal,
                dual_residual: dual,
                rho,
                cg_iterations,
            });
        }
        if primal <= eps_pri && dual <= eps_dual {
            converged = true;
            break;
        }

        // A stalled x-update says nothing about the residual balance.
        if config.adaptive_rho && cg_iterations > 0 {
            let next = balance_rho(rho, primal, dual, [rho_min, rho_max]);
            if next != rho {
                let scale = next / rho;
                rho = next;
                for s in &mut splits {
                    s.u.iter_mut().for_each(|u| *u /= scale);
                }
            }
        }
    }

    if converged {
        tracing::debug!(
            "admm converged after {} iterations (primal {:.3e}, dual {:.3e}, rho {:.3})",
            iterations,
            primal,
            dual,
            rho
        );
    } else {
        tracing::debug!(
            "admm stopped at max_iters={} (primal {:.3e}, dual {:.3e})",
            config.max_iters,
            primal,
            dual
        );
    }
    Ok(AdmmResult {
        x,
        iterations,
        converged,
        final_primal: primal,
        final_dual: dual,
        final_rho: rho,
        history,
    })
}

/// Residual-balancing update of `rho`, kept inside `[bounds[0], bounds[1]]`.
pub(crate) fn balance_rho(rho: f64, primal: f64, dual: f64, bounds: [f64; 2]) -> f64 {
    let target = if primal > BALANCE_MU * dual {
        rho * BALANCE_TAU
    } else if dual > BALANCE_MU * primal {
        rho / BALANCE_TAU
    } else {
        rho
    };
    target.clamp(bounds[0], bounds[1])
}

/// Solve `M x = rhs` for symmetric positive (semi-)definite `M`, starting
/// from `x`. Returns the number of iterations used.
///
/// Stops once the residual has shrunk by `tol` relative to the residual of
/// the starting point, or reaches round-off level relative to `rhs`.
pub(crate) fn conjugate_gradient(
    apply: &mut impl FnMut(&[f64], &mut [f64]),
    rhs: &[f64],
    x: &mut [f64],
    max_iters: usize,
    tol: f64,
) -> usize {
    let n = x.len();
    let mut mp = vec![0.0; n];
    apply(&*x, &mut mp);
    let mut r: Vec<f64> = rhs.iter().zip(&mp).map(|(b, m)| b - m).collect();
    let mut p = r.clone();
    let mut rs = dot(&r, &r);
    let floor = f64::EPSILON * norm2(rhs);
    let target = (tol * rs.sqrt()).max(floor).powi(2);
    if rs <= floor * floor {
        return 0;
    }
    for k in 0..max_iters {
        apply(&p, &mut mp);
        let pmp = dot(&p, &mp);
        if !(pmp > 0.0) {
            return k;
        }
        let alpha = rs / pmp;
        x.iter_mut().zip(&p).for_each(|(xi, pi)| *xi += alpha * pi);
        r.iter_mut().zip(&mp).for_each(|(ri, mi)| *ri -= alpha * mi);
        let rs_new = dot(&r, &r);
        if rs_new <= target {
            return k + 1;
        }
        let beta = rs_new / rs;
        p.iter_mut().zip(&r).for_each(|(pi, ri)| *pi = ri + beta * *pi);
        rs = rs_new;
    }
    max_iters
}
