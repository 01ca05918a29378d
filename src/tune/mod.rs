//! Parameter auto-tuner for the polynomial pruning oracle.
//!
//! Given a workload with a recall floor, the tuner searches for
//! `(alpha_left, alpha_right)` — at every integer exponent pair in the
//! configured band — maximizing an improvement metric subject to
//! `mean recall >= desired_recall`.
//!
//! The search is a multi-restart, two-dimensional bracketed grid
//! search: starting from a center point and a bracketing factor `F`
//! (initially `full_factor`), evaluate the `(2N+1) x (2N+1)` grid of
//! points `center * F^(i/N)` for `i in [-N, N]` per coordinate, move
//! the center to the best point seen, shrink `F <- sqrt(F)`, and
//! repeat to `max_rec_depth`; the whole descent restarts from the new
//! center up to `max_iter` times. Restart 0 starts at `(1, 1)` (the
//! stretched triangle inequality); every additional restart draws each
//! coordinate from `exp(N(0, ln full_factor))` — log-normal jitter with
//! geometric mean 1 and geometric standard deviation `full_factor`.
//!
//! Trees are built once per split before the search begins: pruner
//! coefficients affect only search, never construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::error::{Result, VantageError};
use crate::eval::{evaluate_setting, ExperimentConfig, GoldStandardCache, SettingEval};
use crate::space::{DistanceValue, Space};
use crate::vptree::{PolynomialPruner, PrunerParams, VpTree, VpTreeParams};

/// Which improvement metric the tuner maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimMetric {
    /// Improvement in distance computations (`dist`).
    #[default]
    DistComps,
    /// Improvement in wall-clock efficiency (`time`).
    Efficiency,
}

impl std::str::FromStr for OptimMetric {
    type Err = VantageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dist" => Ok(OptimMetric::DistComps),
            "time" => Ok(OptimMetric::Efficiency),
            other => Err(VantageError::InvalidParameter(format!(
                "unknown optimization metric '{other}' (expected 'dist' or 'time')"
            ))),
        }
    }
}

impl std::fmt::Display for OptimMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimMetric::DistComps => write!(f, "improvement in dist. comp."),
            OptimMetric::Efficiency => write!(f, "improvement in efficiency"),
        }
    }
}

/// Tuner knobs. Defaults follow the reference tuning procedure.
#[derive(Debug, Clone)]
pub struct TuneParams {
    /// Average-recall floor a winning point must meet.
    pub desired_recall: f64,
    pub metric: OptimMetric,
    /// Inclusive band of integer pruner exponents to sweep.
    pub min_exp: u32,
    pub max_exp: u32,
    /// Outer grid-descent repetitions per restart.
    pub max_iter: u32,
    /// Grid refinements (factor shrinks) per outer iteration.
    pub max_rec_depth: u32,
    /// Half-width of the grid: each local step evaluates (2N+1)^2 points.
    pub step_n: u32,
    /// Additional random restarts after the (1, 1) start.
    pub add_restart_qty: u32,
    /// Initial bracketing factor.
    pub full_factor: f64,
}

impl Default for TuneParams {
    fn default() -> Self {
        Self {
            desired_recall: 0.9,
            metric: OptimMetric::DistComps,
            min_exp: 1,
            max_exp: 1,
            max_iter: 10,
            max_rec_depth: 6,
            step_n: 2,
            add_restart_qty: 4,
            full_factor: 8.0,
        }
    }
}

impl TuneParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.desired_recall > 0.0 && self.desired_recall <= 1.0) {
            return Err(VantageError::InvalidParameter(format!(
                "desiredRecall must be in (0, 1], got {}",
                self.desired_recall
            )));
        }
        if self.min_exp == 0 {
            return Err(VantageError::InvalidParameter("minExp cannot be zero".into()));
        }
        if self.max_exp < self.min_exp {
            return Err(VantageError::InvalidParameter(
                "maxExp cannot be smaller than minExp".into(),
            ));
        }
        if self.step_n == 0 {
            return Err(VantageError::InvalidParameter("stepN must be >= 1".into()));
        }
        if !(self.full_factor > 1.0) {
            return Err(VantageError::InvalidParameter(format!(
                "fullFactor must be > 1, got {}",
                self.full_factor
            )));
        }
        Ok(())
    }
}

/// The tuned pruner coefficients, as written to the output file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunedParams {
    pub alpha_left: f64,
    pub alpha_right: f64,
    pub exp_left: u32,
    pub exp_right: u32,
}

impl TunedParams {
    pub fn pruner(&self) -> Result<PolynomialPruner> {
        PolynomialPruner::new(PrunerParams::new(
            self.alpha_left,
            self.exp_left,
            self.alpha_right,
            self.exp_right,
        ))
    }

    /// Parse the `key=value` line produced by `Display`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut alpha_left = None;
        let mut alpha_right = None;
        let mut exp_left = None;
        let mut exp_right = None;
        for part in line.trim().split(',') {
            let (k, v) = part.split_once('=').ok_or_else(|| {
                VantageError::InvalidParameter(format!("bad tuned-parameter field '{part}'"))
            })?;
            let bad = || VantageError::InvalidParameter(format!("bad value in '{part}'"));
            match k.trim() {
                "alphaLeft" => alpha_left = Some(v.trim().parse::<f64>().map_err(|_| bad())?),
                "alphaRight" => alpha_right = Some(v.trim().parse::<f64>().map_err(|_| bad())?),
                "expLeft" => exp_left = Some(v.trim().parse::<u32>().map_err(|_| bad())?),
                "expRight" => exp_right = Some(v.trim().parse::<u32>().map_err(|_| bad())?),
                other => {
                    return Err(VantageError::InvalidParameter(format!(
                        "unknown tuned-parameter key '{other}'"
                    )));
                }
            }
        }
        match (alpha_left, alpha_right, exp_left, exp_right) {
            (Some(al), Some(ar), Some(el), Some(er)) => Ok(Self {
                alpha_left: al,
                alpha_right: ar,
                exp_left: el,
                exp_right: er,
            }),
            _ => Err(VantageError::InvalidParameter(
                "tuned-parameter line is missing fields".into(),
            )),
        }
    }
}

impl std::fmt::Display for TunedParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "alphaLeft={},alphaRight={},expLeft={},expRight={}",
            self.alpha_left, self.alpha_right, self.exp_left, self.exp_right
        )
    }
}

/// Outcome of a successful tuning run.
#[derive(Debug, Clone)]
pub struct TuneResult {
    pub params: TunedParams,
    /// Mean recall of the winning point on the training workload.
    pub recall: f64,
    /// Value of the chosen improvement metric at the winning point.
    pub improvement: f64,
    pub avg_time_us: f64,
    pub avg_dist_comps: f64,
}

/// Cooperative cancellation for long tuning runs; checked between grid
/// points, never inside a single query.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Absolute tolerance on the improvement metric; an outer iteration
/// that gains less than this ends the descent for its restart.
const IMPROVEMENT_TOL: f64 = 1e-3;

#[derive(Debug, Clone)]
struct Candidate {
    alpha_left: f64,
    alpha_right: f64,
    exp_left: u32,
    exp_right: u32,
    recall: f64,
    improvement: f64,
    avg_time_us: f64,
    avg_dist_comps: f64,
}

impl Candidate {
    fn feasible(&self, desired: f64) -> bool {
        self.recall >= desired
    }

    fn alpha_sum(&self) -> f64 {
        self.alpha_left + self.alpha_right
    }
}

/// Best-point ordering: feasible beats infeasible; among feasible,
/// higher improvement, then higher recall, then lower alpha sum; among
/// infeasible, higher recall.
fn better(c: &Candidate, incumbent: Option<&Candidate>, desired: f64) -> bool {
    let Some(inc) = incumbent else { return true };
    match (c.feasible(desired), inc.feasible(desired)) {
        (true, false) => true,
        (false, true) => false,
        (true, true) => {
            if c.improvement != inc.improvement {
                return c.improvement > inc.improvement;
            }
            if c.recall != inc.recall {
                return c.recall > inc.recall;
            }
            c.alpha_sum() < inc.alpha_sum()
        }
        (false, false) => c.recall > inc.recall,
    }
}

/// Standard normal deviate by the Box-Muller transform.
fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Find pruner parameters meeting the recall floor and maximizing the
/// configured improvement metric.
///
/// The gold-standard cache is computed on first use and shared between
/// runs; `rng` drives pivot selection and restart jitter, so a fixed
/// seed makes the whole run reproducible. Cancelling stops the search
/// between grid points and settles for the best point found so far.
///
/// Returns `RecallUnmet` when no evaluated point reaches
/// `desired_recall`.
pub fn tune<D: DistanceValue, S: Space<D>, R: Rng>(
    cfg: &ExperimentConfig<D, S>,
    tune_params: &TuneParams,
    tree_params: &VpTreeParams,
    gold: &mut GoldStandardCache<D>,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<TuneResult> {
    tune_params.validate()?;
    gold.ensure_computed(cfg)?;

    // One tree per split for the whole run.
    let trees: Vec<VpTree<'_, D, S>> = cfg
        .splits
        .iter()
        .map(|s| VpTree::build(&cfg.space, &cfg.data, s.train.clone(), tree_params, rng))
        .collect::<Result<_>>()?;

    let desired = tune_params.desired_recall;
    let mut memo: HashMap<(u64, u64, u32, u32), Candidate> = HashMap::new();
    let mut best: Option<Candidate> = None;

    let evaluate = |al: f64,
                        ar: f64,
                        el: u32,
                        er: u32,
                        memo: &mut HashMap<(u64, u64, u32, u32), Candidate>|
     -> Result<Candidate> {
        let key = (al.to_bits(), ar.to_bits(), el, er);
        if let Some(c) = memo.get(&key) {
            return Ok(c.clone());
        }
        let pruner = PolynomialPruner::new(PrunerParams::new(al, el, ar, er))?;
        let eval: SettingEval = evaluate_setting(cfg, &trees, &pruner, gold)?;
        let improvement = match tune_params.metric {
            OptimMetric::DistComps => eval.impr_dist_comps,
            OptimMetric::Efficiency => eval.impr_efficiency,
        };
        let cand = Candidate {
            alpha_left: al,
            alpha_right: ar,
            exp_left: el,
            exp_right: er,
            recall: eval.recall,
            improvement,
            avg_time_us: eval.avg_time_us,
            avg_dist_comps: eval.avg_dist_comps,
        };
        memo.insert(key, cand.clone());
        Ok(cand)
    };

    let n = tune_params.step_n as i64;
    let ln_full_factor = tune_params.full_factor.ln();

    'sweep: for exp_left in tune_params.min_exp..=tune_params.max_exp {
        for exp_right in tune_params.min_exp..=tune_params.max_exp {
            for restart in 0..=tune_params.add_restart_qty {
                let (mut center_l, mut center_r) = if restart == 0 {
                    (1.0, 1.0)
                } else {
                    let start = (
                        (gaussian(rng) * ln_full_factor).exp(),
                        (gaussian(rng) * ln_full_factor).exp(),
                    );
                    tracing::info!(
                        alpha_left = start.0,
                        alpha_right = start.1,
                        "random starting point"
                    );
                    start
                };

                let mut restart_best =
                    evaluate(center_l, center_r, exp_left, exp_right, &mut memo)?;
                if better(&restart_best, best.as_ref(), desired) {
                    best = Some(restart_best.clone());
                }

                for outer in 0..tune_params.max_iter {
                    if cancel.is_cancelled() {
                        break 'sweep;
                    }
                    let improvement_before = restart_best.improvement;
                    let feasible_before = restart_best.feasible(desired);

                    let mut factor = tune_params.full_factor;
                    for _depth in 0..=tune_params.max_rec_depth {
                        for i in -n..=n {
                            for j in -n..=n {
                                if cancel.is_cancelled() {
                                    break 'sweep;
                                }
                                let al = center_l * factor.powf(i as f64 / n as f64);
                                let ar = center_r * factor.powf(j as f64 / n as f64);
                                let cand = evaluate(al, ar, exp_left, exp_right, &mut memo)?;
                                if better(&cand, Some(&restart_best), desired) {
                                    restart_best = cand;
                                }
                            }
                        }
                        center_l = restart_best.alpha_left;
                        center_r = restart_best.alpha_right;
                        factor = factor.sqrt();
                    }

                    if better(&restart_best, best.as_ref(), desired) {
                        best = Some(restart_best.clone());
                    }
                    tracing::debug!(
                        exp_left,
                        exp_right,
                        restart,
                        outer,
                        alpha_left = restart_best.alpha_left,
                        alpha_right = restart_best.alpha_right,
                        recall = restart_best.recall,
                        improvement = restart_best.improvement,
                        "grid descent iteration"
                    );

                    let gained_feasibility = restart_best.feasible(desired) && !feasible_before;
                    let gain = restart_best.improvement - improvement_before;
                    if !gained_feasibility && gain.abs() < IMPROVEMENT_TOL {
                        break;
                    }
                }
            }
        }
    }

    let best = best.ok_or_else(|| {
        VantageError::InternalInvariant("tuner finished without evaluating any point".into())
    })?;

    if best.recall < desired {
        tracing::warn!(
            alpha_left = best.alpha_left,
            alpha_right = best.alpha_right,
            recall = best.recall,
            "no parameter setting met the recall floor"
        );
        return Err(VantageError::RecallUnmet {
            desired,
            achieved: best.recall,
        });
    }

    let params = TunedParams {
        alpha_left: best.alpha_left,
        alpha_right: best.alpha_right,
        exp_left: best.exp_left,
        exp_right: best.exp_right,
    };
    tracing::info!(
        %params,
        recall = best.recall,
        improvement = best.improvement,
        metric = %tune_params.metric,
        "tuning finished"
    );
    Ok(TuneResult {
        params,
        recall: best.recall,
        improvement: best.improvement,
        avg_time_us: best.avg_time_us,
        avg_dist_comps: best.avg_dist_comps,
    })
}
