//! # Constrained Optimizer
//!
//! $$
//! \min_{\mathbf{w}} f(\mathbf{w})\quad\text{s.t.}\quad \mathbf{1}^\top\mathbf{w}=1,\ 0\le w_i\le 1,\
//! h_j(\mathbf{w})=0,\ g_k(\mathbf{w})\ge 0
//! $$
//!
//! Long-only, fully invested solves. Weights are parameterized as
//! `w = softmax(x)`, which keeps every iterate on the simplex, and the
//! remaining constraints are folded in with an augmented Lagrangian:
//!
//! $$
//! \mathcal{L}_\rho = f + \sum_j \lambda_j h_j + \tfrac{\rho}{2}h_j^2
//! + \sum_k \tfrac{1}{2\rho}\left(\max(0, \nu_k-\rho g_k)^2-\nu_k^2\right)
//! $$
//!
//! Each penalty round is an argmin Nelder-Mead run warm-started from the
//! previous round and restarted with a fresh simplex until the objective stops
//! improving, since a collapsed simplex alone does not mean a minimum.

use std::fmt::Display;

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use super::estimate::MarketEstimate;
use super::types::PortfolioResult;
use super::types::SolveStatus;
use crate::error::PortfolioError;
use crate::error::Result;

const MAX_PENALTY: f64 = 1e10;

/// Cost assigned to weights with undefined Sharpe ratio.
const DEGENERATE_COST: f64 = 1e10;

/// Quantity being optimized, always expressed as a minimization internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Objective {
  /// Minimize `-return(w)`.
  MaximizeReturn,
  /// Minimize `volatility(w)`.
  MinimizeVolatility,
  /// Minimize `-volatility(w)`.
  MaximizeVolatility,
  /// Minimize `-sharpe(w)`.
  MaximizeSharpe,
}

impl Objective {
  fn value(&self, estimate: &MarketEstimate, weights: &[f64]) -> f64 {
    match self {
      Objective::MaximizeReturn => -estimate.expected_return(weights),
      Objective::MinimizeVolatility => estimate.volatility(weights),
      Objective::MaximizeVolatility => -estimate.volatility(weights),
      Objective::MaximizeSharpe => match estimate.sharpe(weights) {
        Ok(sharpe) => -sharpe,
        Err(_) => DEGENERATE_COST,
      },
    }
  }
}

impl Display for Objective {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Objective::MaximizeReturn => write!(f, "maximize return"),
      Objective::MinimizeVolatility => write!(f, "minimize volatility"),
      Objective::MaximizeVolatility => write!(f, "maximize volatility"),
      Objective::MaximizeSharpe => write!(f, "maximize Sharpe ratio"),
    }
  }
}

/// Constraint added on top of the always-present bounds and budget.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constraint {
  /// `ceiling - volatility(w) >= 0`.
  VolatilityCeiling(f64),
  /// `return(w) - target = 0`.
  TargetReturn(f64),
}

impl Constraint {
  fn is_equality(&self) -> bool {
    matches!(self, Constraint::TargetReturn(_))
  }

  fn residual(&self, estimate: &MarketEstimate, weights: &[f64]) -> f64 {
    match *self {
      Constraint::VolatilityCeiling(ceiling) => ceiling - estimate.volatility(weights),
      Constraint::TargetReturn(target) => estimate.expected_return(weights) - target,
    }
  }

  /// Violation scaled by the magnitude of the bound.
  fn violation(&self, estimate: &MarketEstimate, weights: &[f64]) -> f64 {
    let (residual, bound) = match *self {
      Constraint::VolatilityCeiling(c) => ((-self.residual(estimate, weights)).max(0.0), c),
      Constraint::TargetReturn(t) => (self.residual(estimate, weights).abs(), t),
    };
    residual / (1.0 + bound.abs())
  }
}

/// Constraints for one optimizer call.
///
/// Bounds `0 <= w_i <= 1` and `sum(w) = 1` are implicit. Sets are built fresh
/// from [`ConstraintSet::base`] for every call and never shared between calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
  extra: Vec<Constraint>,
}

impl ConstraintSet {
  /// Bounds and budget only.
  pub fn base() -> Self {
    Self::default()
  }

  /// A new set with `constraint` appended; `self` is left untouched.
  pub fn with(&self, constraint: Constraint) -> Self {
    let mut extra = self.extra.clone();
    extra.push(constraint);
    Self { extra }
  }

  pub fn constraints(&self) -> &[Constraint] {
    &self.extra
  }

  /// Number of constraints beyond bounds and budget.
  pub fn len(&self) -> usize {
    self.extra.len()
  }

  pub fn is_empty(&self) -> bool {
    self.extra.is_empty()
  }

  /// Largest scaled violation over all extra constraints.
  pub fn max_violation(&self, estimate: &MarketEstimate, weights: &[f64]) -> f64 {
    self
      .extra
      .iter()
      .map(|c| c.violation(estimate, weights))
      .fold(0.0, f64::max)
  }
}

/// Numeric settings shared by every solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverSettings {
  /// Largest accepted constraint violation, relative to `1 + |bound|`.
  pub tolerance: f64,
  /// Nelder-Mead stops once the simplex cost spread falls below this.
  pub sd_tolerance: f64,
  /// Iteration ceiling for each Nelder-Mead run.
  pub max_iters: u64,
  /// Augmented Lagrangian rounds.
  pub max_outer_iters: usize,
  /// Fresh-simplex restarts per round while the objective keeps improving.
  pub max_restarts: usize,
  /// A restart improving the cost by less than this, relative to `1 + |cost|`, ends the round.
  pub restart_tolerance: f64,
  /// Initial penalty weight `rho`.
  pub penalty: f64,
  /// Edge length of the initial simplex in softmax coordinates.
  pub initial_step: f64,
}

impl Default for SolverSettings {
  fn default() -> Self {
    Self {
      tolerance: 1e-6,
      sd_tolerance: 1e-12,
      max_iters: 5000,
      max_outer_iters: 30,
      max_restarts: 50,
      restart_tolerance: 1e-10,
      penalty: 100.0,
      initial_step: 1.0,
    }
  }
}

impl SolverSettings {
  pub fn validate(&self) -> Result<()> {
    let positive = [
      ("tolerance", self.tolerance),
      ("sd_tolerance", self.sd_tolerance),
      ("restart_tolerance", self.restart_tolerance),
      ("penalty", self.penalty),
      ("initial_step", self.initial_step),
    ];
    for (name, value) in positive {
      if !value.is_finite() || value <= 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
          "solver {name} must be positive, got {value}"
        )));
      }
    }
    if self.max_iters == 0 || self.max_outer_iters == 0 || self.max_restarts == 0 {
      return Err(PortfolioError::InvalidInput(
        "solver iteration limits must be positive".into(),
      ));
    }
    Ok(())
  }
}

fn softmax(x: &[f64]) -> Vec<f64> {
  if x.is_empty() {
    return Vec::new();
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if !sum.is_finite() || sum < 1e-15 {
    vec![1.0 / x.len() as f64; x.len()]
  } else {
    exps.iter().map(|&e| e / sum).collect()
  }
}

fn initial_simplex(x0: &[f64], step: f64) -> Vec<Vec<f64>> {
  let mut simplex = Vec::with_capacity(x0.len() + 1);
  simplex.push(x0.to_vec());
  for i in 0..x0.len() {
    let mut point = x0.to_vec();
    point[i] += step;
    simplex.push(point);
  }
  simplex
}

#[derive(Clone)]
struct AugmentedCost {
  estimate: MarketEstimate,
  objective: Objective,
  constraints: Vec<Constraint>,
  multipliers: Vec<f64>,
  penalty: f64,
}

impl CostFunction for AugmentedCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    Ok(self.value(x))
  }
}

impl AugmentedCost {
  fn value(&self, x: &[f64]) -> f64 {
    let w = softmax(x);
    let mut value = self.objective.value(&self.estimate, &w);

    for (constraint, &lambda) in self.constraints.iter().zip(self.multipliers.iter()) {
      let g = constraint.residual(&self.estimate, &w);
      if constraint.is_equality() {
        value += lambda * g + 0.5 * self.penalty * g * g;
      } else {
        let shifted = (lambda - self.penalty * g).max(0.0);
        value += (shifted * shifted - lambda * lambda) / (2.0 * self.penalty);
      }
    }

    value
  }
}

struct InnerRun {
  x: Vec<f64>,
  cost: f64,
  converged: bool,
  iterations: u64,
  reason: String,
}

fn run_nelder_mead(
  cost: &AugmentedCost,
  start: &[f64],
  settings: &SolverSettings,
) -> std::result::Result<InnerRun, argmin::core::Error> {
  let solver = NelderMead::new(initial_simplex(start, settings.initial_step))
    .with_sd_tolerance(settings.sd_tolerance)?;
  let res = Executor::new(cost.clone(), solver)
    .configure(|state| state.max_iters(settings.max_iters))
    .run()?;

  let state = res.state();
  let (converged, reason) = match state.get_termination_status() {
    TerminationStatus::Terminated(TerminationReason::SolverConverged) => (true, String::new()),
    TerminationStatus::Terminated(other) => (false, format!("{other:?}")),
    TerminationStatus::NotTerminated => (false, "not terminated".to_string()),
  };

  let x = state
    .get_best_param()
    .cloned()
    .unwrap_or_else(|| start.to_vec());
  Ok(InnerRun {
    cost: cost.value(&x),
    x,
    converged,
    iterations: state.get_iter(),
    reason,
  })
}

/// Nelder-Mead from `start`, restarted from its own result with a fresh simplex
/// until a restart no longer lowers the cost.
fn run_with_restarts(
  cost: &AugmentedCost,
  start: &[f64],
  settings: &SolverSettings,
) -> std::result::Result<InnerRun, argmin::core::Error> {
  let mut best = run_nelder_mead(cost, start, settings)?;

  for _ in 0..settings.max_restarts {
    let next = run_nelder_mead(cost, &best.x, settings)?;
    let iterations = best.iterations + next.iterations;
    let settled = best.cost - next.cost <= settings.restart_tolerance * (1.0 + best.cost.abs());

    if next.cost < best.cost {
      best = InnerRun { iterations, ..next };
    } else {
      best.iterations = iterations;
    }
    if settled {
      return Ok(best);
    }
  }

  best.converged = false;
  best.reason = format!(
    "objective still improving after {} restarts",
    settings.max_restarts
  );
  Ok(best)
}

fn solver_failure(err: argmin::core::Error, objective: Objective, iterations: u64) -> PortfolioError {
  PortfolioError::OptimizationDidNotConverge {
    objective,
    iterations,
    violation: f64::NAN,
    reason: err.to_string(),
  }
}

/// Solve `objective` under `constraints`, starting from equal weights.
///
/// Never fails on non-convergence: the best weights found are returned with a
/// [`SolveStatus::NotConverged`] flag. Errors are reserved for invalid settings,
/// a degenerate Sharpe ratio at the solution and solver failures that produce
/// no weights.
pub fn optimize(
  estimate: &MarketEstimate,
  objective: Objective,
  constraints: &ConstraintSet,
  settings: &SolverSettings,
) -> Result<PortfolioResult> {
  settings.validate()?;

  let n = estimate.n_assets();
  let mut x = vec![0.0; n];
  let mut multipliers = vec![0.0; constraints.len()];
  let mut penalty = settings.penalty;
  let mut previous_violation = f64::INFINITY;
  let mut iterations = 0u64;
  let mut converged = false;
  let mut reason = String::new();

  for round in 0..settings.max_outer_iters {
    let cost = AugmentedCost {
      estimate: estimate.clone(),
      objective,
      constraints: constraints.constraints().to_vec(),
      multipliers: multipliers.clone(),
      penalty,
    };
    let run = run_with_restarts(&cost, &x, settings)
      .map_err(|e| solver_failure(e, objective, iterations))?;

    iterations += run.iterations;
    x = run.x;
    converged = run.converged;
    reason = run.reason;

    let w = softmax(&x);
    let violation = constraints.max_violation(estimate, &w);
    debug!(
      %objective,
      round,
      iterations = run.iterations,
      violation,
      penalty,
      "penalty round finished"
    );
    if converged && violation <= settings.tolerance {
      break;
    }

    for (constraint, lambda) in constraints.constraints().iter().zip(multipliers.iter_mut()) {
      let g = constraint.residual(estimate, &w);
      *lambda = if constraint.is_equality() {
        *lambda + penalty * g
      } else {
        (*lambda - penalty * g).max(0.0)
      };
    }
    if violation > 0.25 * previous_violation {
      penalty = (penalty * 10.0).min(MAX_PENALTY);
    }
    previous_violation = violation;
  }

  let weights = softmax(&x);
  if objective == Objective::MaximizeSharpe {
    estimate.sharpe(&weights)?;
  }
  let violation = constraints.max_violation(estimate, &weights);
  let status = if converged && violation <= settings.tolerance {
    SolveStatus::Converged
  } else {
    if reason.is_empty() {
      reason = "constraint tolerance not met".to_string();
    }
    SolveStatus::NotConverged { violation, reason }
  };

  debug!(
    %objective,
    constraints = constraints.len(),
    iterations,
    violation,
    converged = status.is_converged(),
    "solve finished"
  );

  Ok(PortfolioResult {
    metrics: estimate.metrics(&weights),
    weights,
    status,
    iterations,
  })
}

/// Like [`optimize`] but fails with [`PortfolioError::OptimizationDidNotConverge`]
/// unless the solve converged.
pub fn optimize_strict(
  estimate: &MarketEstimate,
  objective: Objective,
  constraints: &ConstraintSet,
  settings: &SolverSettings,
) -> Result<PortfolioResult> {
  let result = optimize(estimate, objective, constraints, settings)?;
  match result.status {
    SolveStatus::Converged => Ok(result),
    SolveStatus::NotConverged { violation, reason } => Err(PortfolioError::OptimizationDidNotConverge {
      objective,
      iterations: result.iterations,
      violation,
      reason,
    }),
    SolveStatus::Failed { reason } => Err(PortfolioError::OptimizationDidNotConverge {
      objective,
      iterations: result.iterations,
      violation: f64::NAN,
      reason,
    }),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array1;
  use ndarray::Array2;
  use ndarray::ArrayView1;
  use ndarray::array;

  use super::*;

  fn two_asset() -> MarketEstimate {
    MarketEstimate::new(
      vec!["LOW".into(), "HIGH".into()],
      array![0.08, 0.12],
      array![[0.04, 0.01], [0.01, 0.09]],
    )
    .unwrap()
  }

  fn three_asset() -> MarketEstimate {
    MarketEstimate::new(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.08, 0.1, 0.12],
      array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]],
    )
    .unwrap()
  }

  fn assert_valid_weights(w: &[f64]) {
    let sum: f64 = w.iter().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
    for &wi in w {
      assert!((-1e-9..=1.0 + 1e-9).contains(&wi), "weight {wi} out of bounds");
    }
  }

  #[test]
  fn softmax_of_zero_is_equal_weights() {
    assert_eq!(softmax(&[0.0; 4]), vec![0.25; 4]);
  }

  #[test]
  fn constraint_sets_are_not_shared() {
    let base = ConstraintSet::base();
    let risk = base.with(Constraint::VolatilityCeiling(0.2));
    let ret = base.with(Constraint::TargetReturn(0.1));

    assert!(base.is_empty());
    assert_eq!(risk.constraints(), &[Constraint::VolatilityCeiling(0.2)]);
    assert_eq!(ret.constraints(), &[Constraint::TargetReturn(0.1)]);
  }

  #[test]
  fn min_volatility_prefers_low_variance_asset() {
    let est = two_asset();
    let res = optimize_strict(
      &est,
      Objective::MinimizeVolatility,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    )
    .unwrap();

    assert_valid_weights(&res.weights);
    assert!(res.weights[0] > 0.5);
    // closed form: (0.09 - 0.01) / (0.04 + 0.09 - 0.02)
    assert_abs_diff_eq!(res.weights[0], 0.08 / 0.11, epsilon = 1e-3);
  }

  #[test]
  fn max_return_concentrates_in_best_asset() {
    let est = three_asset();
    let res = optimize_strict(
      &est,
      Objective::MaximizeReturn,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    )
    .unwrap();

    assert_valid_weights(&res.weights);
    assert!(res.weights[2] > 0.999);
    assert_abs_diff_eq!(res.metrics.expected_return, 0.12, epsilon = 1e-4);
  }

  #[test]
  fn max_volatility_reaches_most_volatile_asset() {
    let est = three_asset();
    let res = optimize_strict(
      &est,
      Objective::MaximizeVolatility,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    )
    .unwrap();

    assert_valid_weights(&res.weights);
    assert_abs_diff_eq!(res.metrics.volatility, 0.4, epsilon = 1e-3);
  }

  #[test]
  fn target_return_equality_holds() {
    let est = three_asset();
    let constraints = ConstraintSet::base().with(Constraint::TargetReturn(0.1));
    let res = optimize_strict(
      &est,
      Objective::MinimizeVolatility,
      &constraints,
      &SolverSettings::default(),
    )
    .unwrap();

    assert_valid_weights(&res.weights);
    assert_abs_diff_eq!(res.metrics.expected_return, 0.1, epsilon = 1e-5);
  }

  #[test]
  fn volatility_ceiling_is_respected() {
    let est = three_asset();
    let ceiling = 0.25;
    let constraints = ConstraintSet::base().with(Constraint::VolatilityCeiling(ceiling));
    let res = optimize_strict(
      &est,
      Objective::MaximizeReturn,
      &constraints,
      &SolverSettings::default(),
    )
    .unwrap();

    assert_valid_weights(&res.weights);
    assert!(res.metrics.volatility <= ceiling + 1e-5);
    // ceiling binds: the unconstrained maximum has volatility 0.4
    assert_abs_diff_eq!(res.metrics.volatility, ceiling, epsilon = 1e-4);
  }

  #[test]
  fn repeated_solves_are_identical() {
    let est = three_asset();
    let settings = SolverSettings::default();
    let a = optimize(&est, Objective::MaximizeSharpe, &ConstraintSet::base(), &settings).unwrap();
    let b = optimize(&est, Objective::MaximizeSharpe, &ConstraintSet::base(), &settings).unwrap();

    assert_eq!(a.weights, b.weights);
  }

  #[test]
  fn sharpe_objective_surfaces_degenerate_volatility() {
    let est = MarketEstimate::new(
      vec!["CASH".into(), "BOND".into()],
      array![0.02, 0.03],
      array![[0.0, 0.0], [0.0, 0.0]],
    )
    .unwrap();

    let err = optimize(
      &est,
      Objective::MaximizeSharpe,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::DegenerateVolatility { .. }));
  }

  #[test]
  fn sharpe_from_zero_volatility_start_does_not_abort() {
    // perfect hedge: equal weights have zero volatility
    let est = MarketEstimate::new(
      vec!["LONG".into(), "HEDGE".into()],
      array![0.1, 0.05],
      array![[0.04, -0.04], [-0.04, 0.04]],
    )
    .unwrap();

    match optimize(
      &est,
      Objective::MaximizeSharpe,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    ) {
      Ok(res) => assert_valid_weights(&res.weights),
      Err(PortfolioError::DegenerateVolatility { .. }) => {}
      Err(other) => panic!("unexpected error: {other}"),
    }
  }

  /// `n` assets from a three-factor model with idiosyncratic noise.
  fn factor_model(n: usize) -> MarketEstimate {
    let loadings = Array2::from_shape_fn((n, 3), |(i, k)| {
      0.05 + 0.1 * (1.3 * (i + 1) as f64 * (k + 1) as f64).sin()
    });
    let mut cov = loadings.dot(&loadings.t());
    for i in 0..n {
      cov[[i, i]] += (0.05 + 0.01 * i as f64).powi(2);
    }
    let mu = Array1::from_shape_fn(n, |i| 0.03 + 0.01 * i as f64);
    let assets = (0..n).map(|i| format!("A{i}")).collect();
    MarketEstimate::new(assets, mu, cov).unwrap()
  }

  fn project_to_simplex(v: &[f64]) -> Vec<f64> {
    let mut u = v.to_vec();
    u.sort_by(|a, b| b.total_cmp(a));
    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (j, &uj) in u.iter().enumerate() {
      cumsum += uj;
      let t = (cumsum - 1.0) / (j + 1) as f64;
      if uj - t > 0.0 {
        theta = t;
      }
    }
    v.iter().map(|&vi| (vi - theta).max(0.0)).collect()
  }

  /// Minimum variance over the simplex by projected gradient descent.
  fn reference_min_volatility(est: &MarketEstimate) -> f64 {
    let cov = est.covariance();
    let n = est.n_assets();
    let lipschitz = 2.0
      * cov
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|c| c.abs()).sum::<f64>())
        .fold(0.0, f64::max);

    let mut w = vec![1.0 / n as f64; n];
    for _ in 0..50_000 {
      let grad = cov.dot(&ArrayView1::from(&w[..]));
      let step: Vec<f64> = w
        .iter()
        .zip(grad.iter())
        .map(|(wi, gi)| wi - 2.0 * gi / lipschitz)
        .collect();
      w = project_to_simplex(&step);
    }
    est.volatility(&w)
  }

  #[test]
  fn min_volatility_matches_reference_for_many_assets() {
    let est = factor_model(12);
    let reference = reference_min_volatility(&est);

    let res = optimize_strict(
      &est,
      Objective::MinimizeVolatility,
      &ConstraintSet::base(),
      &SolverSettings::default(),
    )
    .unwrap();

    assert!(res.status.is_converged());
    assert_valid_weights(&res.weights);
    assert!(res.metrics.volatility >= reference - 1e-9);
    assert_abs_diff_eq!(res.metrics.volatility, reference, epsilon = 1e-6);
  }

  #[test]
  fn restarts_are_required() {
    let settings = SolverSettings {
      max_restarts: 0,
      ..SolverSettings::default()
    };
    assert!(settings.validate().is_err());
  }

  #[test]
  fn iteration_ceiling_reports_non_convergence() {
    let est = three_asset();
    let settings = SolverSettings {
      max_iters: 2,
      max_outer_iters: 1,
      ..SolverSettings::default()
    };

    let lenient = optimize(&est, Objective::MinimizeVolatility, &ConstraintSet::base(), &settings).unwrap();
    assert!(!lenient.status.is_converged());
    assert_valid_weights(&lenient.weights);

    let strict = optimize_strict(&est, Objective::MinimizeVolatility, &ConstraintSet::base(), &settings);
    assert!(matches!(
      strict,
      Err(PortfolioError::OptimizationDidNotConverge { .. })
    ));
  }

  #[test]
  fn invalid_settings_are_rejected() {
    let settings = SolverSettings {
      tolerance: 0.0,
      ..SolverSettings::default()
    };
    assert!(matches!(
      optimize(&two_asset(), Objective::MaximizeReturn, &ConstraintSet::base(), &settings),
      Err(PortfolioError::InvalidInput(_))
    ));
  }
}
