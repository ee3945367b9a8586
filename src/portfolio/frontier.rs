//! # Efficient Frontier
//!
//! $$
//! \sigma^\*(\mu^\*) = \min_{\mathbf{w}}\ \sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}\quad\text{s.t.}\quad \mathbf{w}^\top\mu=\mu^\*
//! $$
//!
//! Sweeps equally spaced target returns between the minimum-risk return and
//! the maximum return. Every target yields exactly one point.

use ndarray::Array1;
use rayon::prelude::*;
use tracing::info;
use tracing::warn;

use super::estimate::MarketEstimate;
use super::goal::FeasibleRegion;
use super::optimizers::Constraint;
use super::optimizers::ConstraintSet;
use super::optimizers::Objective;
use super::optimizers::SolverSettings;
use super::optimizers::optimize;
use super::types::FrontierCurve;
use super::types::FrontierPoint;
use super::types::SolveStatus;
use crate::error::PortfolioError;
use crate::error::Result;

/// `points` equally spaced targets across `[min_return, max_return]`, both ends included.
pub fn target_returns(min_return: f64, max_return: f64, points: usize) -> Vec<f64> {
  Array1::linspace(min_return, max_return, points).to_vec()
}

fn frontier_point(estimate: &MarketEstimate, target: f64, settings: &SolverSettings) -> FrontierPoint {
  let constraints = ConstraintSet::base().with(Constraint::TargetReturn(target));

  match optimize(estimate, Objective::MinimizeVolatility, &constraints, settings) {
    Ok(result) => {
      if !result.status.is_converged() {
        warn!(target, status = %result.status, "frontier step did not converge");
      }
      FrontierPoint {
        target_return: target,
        volatility: result.metrics.volatility,
        weights: result.weights,
        status: result.status,
      }
    }
    Err(err) => {
      warn!(target, error = %err, "frontier step failed");
      FrontierPoint {
        target_return: target,
        volatility: f64::NAN,
        weights: Vec::new(),
        status: SolveStatus::Failed {
          reason: err.to_string(),
        },
      }
    }
  }
}

/// Trace the minimum-volatility curve over the feasible return range.
///
/// Steps are independent; with `parallel` they run on the rayon pool and the
/// output keeps ascending target order either way.
pub fn efficient_frontier(
  estimate: &MarketEstimate,
  region: &FeasibleRegion,
  points: usize,
  settings: &SolverSettings,
  parallel: bool,
) -> Result<FrontierCurve> {
  if points == 0 {
    return Err(PortfolioError::InvalidInput(
      "frontier needs at least one point".into(),
    ));
  }
  settings.validate()?;

  let targets = target_returns(region.min_risk_return, region.max_return, points);
  let points: Vec<FrontierPoint> = if parallel {
    targets
      .par_iter()
      .map(|&target| frontier_point(estimate, target, settings))
      .collect()
  } else {
    targets
      .iter()
      .map(|&target| frontier_point(estimate, target, settings))
      .collect()
  };

  let curve = FrontierCurve { points };
  info!(
    points = curve.len(),
    unconverged = curve.unconverged(),
    parallel,
    "efficient frontier finished"
  );
  Ok(curve)
}
