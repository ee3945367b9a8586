//! # Portfolio Types
//!
//! $$
//! (\mu_p, \sigma_p, S_p) = \left(\mathbf{w}^\top\mu,\ \sqrt{\mathbf{w}^\top\Sigma\mathbf{w}},\ \frac{\mu_p - r_f}{\sigma_p}\right)
//! $$
//!
//! Shared result containers for optimizer solves and the efficient frontier.

use std::fmt::Display;

use impl_new_derive::ImplNew;

/// Expected return, volatility and Sharpe ratio of one weight vector.
#[derive(ImplNew, Clone, Copy, Debug, Default, PartialEq)]
pub struct PortfolioMetrics {
  /// Annualized expected log-return.
  pub expected_return: f64,
  /// Annualized volatility, never negative.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero when volatility vanishes.
  pub sharpe: f64,
}

/// Outcome of a single optimizer call.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveStatus {
  /// Solver converged and every constraint holds within tolerance.
  Converged,
  /// Solver stopped early or left a constraint violated.
  NotConverged { violation: f64, reason: String },
  /// Solver could not produce weights at all.
  Failed { reason: String },
}

impl SolveStatus {
  pub fn is_converged(&self) -> bool {
    matches!(self, SolveStatus::Converged)
  }
}

impl Display for SolveStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SolveStatus::Converged => write!(f, "converged"),
      SolveStatus::NotConverged { violation, reason } => {
        write!(f, "not converged (violation {violation:.3e}, {reason})")
      }
      SolveStatus::Failed { reason } => write!(f, "failed ({reason})"),
    }
  }
}

/// Weights produced by the optimizer together with their metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioResult {
  /// One weight per asset, in asset order, each in `[0, 1]`, summing to one.
  pub weights: Vec<f64>,
  pub metrics: PortfolioMetrics,
  pub status: SolveStatus,
  /// Inner solver iterations summed over all penalty rounds.
  pub iterations: u64,
}

/// One step of the efficient frontier sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  pub target_return: f64,
  /// Minimum volatility reached for `target_return`; `NaN` only when the step failed.
  pub volatility: f64,
  pub weights: Vec<f64>,
  pub status: SolveStatus,
}

/// Frontier points ordered by ascending target return.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrontierCurve {
  pub points: Vec<FrontierPoint>,
}

impl FrontierCurve {
  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &FrontierPoint> {
    self.points.iter()
  }

  pub fn target_returns(&self) -> Vec<f64> {
    self.points.iter().map(|p| p.target_return).collect()
  }

  pub fn volatilities(&self) -> Vec<f64> {
    self.points.iter().map(|p| p.volatility).collect()
  }

  /// Number of points whose solve did not converge.
  pub fn unconverged(&self) -> usize {
    self.points.iter().filter(|p| !p.status.is_converged()).count()
  }
}
