//! # Optimization Goal
//!
//! $$
//! \sigma^\* \in [\sigma_{\min}, \sigma_{\max}],\qquad \mu^\* \in [\mu(\mathbf{w}_{\sigma_{\min}}), \mu_{\max}]
//! $$
//!
//! Goal selection, the three extreme portfolios that bound user targets, and
//! target validation decoupled from any prompting.

use std::fmt::Display;
use std::str::FromStr;

use tracing::info;

use super::estimate::MarketEstimate;
use super::optimizers::Constraint;
use super::optimizers::ConstraintSet;
use super::optimizers::Objective;
use super::optimizers::SolverSettings;
use super::optimizers::optimize_strict;
use super::types::PortfolioResult;
use crate::error::PortfolioError;
use crate::error::Result;

/// Goal names accepted from users.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GoalKind {
  Sharpe,
  Risk,
  Return,
}

impl FromStr for GoalKind {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "sharpe" => Ok(Self::Sharpe),
      "risk" => Ok(Self::Risk),
      "return" => Ok(Self::Return),
      _ => Err(PortfolioError::InvalidGoal(s.to_string())),
    }
  }
}

impl GoalKind {
  /// Which scalar target the goal needs, if any.
  pub fn target_kind(&self) -> Option<TargetKind> {
    match self {
      GoalKind::Sharpe => None,
      GoalKind::Risk => Some(TargetKind::RiskCeiling),
      GoalKind::Return => Some(TargetKind::TargetReturn),
    }
  }
}

/// Kind of user-supplied target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
  RiskCeiling,
  TargetReturn,
}

impl Display for TargetKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TargetKind::RiskCeiling => write!(f, "risk ceiling"),
      TargetKind::TargetReturn => write!(f, "target return"),
    }
  }
}

/// What the optimal portfolio should achieve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OptimizationGoal {
  /// Highest return/volatility ratio.
  MaxSharpe,
  /// Highest return with volatility at most `risk_ceiling`.
  MaxReturnForRisk { risk_ceiling: f64 },
  /// Lowest volatility with return equal to `target_return`.
  MinRiskForReturn { target_return: f64 },
}

impl OptimizationGoal {
  /// Combine a parsed goal name with its optional target.
  pub fn from_parts(kind: GoalKind, target: Option<f64>) -> Result<Self> {
    match (kind, target) {
      (GoalKind::Sharpe, _) => Ok(Self::MaxSharpe),
      (GoalKind::Risk, Some(risk_ceiling)) => Ok(Self::MaxReturnForRisk { risk_ceiling }),
      (GoalKind::Return, Some(target_return)) => Ok(Self::MinRiskForReturn { target_return }),
      (kind, None) => Err(PortfolioError::InvalidInput(format!(
        "goal {kind:?} requires a {} value",
        kind.target_kind().map(|k| k.to_string()).unwrap_or_default()
      ))),
    }
  }

  pub fn kind(&self) -> GoalKind {
    match self {
      OptimizationGoal::MaxSharpe => GoalKind::Sharpe,
      OptimizationGoal::MaxReturnForRisk { .. } => GoalKind::Risk,
      OptimizationGoal::MinRiskForReturn { .. } => GoalKind::Return,
    }
  }

  pub fn objective(&self) -> Objective {
    match self {
      OptimizationGoal::MaxSharpe => Objective::MaximizeSharpe,
      OptimizationGoal::MaxReturnForRisk { .. } => Objective::MaximizeReturn,
      OptimizationGoal::MinRiskForReturn { .. } => Objective::MinimizeVolatility,
    }
  }

  /// Fresh constraint set for this goal, built from the base set.
  pub fn constraints(&self) -> ConstraintSet {
    let base = ConstraintSet::base();
    match *self {
      OptimizationGoal::MaxSharpe => base,
      OptimizationGoal::MaxReturnForRisk { risk_ceiling } => {
        base.with(Constraint::VolatilityCeiling(risk_ceiling))
      }
      OptimizationGoal::MinRiskForReturn { target_return } => {
        base.with(Constraint::TargetReturn(target_return))
      }
    }
  }
}

/// Ranges within which user targets are feasible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeasibleRegion {
  /// Volatility of the minimum-risk portfolio.
  pub min_risk: f64,
  /// Volatility of the maximum-risk portfolio.
  pub max_risk: f64,
  /// Return of the minimum-risk portfolio.
  pub min_risk_return: f64,
  /// Return of the maximum-return portfolio.
  pub max_return: f64,
}

impl FeasibleRegion {
  pub fn risk_range(&self) -> (f64, f64) {
    (self.min_risk, self.max_risk)
  }

  pub fn return_range(&self) -> (f64, f64) {
    (self.min_risk_return, self.max_return)
  }

  fn range(&self, kind: TargetKind) -> (f64, f64) {
    match kind {
      TargetKind::RiskCeiling => self.risk_range(),
      TargetKind::TargetReturn => self.return_range(),
    }
  }
}

/// Maximum-return, minimum-risk and maximum-risk portfolios.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtremePortfolios {
  pub max_return: PortfolioResult,
  pub min_risk: PortfolioResult,
  pub max_risk: PortfolioResult,
}

impl ExtremePortfolios {
  /// Solve the three bound-and-budget-only problems.
  pub fn compute(estimate: &MarketEstimate, settings: &SolverSettings) -> Result<Self> {
    let base = ConstraintSet::base();
    let max_return = optimize_strict(estimate, Objective::MaximizeReturn, &base, settings)?;
    let min_risk = optimize_strict(estimate, Objective::MinimizeVolatility, &base, settings)?;
    let max_risk = optimize_strict(estimate, Objective::MaximizeVolatility, &base, settings)?;

    let extremes = Self {
      max_return,
      min_risk,
      max_risk,
    };
    let region = extremes.feasible_region();
    info!(
      min_risk = region.min_risk,
      max_risk = region.max_risk,
      min_risk_return = region.min_risk_return,
      max_return = region.max_return,
      "computed extreme portfolios"
    );
    Ok(extremes)
  }

  pub fn feasible_region(&self) -> FeasibleRegion {
    FeasibleRegion {
      min_risk: self.min_risk.metrics.volatility,
      max_risk: self.max_risk.metrics.volatility,
      min_risk_return: self.min_risk.metrics.expected_return,
      max_return: self.max_return.metrics.expected_return,
    }
  }
}

/// Check a goal's target against the feasible region without solving anything.
pub fn validate_goal(goal: OptimizationGoal, region: &FeasibleRegion) -> Result<OptimizationGoal> {
  let (kind, value) = match goal {
    OptimizationGoal::MaxSharpe => return Ok(goal),
    OptimizationGoal::MaxReturnForRisk { risk_ceiling } => (TargetKind::RiskCeiling, risk_ceiling),
    OptimizationGoal::MinRiskForReturn { target_return } => (TargetKind::TargetReturn, target_return),
  };

  let (min, max) = region.range(kind);
  if value.is_finite() && min <= value && value <= max {
    Ok(goal)
  } else {
    Err(PortfolioError::InvalidTarget {
      kind,
      value,
      min,
      max,
    })
  }
}

/// Sharpe-maximizing portfolio under bounds and budget.
pub fn max_sharpe(estimate: &MarketEstimate, settings: &SolverSettings) -> Result<PortfolioResult> {
  optimize_strict(
    estimate,
    Objective::MaximizeSharpe,
    &ConstraintSet::base(),
    settings,
  )
}

/// Validate `goal` against `region`, then solve it.
pub fn solve_goal(
  estimate: &MarketEstimate,
  goal: OptimizationGoal,
  region: &FeasibleRegion,
  settings: &SolverSettings,
) -> Result<PortfolioResult> {
  let goal = validate_goal(goal, region)?;
  let result = optimize_strict(estimate, goal.objective(), &goal.constraints(), settings)?;
  info!(
    goal = ?goal,
    expected_return = result.metrics.expected_return,
    volatility = result.metrics.volatility,
    sharpe = result.metrics.sharpe,
    "solved optimization goal"
  );
  Ok(result)
}
