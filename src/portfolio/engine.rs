//! # Portfolio Engine
//!
//! $$
//! P \mapsto (\hat\mu, \hat\Sigma) \mapsto \{\mathbf{w}_{\mu\max}, \mathbf{w}_{\sigma\min}, \mathbf{w}_{\sigma\max}\}
//! \mapsto (\mathbf{w}_{S}, \mathbf{w}^\*, \text{frontier})
//! $$
//!
//! Single entry point running estimation, extremes, goal solve and frontier.

use tracing::info;

use super::data::AssetPriceMatrix;
use super::estimate::MarketEstimate;
use super::estimate::PERIODS_PER_YEAR;
use super::frontier::efficient_frontier;
use super::goal::ExtremePortfolios;
use super::goal::FeasibleRegion;
use super::goal::OptimizationGoal;
use super::goal::max_sharpe;
use super::goal::solve_goal;
use super::goal::validate_goal;
use super::optimizers::SolverSettings;
use super::types::FrontierCurve;
use super::types::PortfolioResult;
use crate::error::PortfolioError;
use crate::error::Result;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct PortfolioEngineConfig {
  /// Annualization factor for mean and covariance.
  pub periods_per_year: f64,
  /// Number of efficient frontier points.
  pub frontier_points: usize,
  /// Risk-free rate used in Sharpe computations.
  pub risk_free: f64,
  /// Run frontier steps on the rayon pool.
  pub parallel_frontier: bool,
  /// Tolerances and iteration limits for every solve.
  pub solver: SolverSettings,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      periods_per_year: PERIODS_PER_YEAR,
      frontier_points: 100,
      risk_free: 0.0,
      parallel_frontier: false,
      solver: SolverSettings::default(),
    }
  }
}

impl PortfolioEngineConfig {
  pub fn validate(&self) -> Result<()> {
    if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
      return Err(PortfolioError::InvalidInput(format!(
        "periods per year must be positive, got {}",
        self.periods_per_year
      )));
    }
    if self.frontier_points < 2 {
      return Err(PortfolioError::InvalidInput(format!(
        "frontier needs at least two points, got {}",
        self.frontier_points
      )));
    }
    if !self.risk_free.is_finite() {
      return Err(PortfolioError::InvalidInput(format!(
        "risk-free rate must be finite, got {}",
        self.risk_free
      )));
    }
    self.solver.validate()
  }
}

/// Everything the presentation layer needs from one optimization run.
#[derive(Clone, Debug)]
pub struct OptimizationReport {
  /// Asset identifiers in weight order.
  pub assets: Vec<String>,
  pub estimate: MarketEstimate,
  pub goal: OptimizationGoal,
  pub extremes: ExtremePortfolios,
  pub region: FeasibleRegion,
  /// Sharpe-maximizing reference portfolio, computed for every goal.
  pub max_sharpe: PortfolioResult,
  /// Portfolio satisfying `goal`.
  pub optimal: PortfolioResult,
  pub frontier: FrontierCurve,
}

impl OptimizationReport {
  /// `(asset, weight)` pairs of the optimal portfolio.
  pub fn optimal_weights(&self) -> Vec<(&str, f64)> {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.optimal.weights.iter().copied())
      .collect()
  }
}

/// Markowitz optimization pipeline.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Annualized return and covariance estimate from aligned prices.
  pub fn estimate(&self, prices: &AssetPriceMatrix) -> Result<MarketEstimate> {
    Ok(MarketEstimate::from_prices(prices, self.config.periods_per_year)?.with_risk_free(self.config.risk_free))
  }

  /// Maximum-return, minimum-risk and maximum-risk portfolios.
  pub fn extremes(&self, estimate: &MarketEstimate) -> Result<ExtremePortfolios> {
    ExtremePortfolios::compute(estimate, &self.config.solver)
  }

  /// Sharpe-maximizing portfolio.
  pub fn max_sharpe(&self, estimate: &MarketEstimate) -> Result<PortfolioResult> {
    max_sharpe(estimate, &self.config.solver)
  }

  /// Validate and solve a user goal against a feasible region.
  pub fn optimize_goal(
    &self,
    estimate: &MarketEstimate,
    region: &FeasibleRegion,
    goal: OptimizationGoal,
  ) -> Result<PortfolioResult> {
    solve_goal(estimate, goal, region, &self.config.solver)
  }

  /// Minimum-volatility curve across the feasible return range.
  pub fn frontier(&self, estimate: &MarketEstimate, region: &FeasibleRegion) -> Result<FrontierCurve> {
    efficient_frontier(
      estimate,
      region,
      self.config.frontier_points,
      &self.config.solver,
      self.config.parallel_frontier,
    )
  }

  /// Full pipeline from a price history.
  pub fn run(&self, prices: &AssetPriceMatrix, goal: OptimizationGoal) -> Result<OptimizationReport> {
    self.config.validate()?;
    let estimate = self.estimate(prices)?;
    self.run_with_estimate(estimate, goal)
  }

  /// Full pipeline from an existing estimate.
  ///
  /// Any estimation, validation or extreme-portfolio failure aborts the run;
  /// frontier steps that do not converge are flagged on their points instead.
  pub fn run_with_estimate(
    &self,
    estimate: MarketEstimate,
    goal: OptimizationGoal,
  ) -> Result<OptimizationReport> {
    self.config.validate()?;

    let extremes = self.extremes(&estimate)?;
    let region = extremes.feasible_region();
    let goal = validate_goal(goal, &region)?;

    let max_sharpe = self.max_sharpe(&estimate)?;
    let optimal = match goal {
      OptimizationGoal::MaxSharpe => max_sharpe.clone(),
      _ => self.optimize_goal(&estimate, &region, goal)?,
    };
    let frontier = self.frontier(&estimate, &region)?;

    info!(
      assets = estimate.n_assets(),
      goal = ?goal.kind(),
      frontier_points = frontier.len(),
      "optimization run finished"
    );

    Ok(OptimizationReport {
      assets: estimate.assets().to_vec(),
      estimate,
      goal,
      extremes,
      region,
      max_sharpe,
      optimal,
      frontier,
    })
  }
}
