//! # Errors
//!
//! $$
//! \text{estimate} \to \text{validate} \to \text{solve}, \quad \text{first failure aborts the run}
//! $$
//!
//! Error taxonomy shared by every stage of the optimization pipeline.

use thiserror::Error;

use crate::portfolio::goal::TargetKind;
use crate::portfolio::optimizers::Objective;

/// Errors raised while estimating, validating or optimizing a portfolio.
#[derive(Debug, Error)]
pub enum PortfolioError {
  /// Too few assets or periods to estimate returns and covariances.
  #[error("insufficient data for assets [{}] with {periods} periods: {reason}", .assets.join(", "))]
  InsufficientData {
    assets: Vec<String>,
    periods: usize,
    reason: String,
  },

  /// A price that is not strictly positive and finite.
  #[error("invalid price {value} for asset '{asset}' at row {row}")]
  InvalidPrice { asset: String, row: usize, value: f64 },

  /// Malformed input data, dates or configuration.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Unknown optimization goal name.
  #[error("unknown optimization goal '{0}', expected one of \"sharpe\", \"risk\" or \"return\"")]
  InvalidGoal(String),

  /// Risk ceiling or target return outside the feasible range.
  #[error("{kind} target {value:.6} is outside the feasible range [{min:.6}, {max:.6}]")]
  InvalidTarget {
    kind: TargetKind,
    value: f64,
    min: f64,
    max: f64,
  },

  /// The solver ran out of iterations or could not satisfy the constraints.
  #[error(
    "{objective} did not converge after {iterations} iterations (constraint violation {violation:.3e}): {reason}"
  )]
  OptimizationDidNotConverge {
    objective: Objective,
    iterations: u64,
    violation: f64,
    reason: String,
  },

  /// Zero portfolio volatility makes the Sharpe ratio undefined.
  #[error("portfolio volatility {volatility:.3e} is too small to compute a Sharpe ratio")]
  DegenerateVolatility { volatility: f64 },

  /// Malformed CSV framing or an unreadable price file.
  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Result alias for portfolio operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
