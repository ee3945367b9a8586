//! # Return and Risk Estimate
//!
//! $$
//! \hat\mu = k\,\bar r,\qquad \hat\Sigma = \frac{k}{T-1}\sum_{t=1}^{T}(r_t-\bar r)(r_t-\bar r)^\top
//! $$
//!
//! Annualized expected log-returns and covariance, and the portfolio metrics
//! evaluated against them.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use tracing::info;

use super::data::AssetPriceMatrix;
use super::types::PortfolioMetrics;
use crate::error::PortfolioError;
use crate::error::Result;

/// Trading days per year.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Volatility below which the Sharpe ratio is treated as undefined.
pub const MIN_VOLATILITY: f64 = 1e-12;

const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Annualized return vector and covariance matrix over a fixed asset list.
#[derive(Clone, Debug)]
pub struct MarketEstimate {
  assets: Vec<String>,
  expected_returns: Array1<f64>,
  covariance: Array2<f64>,
  risk_free: f64,
}

impl MarketEstimate {
  /// Build directly from annualized expected returns and covariance.
  pub fn new(
    assets: Vec<String>,
    expected_returns: Array1<f64>,
    covariance: Array2<f64>,
  ) -> Result<Self> {
    let n = assets.len();
    if n < 2 {
      return Err(PortfolioError::InsufficientData {
        assets,
        periods: 0,
        reason: "at least two assets are required".into(),
      });
    }
    if expected_returns.len() != n || covariance.dim() != (n, n) {
      return Err(PortfolioError::InvalidInput(format!(
        "{n} assets but {} expected returns and a {}x{} covariance",
        expected_returns.len(),
        covariance.nrows(),
        covariance.ncols()
      )));
    }
    if expected_returns.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "return and covariance estimates must be finite".into(),
      ));
    }

    for i in 0..n {
      if covariance[[i, i]] < 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
          "negative variance {} for asset '{}'",
          covariance[[i, i]],
          assets[i]
        )));
      }
      for j in (i + 1)..n {
        let (a, b) = (covariance[[i, j]], covariance[[j, i]]);
        if (a - b).abs() > SYMMETRY_TOLERANCE * (1.0 + a.abs().max(b.abs())) {
          return Err(PortfolioError::InvalidInput(format!(
            "covariance is not symmetric between '{}' and '{}'",
            assets[i], assets[j]
          )));
        }
      }
    }

    Ok(Self {
      assets,
      expected_returns,
      covariance,
      risk_free: 0.0,
    })
  }

  /// Estimate from an aligned price history.
  ///
  /// The mean is the plain average of log returns and the covariance uses the
  /// sample (`T - 1`) convention; both are scaled by `periods_per_year`.
  pub fn from_prices(prices: &AssetPriceMatrix, periods_per_year: f64) -> Result<Self> {
    let assets = prices.assets().to_vec();
    let periods = prices.n_periods();

    if assets.len() < 2 {
      return Err(PortfolioError::InsufficientData {
        assets,
        periods,
        reason: "at least two assets are required".into(),
      });
    }
    // Sample covariance needs two return observations, i.e. three prices.
    if periods < 3 {
      return Err(PortfolioError::InsufficientData {
        assets,
        periods,
        reason: "at least three aligned prices are required (two returns for a sample covariance), \
                 so two prices are rejected even though they yield one return"
          .into(),
      });
    }
    if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
      return Err(PortfolioError::InvalidInput(format!(
        "periods per year must be positive, got {periods_per_year}"
      )));
    }

    let returns = prices.log_returns();
    let mean = returns
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::InsufficientData {
        assets: assets.clone(),
        periods,
        reason: "no returns could be computed".into(),
      })?;
    let cov = returns
      .t()
      .cov(1.0)
      .map_err(|e| PortfolioError::InvalidInput(e.to_string()))?;

    let estimate = Self::new(assets, mean * periods_per_year, cov * periods_per_year)?;
    info!(
      assets = estimate.n_assets(),
      observations = returns.nrows(),
      "built return/covariance estimate"
    );
    Ok(estimate)
  }

  /// Set the rate subtracted from returns in the Sharpe ratio.
  pub fn with_risk_free(mut self, risk_free: f64) -> Self {
    self.risk_free = risk_free;
    self
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn expected_returns(&self) -> &Array1<f64> {
    &self.expected_returns
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  pub fn risk_free(&self) -> f64 {
    self.risk_free
  }

  /// Per-asset annualized volatilities.
  pub fn asset_volatilities(&self) -> Array1<f64> {
    self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
  }

  /// Portfolio expected return `w . mu`.
  ///
  /// # Panics
  ///
  /// If `weights` does not have one entry per asset.
  pub fn expected_return(&self, weights: &[f64]) -> f64 {
    self.expected_returns.dot(&ArrayView1::from(weights))
  }

  /// Portfolio volatility `sqrt(w' Sigma w)`.
  ///
  /// Any real vector is accepted, including infeasible optimizer iterates.
  pub fn volatility(&self, weights: &[f64]) -> f64 {
    let w = ArrayView1::from(weights);
    w.dot(&self.covariance.dot(&w)).max(0.0).sqrt()
  }

  /// Sharpe ratio, failing with [`PortfolioError::DegenerateVolatility`] at zero volatility.
  pub fn sharpe(&self, weights: &[f64]) -> Result<f64> {
    let volatility = self.volatility(weights);
    if volatility < MIN_VOLATILITY {
      return Err(PortfolioError::DegenerateVolatility { volatility });
    }
    Ok((self.expected_return(weights) - self.risk_free) / volatility)
  }

  /// Return, volatility and Sharpe ratio of `weights`.
  ///
  /// A degenerate volatility reports a Sharpe ratio of zero; use
  /// [`MarketEstimate::sharpe`] to detect it.
  pub fn metrics(&self, weights: &[f64]) -> PortfolioMetrics {
    let expected_return = self.expected_return(weights);
    let volatility = self.volatility(weights);
    let sharpe = if volatility >= MIN_VOLATILITY {
      (expected_return - self.risk_free) / volatility
    } else {
      0.0
    };

    PortfolioMetrics::new(expected_return, volatility, sharpe)
  }
}
