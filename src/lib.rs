//! # markowitz-rs
//!
//! $$
//! \max_{\mathbf{w}\in\Delta}\ f(\mathbf{w})\quad\text{s.t.}\quad g_i(\mathbf{w}) \ge 0,\ h_j(\mathbf{w}) = 0
//! $$
//!
//! Markowitz mean-variance portfolio optimization over long-only, fully
//! invested weights: annualized estimates from price histories, extreme and
//! Sharpe-optimal portfolios, user goals and the efficient frontier.

pub mod error;
pub mod portfolio;
pub mod visualization;

pub use error::PortfolioError;
pub use error::Result;
