//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Markowitz mean-variance optimization: estimation, constrained solves,
//! goal selection and the efficient frontier.

pub mod data;
pub mod engine;
pub mod estimate;
pub mod frontier;
pub mod goal;
pub mod optimizers;
pub mod types;

pub use data::AssetPriceMatrix;
pub use data::parse_start_date;
pub use engine::OptimizationReport;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use estimate::MIN_VOLATILITY;
pub use estimate::MarketEstimate;
pub use estimate::PERIODS_PER_YEAR;
pub use frontier::efficient_frontier;
pub use frontier::target_returns;
pub use goal::ExtremePortfolios;
pub use goal::FeasibleRegion;
pub use goal::GoalKind;
pub use goal::OptimizationGoal;
pub use goal::TargetKind;
pub use goal::max_sharpe;
pub use goal::solve_goal;
pub use goal::validate_goal;
pub use optimizers::Constraint;
pub use optimizers::ConstraintSet;
pub use optimizers::Objective;
pub use optimizers::SolverSettings;
pub use optimizers::optimize;
pub use optimizers::optimize_strict;
pub use types::FrontierCurve;
pub use types::FrontierPoint;
pub use types::PortfolioMetrics;
pub use types::PortfolioResult;
pub use types::SolveStatus;
