use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use chrono::Local;
use clap::Parser;
use markowitz_rs::portfolio::AssetPriceMatrix;
use markowitz_rs::portfolio::GoalKind;
use markowitz_rs::portfolio::OptimizationGoal;
use markowitz_rs::portfolio::OptimizationReport;
use markowitz_rs::portfolio::PortfolioEngine;
use markowitz_rs::portfolio::PortfolioEngineConfig;
use markowitz_rs::portfolio::PortfolioResult;
use markowitz_rs::portfolio::parse_start_date;
use markowitz_rs::visualization::write_frontier_html;
use prettytable::Table;
use prettytable::row;
use tracing::info;

#[derive(Parser)]
#[command(name = "markowitz")]
#[command(about = "Markowitz mean-variance portfolio optimizer", long_about = None)]
struct Args {
  /// CSV of closing prices with header `date,<asset>,...`.
  #[arg(long)]
  prices: PathBuf,

  /// Only use prices dated on or after this day (YYYY-MM-DD, before today).
  #[arg(long)]
  start: Option<String>,

  /// Optimization goal: sharpe, risk or return.
  #[arg(long, default_value = "sharpe")]
  goal: String,

  /// Risk ceiling for `risk`, target return for `return`, as annual decimals.
  #[arg(long)]
  target: Option<f64>,

  /// Number of efficient frontier points.
  #[arg(long, default_value_t = 100)]
  points: usize,

  /// Annual risk-free rate used for Sharpe ratios.
  #[arg(long, default_value_t = 0.0)]
  risk_free: f64,

  /// Solve frontier points in parallel.
  #[arg(long, default_value_t = false)]
  parallel: bool,

  /// Write the efficient frontier chart to this HTML file.
  #[arg(long)]
  plot: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    )
    .init();

  let args = Args::parse();

  let file = File::open(&args.prices)
    .with_context(|| format!("failed opening price file {:?}", args.prices))?;
  let mut prices = AssetPriceMatrix::from_csv(BufReader::new(file))
    .with_context(|| format!("failed reading prices from {:?}", args.prices))?;

  if let Some(start) = args.start.as_deref() {
    let start = parse_start_date(start, Local::now().date_naive())?;
    prices = prices.since(start)?;
  }

  let kind: GoalKind = args.goal.parse()?;
  let goal = OptimizationGoal::from_parts(kind, args.target)?;

  let engine = PortfolioEngine::new(PortfolioEngineConfig {
    frontier_points: args.points,
    risk_free: args.risk_free,
    parallel_frontier: args.parallel,
    ..PortfolioEngineConfig::default()
  });
  let report = engine.run(&prices, goal)?;

  print_report(&report);

  if let Some(path) = args.plot.as_ref() {
    write_frontier_html(&report, path)
      .with_context(|| format!("failed writing plot to {:?}", path))?;
    info!(path = ?path, "wrote efficient frontier chart");
  }

  Ok(())
}

fn pct(value: f64) -> String {
  format!("{:.2}%", value * 100.0)
}

fn print_report(report: &OptimizationReport) {
  let region = &report.region;
  let mut bounds = Table::new();
  bounds.add_row(row!["", "Min", "Max"]);
  bounds.add_row(row!["Volatility", pct(region.min_risk), pct(region.max_risk)]);
  bounds.add_row(row![
    "Expected return",
    pct(region.min_risk_return),
    pct(region.max_return)
  ]);
  println!("Feasible region");
  bounds.printstd();

  let mut portfolios = Table::new();
  portfolios.add_row(row!["Portfolio", "Return", "Volatility", "Sharpe", "Status"]);
  let named: [(&str, &PortfolioResult); 5] = [
    ("Optimal", &report.optimal),
    ("Max Sharpe", &report.max_sharpe),
    ("Max return", &report.extremes.max_return),
    ("Min risk", &report.extremes.min_risk),
    ("Max risk", &report.extremes.max_risk),
  ];
  for (name, result) in named {
    portfolios.add_row(row![
      name,
      pct(result.metrics.expected_return),
      pct(result.metrics.volatility),
      format!("{:.4}", result.metrics.sharpe),
      result.status.to_string()
    ]);
  }
  println!("Portfolios ({:?} goal)", report.goal.kind());
  portfolios.printstd();

  let mut weights = Table::new();
  weights.add_row(row!["Asset", "Optimal", "Max Sharpe"]);
  for (idx, asset) in report.assets.iter().enumerate() {
    weights.add_row(row![
      asset,
      pct(report.optimal.weights[idx]),
      pct(report.max_sharpe.weights[idx])
    ]);
  }
  println!("Weights");
  weights.printstd();

  let unconverged = report.frontier.unconverged();
  if unconverged > 0 {
    println!(
      "{unconverged} of {} frontier points did not converge",
      report.frontier.len()
    );
  }
}
