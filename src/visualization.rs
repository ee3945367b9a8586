//! # Visualization
//!
//! $$
//! \{(\sigma^\*(\mu_k), \mu_k)\}_{k=1}^n \mapsto \text{return/volatility chart}
//! $$
//!
use std::fs;
use std::path::Path;

use plotly::Layout;
use plotly::Plot;
use plotly::Scatter;
use plotly::common::Line;
use plotly::common::Marker;
use plotly::common::MarkerSymbol;
use plotly::common::Mode;
use plotly::common::Title;
use plotly::layout::Axis;

use crate::error::Result;
use crate::portfolio::engine::OptimizationReport;
use crate::portfolio::types::PortfolioResult;

pub const FRONTIER_TITLE: &str = "Annual Expected Return x Volatility";

fn legend_label(name: &str, assets: &[String], result: &PortfolioResult) -> String {
  let weights = assets
    .iter()
    .zip(result.weights.iter())
    .map(|(asset, w)| format!("{asset}: {:.2}%", w * 100.0))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "{name} (return {:.2}%, volatility {:.2}%, Sharpe {:.3}) [{weights}]",
    result.metrics.expected_return * 100.0,
    result.metrics.volatility * 100.0,
    result.metrics.sharpe,
  )
}

fn portfolio_marker(
  name: &str,
  report: &OptimizationReport,
  result: &PortfolioResult,
  color: &'static str,
) -> Box<Scatter<f64, f64>> {
  Scatter::new(
    vec![result.metrics.volatility],
    vec![result.metrics.expected_return],
  )
  .mode(Mode::Markers)
  .name(legend_label(name, &report.assets, result))
  .marker(Marker::new().size(14).color(color).symbol(MarkerSymbol::Star))
}

/// Efficient frontier line with the optimal and max-Sharpe portfolios marked.
///
/// Failed frontier points have no volatility and are left out of the line.
pub fn frontier_plot(report: &OptimizationReport) -> Plot {
  let (vols, rets): (Vec<f64>, Vec<f64>) = report
    .frontier
    .iter()
    .filter(|p| p.volatility.is_finite())
    .map(|p| (p.volatility, p.target_return))
    .unzip();

  let mut plot = Plot::new();
  plot.add_trace(
    Scatter::new(vols, rets)
      .mode(Mode::Lines)
      .name("Efficient frontier")
      .line(Line::new().color("#1f77b4").width(2.0)),
  );
  plot.add_trace(portfolio_marker(
    "Optimal",
    report,
    &report.optimal,
    "#d62728",
  ));
  plot.add_trace(portfolio_marker(
    "Max Sharpe",
    report,
    &report.max_sharpe,
    "#2ca02c",
  ));

  plot.set_layout(
    Layout::new()
      .title(Title::from(FRONTIER_TITLE))
      .show_legend(true)
      .x_axis(
        Axis::new()
          .title(Title::from("Volatility"))
          .tick_format(".0%"),
      )
      .y_axis(
        Axis::new()
          .title(Title::from("Expected return"))
          .tick_format(".0%"),
      ),
  );
  plot
}

/// Render [`frontier_plot`] to a standalone HTML file.
pub fn write_frontier_html<P: AsRef<Path>>(report: &OptimizationReport, output_html: P) -> Result<()> {
  let output_html = output_html.as_ref();
  if let Some(parent) = output_html.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  frontier_plot(report).write_html(output_html);
  Ok(())
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;
  use crate::portfolio::engine::PortfolioEngine;
  use crate::portfolio::engine::PortfolioEngineConfig;
  use crate::portfolio::estimate::MarketEstimate;
  use crate::portfolio::goal::OptimizationGoal;

  fn report() -> OptimizationReport {
    let estimate = MarketEstimate::new(
      vec!["A".into(), "B".into()],
      array![0.06, 0.12],
      array![[0.04, 0.006], [0.006, 0.09]],
    )
    .unwrap();
    PortfolioEngine::new(PortfolioEngineConfig {
      frontier_points: 6,
      ..PortfolioEngineConfig::default()
    })
    .run_with_estimate(estimate, OptimizationGoal::MaxSharpe)
    .unwrap()
  }

  #[test]
  fn plot_carries_title_and_portfolio_labels() {
    let json = frontier_plot(&report()).to_json();
    assert!(json.contains(FRONTIER_TITLE));
    assert!(json.contains("Efficient frontier"));
    assert!(json.contains("Max Sharpe"));
    assert!(json.contains("A: "));
  }

  #[test]
  fn legend_lists_weights_in_percent() {
    let report = report();
    let label = legend_label("Optimal", &report.assets, &report.optimal);
    assert!(label.starts_with("Optimal (return "));
    assert!(label.contains("B: "));
    assert!(label.contains('%'));
  }
}
