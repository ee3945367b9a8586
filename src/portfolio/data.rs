//! # Portfolio Data
//!
//! $$
//! r_{t,i} = \ln\frac{P_{t,i}}{P_{t-1,i}}
//! $$
//!
//! Aligned asset price histories, gap removal, log returns and CSV loading.

use std::io::BufRead;

use chrono::NaiveDate;
use ndarray::Array2;
use ndarray::Axis;
use ndarray::s;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timestamps x assets matrix of strictly positive prices with no gaps.
///
/// Rows are strictly increasing dates, columns are assets. Once built the
/// matrix is read-only.
#[derive(Clone, Debug)]
pub struct AssetPriceMatrix {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  prices: Array2<f64>,
}

impl AssetPriceMatrix {
  /// Build from a dense `dates.len() x assets.len()` price matrix.
  pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() || prices.ncols() != assets.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "price matrix is {}x{} but {} dates and {} assets were supplied",
        prices.nrows(),
        prices.ncols(),
        dates.len(),
        assets.len()
      )));
    }

    check_increasing(&dates)?;

    for ((row, col), &value) in prices.indexed_iter() {
      if !value.is_finite() || value <= 0.0 {
        return Err(PortfolioError::InvalidPrice {
          asset: assets[col].clone(),
          row,
          value,
        });
      }
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  /// Build from rows that may contain missing cells.
  ///
  /// Dates must be strictly increasing. Assets without a single observation
  /// are dropped first, then every row with a missing cell is removed so the
  /// remaining assets share all dates.
  pub fn from_partial_rows(
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
  ) -> Result<Self> {
    check_increasing(&dates)?;
    if rows.len() != dates.len() {
      return Err(PortfolioError::InvalidInput(format!(
        "{} rows supplied for {} dates",
        rows.len(),
        dates.len()
      )));
    }
    if let Some((idx, row)) = rows
      .iter()
      .enumerate()
      .find(|(_, row)| row.len() != assets.len())
    {
      return Err(PortfolioError::InvalidInput(format!(
        "row {idx} has {} cells, expected {}",
        row.len(),
        assets.len()
      )));
    }

    let keep_cols: Vec<usize> = (0..assets.len())
      .filter(|&col| rows.iter().any(|row| row[col].is_some()))
      .collect();
    for (col, asset) in assets.iter().enumerate() {
      if !keep_cols.contains(&col) {
        debug!(asset = %asset, "dropping asset without observations");
      }
    }

    let mut kept_dates = Vec::with_capacity(dates.len());
    let mut flat = Vec::with_capacity(dates.len() * keep_cols.len());
    for (date, row) in dates.into_iter().zip(rows.iter()) {
      let cells: Option<Vec<f64>> = keep_cols.iter().map(|&col| row[col]).collect();
      if let Some(cells) = cells {
        kept_dates.push(date);
        flat.extend(cells);
      }
    }

    let kept_assets: Vec<String> = keep_cols.iter().map(|&col| assets[col].clone()).collect();
    let prices = Array2::from_shape_vec((kept_dates.len(), kept_assets.len()), flat)
      .map_err(|e| PortfolioError::InvalidInput(e.to_string()))?;

    debug!(
      rows = kept_dates.len(),
      assets = kept_assets.len(),
      "aligned price matrix"
    );
    Self::new(kept_dates, kept_assets, prices)
  }

  /// Parse a `date,<asset>,...` CSV. Empty, `NaN` and `null` cells are missing.
  ///
  /// Fields may be quoted; blank lines are skipped.
  pub fn from_csv<R: BufRead>(reader: R) -> Result<Self> {
    let mut rdr = csv::ReaderBuilder::new()
      .has_headers(true)
      .flexible(true)
      .trim(csv::Trim::All)
      .from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
      return Err(PortfolioError::InvalidInput("empty CSV input".into()));
    }
    let assets: Vec<String> = headers.iter().skip(1).map(String::from).collect();
    if assets.is_empty() {
      return Err(PortfolioError::InvalidInput(
        "CSV header has no asset columns".into(),
      ));
    }

    let mut dates = Vec::new();
    let mut rows = Vec::new();
    for record in rdr.records() {
      let record = record?;
      let line_no = record.position().map_or(0, |p| p.line());

      let raw_date = record.get(0).unwrap_or_default();
      let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT).map_err(|e| {
        PortfolioError::InvalidInput(format!("line {line_no}: bad date '{raw_date}': {e}"))
      })?;

      let cells = record
        .iter()
        .skip(1)
        .map(|field| parse_cell(field, line_no))
        .collect::<Result<Vec<_>>>()?;
      if cells.len() != assets.len() {
        return Err(PortfolioError::InvalidInput(format!(
          "line {line_no}: {} values for {} assets",
          cells.len(),
          assets.len()
        )));
      }

      dates.push(date);
      rows.push(cells);
    }

    Self::from_partial_rows(dates, assets, rows)
  }

  /// Keep rows dated on or after `start`.
  pub fn since(&self, start: NaiveDate) -> Result<Self> {
    let keep: Vec<usize> = self
      .dates
      .iter()
      .enumerate()
      .filter(|(_, d)| **d >= start)
      .map(|(i, _)| i)
      .collect();

    Self::new(
      keep.iter().map(|&i| self.dates[i]).collect(),
      self.assets.clone(),
      self.prices.select(Axis(0), &keep),
    )
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn n_periods(&self) -> usize {
    self.prices.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.prices.ncols()
  }

  /// Per-period log returns, one row fewer than the price matrix.
  pub fn log_returns(&self) -> Array2<f64> {
    if self.prices.nrows() < 2 {
      return Array2::zeros((0, self.prices.ncols()));
    }

    let prev = self.prices.slice(s![..-1, ..]);
    let next = self.prices.slice(s![1.., ..]);
    (&next / &prev).mapv(f64::ln)
  }
}

fn check_increasing(dates: &[NaiveDate]) -> Result<()> {
  match dates.windows(2).find(|pair| pair[1] <= pair[0]) {
    Some(pair) => Err(PortfolioError::InvalidInput(format!(
      "dates must be strictly increasing, found {} after {}",
      pair[1], pair[0]
    ))),
    None => Ok(()),
  }
}

fn parse_cell(field: &str, line_no: u64) -> Result<Option<f64>> {
  if field.is_empty() || field.eq_ignore_ascii_case("nan") || field.eq_ignore_ascii_case("null") {
    return Ok(None);
  }

  field
    .parse::<f64>()
    .map(Some)
    .map_err(|e| PortfolioError::InvalidInput(format!("line {line_no}: bad price '{field}': {e}")))
}

/// Parse an analysis start date in strict `YYYY-MM-DD` form, strictly before `today`.
pub fn parse_start_date(input: &str, today: NaiveDate) -> Result<NaiveDate> {
  let input = input.trim();
  let parts: Vec<&str> = input.split('-').collect();
  let well_formed = parts.len() == 3
    && parts[0].len() == 4
    && parts[1].len() == 2
    && parts[2].len() == 2
    && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit()));
  if !well_formed {
    return Err(PortfolioError::InvalidInput(format!(
      "start date '{input}' must use the YYYY-MM-DD format"
    )));
  }

  let date = NaiveDate::parse_from_str(input, DATE_FORMAT)
    .map_err(|e| PortfolioError::InvalidInput(format!("start date '{input}': {e}")))?;
  if date >= today {
    return Err(PortfolioError::InvalidInput(format!(
      "start date {date} must be before {today}"
    )));
  }

  Ok(date)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
  }

  fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn log_returns_have_one_row_fewer() {
    let prices = AssetPriceMatrix::new(
      vec![day(1), day(2), day(3)],
      names(&["A", "B"]),
      array![[100.0, 50.0], [110.0, 50.0], [99.0, 55.0]],
    )
    .unwrap();

    let r = prices.log_returns();
    assert_eq!(r.dim(), (2, 2));
    assert_abs_diff_eq!(r[[0, 0]], (1.1f64).ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(r[[0, 1]], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(r[[1, 0]], (0.9f64).ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(r[[1, 1]], (1.1f64).ln(), epsilon = 1e-12);
  }

  #[test]
  fn rows_with_gaps_are_dropped() {
    let prices = AssetPriceMatrix::from_partial_rows(
      vec![day(1), day(2), day(3), day(4)],
      names(&["A", "B", "EMPTY"]),
      vec![
        vec![Some(1.0), Some(2.0), None],
        vec![Some(1.1), None, None],
        vec![None, Some(2.1), None],
        vec![Some(1.2), Some(2.2), None],
      ],
    )
    .unwrap();

    assert_eq!(prices.assets(), &names(&["A", "B"])[..]);
    assert_eq!(prices.dates(), &[day(1), day(4)]);
    assert_eq!(prices.prices(), &array![[1.0, 2.0], [1.2, 2.2]]);
  }

  #[test]
  fn non_positive_price_is_rejected() {
    let err = AssetPriceMatrix::new(
      vec![day(1), day(2)],
      names(&["A", "B"]),
      array![[1.0, 2.0], [0.0, 2.0]],
    )
    .unwrap_err();

    match err {
      PortfolioError::InvalidPrice { asset, row, .. } => {
        assert_eq!(asset, "A");
        assert_eq!(row, 1);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn csv_parses_header_and_missing_cells() {
    let csv = "date,AAA,BBB\n2024-01-01,10.0,20.0\n2024-01-02,,20.5\n2024-01-03,10.5,NaN\n\n2024-01-04,11.0,21.0\n";
    let prices = AssetPriceMatrix::from_csv(csv.as_bytes()).unwrap();

    assert_eq!(prices.assets(), &names(&["AAA", "BBB"])[..]);
    assert_eq!(prices.n_periods(), 2);
    assert_eq!(prices.dates(), &[day(1), day(4)]);
  }

  #[test]
  fn csv_rejects_ragged_rows() {
    let csv = "date,AAA,BBB\n2024-01-01,10.0\n";
    assert!(matches!(
      AssetPriceMatrix::from_csv(csv.as_bytes()),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn csv_handles_quoted_fields() {
    let csv = "date,\"BRK,B\",SPY\n2024-01-01,\"300.5\",470.0\n2024-01-02,302.0,\"\"\n";
    let prices = AssetPriceMatrix::from_csv(csv.as_bytes()).unwrap();

    assert_eq!(prices.assets(), &names(&["BRK,B", "SPY"])[..]);
    assert_eq!(prices.dates(), &[day(1)]);
    assert_eq!(prices.prices(), &array![[300.5, 470.0]]);
  }

  #[test]
  fn unordered_or_repeated_dates_are_rejected() {
    let csv = "date,A,B\n2024-01-05,1,2\n2024-01-01,1,2\n2024-01-03,1,2\n2024-01-01,1,2\n";
    assert!(matches!(
      AssetPriceMatrix::from_csv(csv.as_bytes()),
      Err(PortfolioError::InvalidInput(_))
    ));

    let repeated = AssetPriceMatrix::new(
      vec![day(1), day(1)],
      names(&["A", "B"]),
      array![[1.0, 2.0], [1.1, 2.1]],
    );
    assert!(matches!(repeated, Err(PortfolioError::InvalidInput(_))));

    // a duplicate on a row that gap removal would drop still counts
    let dropped_duplicate = AssetPriceMatrix::from_partial_rows(
      vec![day(1), day(2), day(2)],
      names(&["A", "B"]),
      vec![
        vec![Some(1.0), Some(2.0)],
        vec![Some(1.1), None],
        vec![Some(1.2), Some(2.2)],
      ],
    );
    assert!(matches!(dropped_duplicate, Err(PortfolioError::InvalidInput(_))));
  }

  #[test]
  fn since_filters_earlier_rows() {
    let prices = AssetPriceMatrix::new(
      vec![day(1), day(2), day(3)],
      names(&["A", "B"]),
      array![[1.0, 2.0], [1.1, 2.1], [1.2, 2.2]],
    )
    .unwrap();

    let tail = prices.since(day(2)).unwrap();
    assert_eq!(tail.dates(), &[day(2), day(3)]);
    assert_eq!(tail.prices().row(0).to_vec(), vec![1.1, 2.1]);
  }

  #[test]
  fn start_date_must_be_strict_and_in_the_past() {
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

    assert_eq!(
      parse_start_date("2020-01-31", today).unwrap(),
      NaiveDate::from_ymd_opt(2020, 1, 31).unwrap()
    );
    assert!(parse_start_date("2020-1-31", today).is_err());
    assert!(parse_start_date("2020-02-30", today).is_err());
    assert!(parse_start_date("2025-06-01", today).is_err());
    assert!(parse_start_date("yesterday", today).is_err());
  }
}
