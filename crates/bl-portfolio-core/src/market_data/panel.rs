use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PortfolioError;
use crate::types::AnalysisPeriod;
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Adjusted closes for every ticker traded on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub closes: BTreeMap<String, Decimal>,
}

/// Date-ordered panel of adjusted closes.
///
/// The allocator requires the panel to be dense over the requested tickers;
/// the simulator tolerates gaps and simply skips a ticker on days it has no
/// close.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricePanel {
    pub rows: Vec<PriceRow>,
}

/// One observation of a benchmark index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPoint {
    pub date: NaiveDate,
    pub close: Decimal,
}

/// Benchmark closes used for relative performance statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSeries {
    pub name: String,
    pub points: Vec<BenchmarkPoint>,
}

// ---------------------------------------------------------------------------
// PricePanel
// ---------------------------------------------------------------------------

impl PricePanel {
    pub fn new(rows: Vec<PriceRow>) -> Self {
        PricePanel { rows }
    }

    /// Build a dense panel from per-ticker columns aligned with `dates`.
    pub fn from_columns(
        dates: &[NaiveDate],
        columns: &BTreeMap<String, Vec<Decimal>>,
    ) -> PortfolioResult<Self> {
        for (ticker, column) in columns {
            if column.len() != dates.len() {
                return Err(PortfolioError::invalid(
                    format!("prices.{}", ticker),
                    format!(
                        "Column has {} closes but there are {} dates; \
                         supply one close per date, e.g. [100.0, 101.5, ...]",
                        column.len(),
                        dates.len()
                    ),
                ));
            }
        }
        let rows = dates
            .iter()
            .enumerate()
            .map(|(i, date)| PriceRow {
                date: *date,
                closes: columns
                    .iter()
                    .map(|(ticker, column)| (ticker.clone(), column[i]))
                    .collect(),
            })
            .collect();
        Ok(PricePanel { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn close(&self, row: usize, ticker: &str) -> Option<Decimal> {
        self.rows.get(row).and_then(|r| r.closes.get(ticker)).copied()
    }

    pub fn period(&self) -> Option<AnalysisPeriod> {
        let first = self.rows.first()?;
        let last = self.rows.last()?;
        Some(AnalysisPeriod {
            start: first.date,
            end: last.date,
            trading_days: self.rows.len(),
        })
    }

    /// Dates must be strictly increasing.
    pub fn validate_ordering(&self) -> PortfolioResult<()> {
        for pair in self.rows.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(PortfolioError::DateError(format!(
                    "Price panel dates must be strictly increasing: {} follows {}",
                    pair[1].date, pair[0].date
                )));
            }
        }
        Ok(())
    }

    /// Every ticker must carry a positive close on every row.
    pub fn validate_dense(&self, tickers: &[String]) -> PortfolioResult<()> {
        self.validate_ordering()?;
        for row in &self.rows {
            for ticker in tickers {
                match row.closes.get(ticker) {
                    None => {
                        return Err(PortfolioError::invalid(
                            format!("prices.{}", ticker),
                            format!(
                                "No close for {} on {}; the panel must be dense over \
                                 the analysis window (forward-fill or trim the range)",
                                ticker, row.date
                            ),
                        ))
                    }
                    Some(close) if *close <= Decimal::ZERO => {
                        return Err(PortfolioError::invalid(
                            format!("prices.{}", ticker),
                            format!(
                                "Close for {} on {} is {}; adjusted closes must be positive",
                                ticker, row.date, close
                            ),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Daily simple returns, one row per date after the first, one column per
    /// ticker in the given order.
    pub fn simple_returns(&self, tickers: &[String]) -> PortfolioResult<Vec<Vec<Decimal>>> {
        self.validate_dense(tickers)?;
        let mut out = Vec::with_capacity(self.rows.len().saturating_sub(1));
        for pair in self.rows.windows(2) {
            let row: Vec<Decimal> = tickers
                .iter()
                .map(|t| {
                    // validate_dense guarantees presence and positivity
                    let prev = pair[0].closes.get(t).copied().unwrap_or(Decimal::ONE);
                    let curr = pair[1].closes.get(t).copied().unwrap_or(prev);
                    curr / prev - Decimal::ONE
                })
                .collect();
            out.push(row);
        }
        Ok(out)
    }
}

/// Ticker universe checks shared by every entry point: size bounds, no
/// blanks, no duplicates.
pub fn validate_tickers(tickers: &[String], min: usize, max: usize) -> PortfolioResult<()> {
    if tickers.len() < min {
        return Err(PortfolioError::InsufficientData(format!(
            "At least {} ticker(s) required, got {}; e.g. [\"AAPL\", \"MSFT\"]",
            min,
            tickers.len()
        )));
    }
    if tickers.len() > max {
        return Err(PortfolioError::invalid(
            "tickers",
            format!("At most {} tickers per request, got {}", max, tickers.len()),
        ));
    }
    for (i, ticker) in tickers.iter().enumerate() {
        if ticker.trim().is_empty() {
            return Err(PortfolioError::invalid(
                format!("tickers[{}]", i),
                "Ticker symbols cannot be blank, e.g. \"AAPL\"",
            ));
        }
        if tickers[..i].contains(ticker) {
            return Err(PortfolioError::invalid(
                "tickers",
                format!("Duplicate ticker '{}'; list each symbol once", ticker),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BenchmarkSeries
// ---------------------------------------------------------------------------

impl BenchmarkSeries {
    pub fn close_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.points
            .binary_search_by(|p| p.date.cmp(&date))
            .ok()
            .map(|i| self.points[i].close)
    }

    pub fn validate(&self) -> PortfolioResult<()> {
        for pair in self.points.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(PortfolioError::DateError(format!(
                    "Benchmark '{}' dates must be strictly increasing: {} follows {}",
                    self.name, pair[1].date, pair[0].date
                )));
            }
        }
        if let Some(p) = self.points.iter().find(|p| p.close <= Decimal::ZERO) {
            return Err(PortfolioError::invalid(
                "benchmark",
                format!("Close on {} is {}; benchmark closes must be positive", p.date, p.close),
            ));
        }
        Ok(())
    }
}
