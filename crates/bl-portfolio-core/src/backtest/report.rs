use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market_data::BenchmarkSeries;
use crate::metrics::{benchmark_relative, drawdown_series, returns_from_values, total_return};
use crate::types::{Money, Rate};
use crate::PortfolioResult;

/// Days of holding after which a position counts as long term.
pub const LONG_TERM_DAYS: i64 = 365;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Granularity of the emitted value series. Metrics always use daily values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesFrequency {
    #[default]
    Daily,
    /// Last trading day of each ISO week.
    Weekly,
    /// Last trading day of each month.
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub value: Money,
    /// Decline from the running peak, <= 0.
    pub drawdown: Rate,
}

/// The deepest peak-to-trough decline of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownEpisode {
    pub peak_date: NaiveDate,
    pub trough_date: NaiveDate,
    /// First day the value is back at or above the peak, if ever.
    pub recovery_date: Option<NaiveDate>,
    pub max_drawdown: Rate,
    /// Calendar days from peak to recovery, or to the last day if unrecovered.
    pub duration_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i64,
    pub is_long_term: bool,
}

/// Portfolio against benchmark over the dates both series cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub name: String,
    pub benchmark_return: Rate,
    pub portfolio_return: Rate,
    pub excess_return: Rate,
    pub alpha: Rate,
    pub beta: Decimal,
    pub information_ratio: Decimal,
    pub tracking_error: Rate,
    pub overlapping_days: usize,
}

// ---------------------------------------------------------------------------
// Value series
// ---------------------------------------------------------------------------

/// Attach running-peak drawdowns to dated values.
pub fn value_points(dates: &[NaiveDate], values: &[Money]) -> Vec<ValuePoint> {
    dates
        .iter()
        .zip(values.iter())
        .zip(drawdown_series(values))
        .map(|((date, value), drawdown)| ValuePoint {
            date: *date,
            value: *value,
            drawdown,
        })
        .collect()
}

/// Keep the last point of each week or month.
pub fn resample(points: &[ValuePoint], frequency: SeriesFrequency) -> Vec<ValuePoint> {
    let bucket = |d: &NaiveDate| -> (i32, u32) {
        match frequency {
            SeriesFrequency::Daily => (d.year(), d.ordinal()),
            SeriesFrequency::Weekly => {
                let w = d.iso_week();
                (w.year(), w.week())
            }
            SeriesFrequency::Monthly => (d.year(), d.month()),
        }
    };
    let mut out: Vec<ValuePoint> = Vec::new();
    for point in points {
        match out.last_mut() {
            Some(last) if bucket(&last.date) == bucket(&point.date) => *last = point.clone(),
            _ => out.push(point.clone()),
        }
    }
    out
}

/// Locate the deepest drawdown and whether it recovered.
pub fn drawdown_episode(points: &[ValuePoint]) -> Option<DrawdownEpisode> {
    let trough_idx = points
        .iter()
        .enumerate()
        .filter(|(_, p)| p.drawdown < Decimal::ZERO)
        .min_by(|a, b| a.1.drawdown.cmp(&b.1.drawdown).then(a.0.cmp(&b.0)))
        .map(|(i, _)| i)?;

    let trough = &points[trough_idx];
    let peak_idx = points[..trough_idx]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.value.cmp(&b.1.value).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let peak = &points[peak_idx];

    let recovery = points[trough_idx..]
        .iter()
        .find(|p| p.value >= peak.value)
        .map(|p| p.date);
    let end = recovery.or(points.last().map(|p| p.date)).unwrap_or(trough.date);

    Some(DrawdownEpisode {
        peak_date: peak.date,
        trough_date: trough.date,
        recovery_date: recovery,
        max_drawdown: trough.drawdown,
        duration_days: (end - peak.date).num_days(),
    })
}

/// Holding span per ticker from first acquisition to the last day held.
pub fn holding_periods(
    first_acquired: &BTreeMap<String, NaiveDate>,
    last_held: &BTreeMap<String, NaiveDate>,
) -> BTreeMap<String, HoldingPeriod> {
    first_acquired
        .iter()
        .map(|(ticker, start)| {
            let end = last_held.get(ticker).copied().unwrap_or(*start).max(*start);
            let days = (end - *start).num_days();
            (
                ticker.clone(),
                HoldingPeriod {
                    start_date: *start,
                    end_date: end,
                    days,
                    is_long_term: days >= LONG_TERM_DAYS,
                },
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Benchmark
// ---------------------------------------------------------------------------

/// Compare daily values with a benchmark on the dates both cover.
///
/// Returns `Ok(None)` when fewer than two dates overlap.
pub fn compare_benchmark(
    points: &[ValuePoint],
    benchmark: &BenchmarkSeries,
    risk_free_rate: Rate,
) -> PortfolioResult<Option<BenchmarkComparison>> {
    let mut portfolio_values = Vec::new();
    let mut benchmark_values = Vec::new();
    for point in points {
        if let Some(close) = benchmark.close_on(point.date) {
            portfolio_values.push(point.value);
            benchmark_values.push(close);
        }
    }
    if portfolio_values.len() < 2 {
        return Ok(None);
    }

    let port_returns = returns_from_values(&portfolio_values);
    let bench_returns = returns_from_values(&benchmark_values);
    let relative = benchmark_relative(&port_returns, &bench_returns, risk_free_rate)?;
    let portfolio_return = total_return(&port_returns);
    let benchmark_return = total_return(&bench_returns);

    Ok(Some(BenchmarkComparison {
        name: benchmark.name.clone(),
        benchmark_return,
        portfolio_return,
        excess_return: portfolio_return - benchmark_return,
        alpha: relative.alpha,
        beta: relative.beta,
        information_ratio: relative.information_ratio,
        tracking_error: relative.tracking_error,
        overlapping_days: portfolio_values.len(),
    }))
}
