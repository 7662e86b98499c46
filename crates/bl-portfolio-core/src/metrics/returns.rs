use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::types::{Rate, TRADING_DAYS_PER_YEAR};
use crate::PortfolioResult;

/// Terminal statistics of a daily returns series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_return: Rate,
    pub cagr: Rate,
    pub volatility: Rate,
    pub sharpe_ratio: Decimal,
    pub sortino_ratio: Decimal,
    /// Deepest trough of `cum / cummax - 1`; zero or negative.
    pub max_drawdown: Rate,
    pub calmar_ratio: Decimal,
}

/// Benchmark-relative statistics computed from aligned daily returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRelative {
    /// Annualised Jensen's alpha on daily excess returns.
    pub alpha: Rate,
    pub beta: Decimal,
    pub information_ratio: Decimal,
    /// Annualised standard deviation of active returns.
    pub tracking_error: Rate,
}

/// Compute every terminal statistic of a daily returns series.
pub fn compute_summary(returns: &[Decimal], risk_free_rate: Rate) -> MetricsSummary {
    let total = total_return(returns);
    let growth = cagr(returns);
    let vol = annualized_volatility(returns);
    let downside = downside_deviation(returns);
    let mdd = max_drawdown(returns);

    MetricsSummary {
        total_return: total,
        cagr: growth,
        volatility: vol,
        sharpe_ratio: sharpe_ratio(growth, vol, risk_free_rate),
        sortino_ratio: sharpe_ratio(growth, downside, risk_free_rate),
        max_drawdown: mdd,
        calmar_ratio: calmar_ratio(growth, mdd),
    }
}

/// Compounded return: prod(1 + r) - 1.
pub fn total_return(returns: &[Decimal]) -> Rate {
    cumulative_values(returns)
        .last()
        .map(|v| *v - Decimal::ONE)
        .unwrap_or(Decimal::ZERO)
}

/// Upper bound on reported CAGR. Short, fast-growing series annualise past
/// what a `Decimal` can hold and saturate here instead.
pub const CAGR_CEILING: Rate = dec!(1000000);

/// Compound annual growth rate with `years = observations / 252`, capped at
/// [`CAGR_CEILING`].
pub fn cagr(returns: &[Decimal]) -> Rate {
    if returns.is_empty() {
        return Decimal::ZERO;
    }
    let growth = Decimal::ONE + total_return(returns);
    if growth <= Decimal::ZERO {
        return -Decimal::ONE;
    }
    let years = Decimal::from(returns.len() as i64) / Decimal::from(TRADING_DAYS_PER_YEAR);
    let exponent = Decimal::ONE / years;
    match growth.checked_powd(exponent) {
        Some(v) => (v - Decimal::ONE).min(CAGR_CEILING),
        None if growth > Decimal::ONE => CAGR_CEILING,
        None => -Decimal::ONE,
    }
}

/// Sample standard deviation scaled by sqrt(252).
pub fn annualized_volatility(returns: &[Decimal]) -> Rate {
    let m = mean(returns);
    sqrt_decimal(sample_variance(returns, m)) * annualisation_root()
}

/// Root-mean-square of negative returns scaled by sqrt(252).
pub fn downside_deviation(returns: &[Decimal]) -> Rate {
    let n = returns.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    let sum_sq: Decimal = returns
        .iter()
        .filter(|r| **r < Decimal::ZERO)
        .map(|r| r * r)
        .sum();
    sqrt_decimal(sum_sq / Decimal::from(n as i64)) * annualisation_root()
}

/// Excess return per unit of risk; zero when risk is zero.
pub fn sharpe_ratio(annual_return: Rate, risk: Rate, risk_free_rate: Rate) -> Decimal {
    if risk.is_zero() {
        Decimal::ZERO
    } else {
        (annual_return - risk_free_rate) / risk
    }
}

/// CAGR over |max drawdown|; zero when there was no drawdown.
pub fn calmar_ratio(cagr: Rate, max_drawdown: Rate) -> Decimal {
    if max_drawdown.is_zero() {
        Decimal::ZERO
    } else {
        cagr / max_drawdown.abs()
    }
}

/// Maximum drawdown of the compounded series, reported as a non-positive number.
pub fn max_drawdown(returns: &[Decimal]) -> Rate {
    drawdown_series(&cumulative_values(returns))
        .into_iter()
        .min()
        .unwrap_or(Decimal::ZERO)
        .min(Decimal::ZERO)
}

/// Growth of one unit: `cum[i] = prod_{j<=i}(1 + r_j)`.
pub fn cumulative_values(returns: &[Decimal]) -> Vec<Decimal> {
    let mut cumulative = Decimal::ONE;
    returns
        .iter()
        .map(|r| {
            cumulative *= Decimal::ONE + r;
            cumulative
        })
        .collect()
}

/// `value / running_max - 1` for each point; zero where the running max is not positive.
pub fn drawdown_series(values: &[Decimal]) -> Vec<Decimal> {
    let mut peak = Decimal::ZERO;
    values
        .iter()
        .map(|v| {
            if *v > peak {
                peak = *v;
            }
            if peak <= Decimal::ZERO {
                Decimal::ZERO
            } else {
                *v / peak - Decimal::ONE
            }
        })
        .collect()
}

/// Simple period returns of a value series.
pub fn returns_from_values(values: &[Decimal]) -> Vec<Decimal> {
    values
        .windows(2)
        .map(|w| {
            if w[0].is_zero() {
                Decimal::ZERO
            } else {
                w[1] / w[0] - Decimal::ONE
            }
        })
        .collect()
}

/// Alpha, beta, information ratio and tracking error of `portfolio` against
/// `benchmark`, both daily and aligned on the same dates.
pub fn benchmark_relative(
    portfolio: &[Decimal],
    benchmark: &[Decimal],
    risk_free_rate: Rate,
) -> PortfolioResult<BenchmarkRelative> {
    if portfolio.len() != benchmark.len() {
        return Err(PortfolioError::invalid(
            "benchmark",
            format!(
                "Benchmark has {} returns but portfolio has {}; align both series on the same dates",
                benchmark.len(),
                portfolio.len()
            ),
        ));
    }
    if portfolio.len() < 2 {
        return Ok(BenchmarkRelative::default());
    }

    let periods = Decimal::from(TRADING_DAYS_PER_YEAR);
    let rf_daily = risk_free_rate / periods;

    let ex_p: Vec<Decimal> = portfolio.iter().map(|r| r - rf_daily).collect();
    let ex_b: Vec<Decimal> = benchmark.iter().map(|r| r - rf_daily).collect();
    let mean_p = mean(&ex_p);
    let mean_b = mean(&ex_b);

    let var_b = sample_variance(&ex_b, mean_b);
    let beta = if var_b.is_zero() {
        Decimal::ZERO
    } else {
        covariance(&ex_p, &ex_b, mean_p, mean_b) / var_b
    };
    let alpha = (mean_p - beta * mean_b) * periods;

    let active: Vec<Decimal> = portfolio
        .iter()
        .zip(benchmark.iter())
        .map(|(p, b)| p - b)
        .collect();
    let active_mean = mean(&active);
    let active_std = sqrt_decimal(sample_variance(&active, active_mean));
    let tracking_error = active_std * annualisation_root();
    let information_ratio = if active_std.is_zero() {
        Decimal::ZERO
    } else {
        active_mean / active_std * annualisation_root()
    };

    Ok(BenchmarkRelative {
        alpha,
        beta,
        information_ratio,
        tracking_error,
    })
}

// ---------------------------------------------------------------------------
// Statistical helpers
// ---------------------------------------------------------------------------

pub(crate) fn mean(data: &[Decimal]) -> Decimal {
    if data.is_empty() {
        return Decimal::ZERO;
    }
    data.iter().sum::<Decimal>() / Decimal::from(data.len() as i64)
}

/// Sample variance (n-1 denominator)
pub(crate) fn sample_variance(data: &[Decimal], mean: Decimal) -> Decimal {
    let n = data.len();
    if n < 2 {
        return Decimal::ZERO;
    }
    let sum_sq: Decimal = data.iter().map(|x| (x - mean) * (x - mean)).sum();
    sum_sq / Decimal::from((n - 1) as i64)
}

/// Covariance between two series (sample, n-1)
pub(crate) fn covariance(x: &[Decimal], y: &[Decimal], x_mean: Decimal, y_mean: Decimal) -> Decimal {
    let n = x.len().min(y.len());
    if n < 2 {
        return Decimal::ZERO;
    }
    let sum: Decimal = x
        .iter()
        .zip(y.iter())
        .map(|(xi, yi)| (xi - x_mean) * (yi - y_mean))
        .sum();
    sum / Decimal::from((n - 1) as i64)
}

pub(crate) fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

fn annualisation_root() -> Decimal {
    sqrt_decimal(Decimal::from(TRADING_DAYS_PER_YEAR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_returns() -> Vec<Decimal> {
        vec![
            dec!(0.05),
            dec!(-0.02),
            dec!(0.03),
            dec!(0.01),
            dec!(-0.01),
            dec!(0.04),
            dec!(0.02),
            dec!(-0.03),
            dec!(0.06),
            dec!(0.01),
            dec!(-0.02),
            dec!(0.03),
        ]
    }

    fn close(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_total_return() {
        let r = vec![dec!(0.10), dec!(-0.10)];
        // 1.1 * 0.9 - 1 = -0.01
        assert_eq!(total_return(&r), dec!(-0.01));
    }

    #[test]
    fn test_cagr_one_year_equals_total() {
        let r = vec![dec!(0.0005); 252];
        let total = total_return(&r);
        assert!(close(cagr(&r), total, dec!(0.0000001)));
    }

    #[test]
    fn test_cagr_two_years() {
        // 504 days, total growth 1.21 => 10% per year
        let mut r = vec![Decimal::ZERO; 504];
        r[0] = dec!(0.21);
        assert!(close(cagr(&r), dec!(0.10), dec!(0.000001)));
    }

    #[test]
    fn test_cagr_total_loss() {
        let r = vec![dec!(-1), dec!(0.5)];
        assert_eq!(cagr(&r), dec!(-1));
    }

    #[test]
    fn test_cagr_saturates_on_short_doubling() {
        // doubling in two days annualises to 2^126, far past Decimal range
        let r = vec![dec!(0.5), dec!(0.3333333333)];
        assert_eq!(cagr(&r), CAGR_CEILING);
        let summary = compute_summary(&r, dec!(0.02));
        assert_eq!(summary.cagr, CAGR_CEILING);
        assert!(summary.sharpe_ratio > Decimal::ZERO);
    }

    #[test]
    fn test_volatility_positive() {
        assert!(annualized_volatility(&sample_returns()) > Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown() {
        let returns = vec![dec!(0.10), dec!(-0.20), dec!(0.05), dec!(-0.10)];
        let dd = max_drawdown(&returns);
        // Peak 1.1, trough 0.8316 => -0.244
        assert!(close(dd, dec!(0.8316) / dec!(1.1) - Decimal::ONE, dec!(0.0000001)));
        assert!(dd < dec!(-0.20));
    }

    #[test]
    fn test_max_drawdown_monotonic_rise_is_zero() {
        let returns = vec![dec!(0.01), dec!(0.02), dec!(0.03)];
        assert_eq!(max_drawdown(&returns), Decimal::ZERO);
        assert_eq!(calmar_ratio(cagr(&returns), max_drawdown(&returns)), Decimal::ZERO);
    }

    #[test]
    fn test_sortino_no_downside() {
        let s = compute_summary(&[dec!(0.01), dec!(0.01), dec!(0.01)], Decimal::ZERO);
        assert_eq!(s.sortino_ratio, Decimal::ZERO);
        // Zero variance => zero volatility => zero Sharpe, no NaN
        assert_eq!(s.volatility, Decimal::ZERO);
        assert_eq!(s.sharpe_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_empty_series_is_neutral() {
        let s = compute_summary(&[], dec!(0.02));
        assert_eq!(s, MetricsSummary::default());
    }

    #[test]
    fn test_sharpe_direction() {
        let high = compute_summary(
            &[dec!(0.010), dec!(0.008), dec!(0.012), dec!(0.009)],
            dec!(0.02),
        );
        let low = compute_summary(
            &[dec!(0.001), dec!(-0.001), dec!(0.002), dec!(0.000)],
            dec!(0.02),
        );
        assert!(high.sharpe_ratio > low.sharpe_ratio);
    }

    #[test]
    fn test_drawdown_series_zero_peak() {
        let dd = drawdown_series(&[Decimal::ZERO, dec!(1), dec!(0.5)]);
        assert_eq!(dd, vec![Decimal::ZERO, Decimal::ZERO, dec!(-0.5)]);
    }

    #[test]
    fn test_returns_from_values() {
        let r = returns_from_values(&[dec!(100), dec!(110), dec!(99)]);
        assert_eq!(r[0], dec!(0.1));
        assert_eq!(r[1], dec!(-0.1));
    }

    #[test]
    fn test_benchmark_identical_series() {
        let r = sample_returns();
        let rel = benchmark_relative(&r, &r, dec!(0.02)).unwrap();
        assert!(close(rel.beta, Decimal::ONE, dec!(0.0000001)));
        assert!(close(rel.alpha, Decimal::ZERO, dec!(0.0000001)));
        assert_eq!(rel.tracking_error, Decimal::ZERO);
        assert_eq!(rel.information_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_benchmark_leveraged_series() {
        let b = sample_returns();
        let p: Vec<Decimal> = b.iter().map(|r| r * dec!(2)).collect();
        let rel = benchmark_relative(&p, &b, Decimal::ZERO).unwrap();
        assert!(close(rel.beta, dec!(2), dec!(0.0000001)));
        assert!(rel.tracking_error > Decimal::ZERO);
    }

    #[test]
    fn test_benchmark_length_mismatch() {
        assert!(benchmark_relative(&[dec!(0.01), dec!(0.02)], &[dec!(0.01)], Decimal::ZERO).is_err());
    }
}
