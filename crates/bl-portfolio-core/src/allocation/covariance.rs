use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::black_litterman::AllocationSettings;
use super::matrix::Matrix;
use crate::error::PortfolioError;
use crate::market_data::{validate_tickers, PricePanel};
use crate::types::{with_metadata, AnalysisPeriod, ComputationOutput};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceMethod {
    /// Ledoit-Wolf shrinkage towards a scaled identity.
    #[default]
    LedoitWolf,
    /// Unbiased sample covariance.
    Sample,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedReturnsMethod {
    #[default]
    HistoricalMean,
    /// Exponentially weighted mean, recent days weigh more.
    Ema,
}

/// Annualized covariance matrix with the shrinkage intensity that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceEstimate {
    pub matrix: Matrix,
    pub method: CovarianceMethod,
    /// Weight on the identity target, in [0, 1]; zero for the sample estimator.
    pub shrinkage: Decimal,
    pub observations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovarianceReport {
    pub tickers: Vec<String>,
    pub covariance: BTreeMap<String, BTreeMap<String, Decimal>>,
    pub method: CovarianceMethod,
    pub shrinkage: Decimal,
    pub period: AnalysisPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedReturnsReport {
    pub tickers: Vec<String>,
    pub expected_returns: BTreeMap<String, Decimal>,
    pub method: ExpectedReturnsMethod,
    pub period: AnalysisPeriod,
}

/// Span of the exponential weighting, in trading days.
pub const EMA_SPAN: i64 = 500;

// ---------------------------------------------------------------------------
// Estimators
// ---------------------------------------------------------------------------

/// Estimate the annualized covariance of a T x N matrix of daily returns.
pub fn estimate_covariance(
    returns: &[Vec<Decimal>],
    method: CovarianceMethod,
    trading_days: i64,
) -> PortfolioResult<CovarianceEstimate> {
    let n_obs = returns.len();
    if n_obs < 2 {
        return Err(PortfolioError::InsufficientData(format!(
            "Covariance needs at least 2 return observations, got {}; widen the date range",
            n_obs
        )));
    }
    let p = returns[0].len();
    if returns.iter().any(|r| r.len() != p) {
        return Err(PortfolioError::invalid(
            "returns",
            "every return row must cover the same tickers",
        ));
    }

    let centered = center(returns, p);
    let annual = Decimal::from(trading_days);

    let (matrix, shrinkage) = match method {
        CovarianceMethod::Sample => {
            let denom = Decimal::from((n_obs - 1) as i64);
            let cov = cross_products(&centered, p)
                .into_iter()
                .map(|row| row.into_iter().map(|v| v / denom * annual).collect())
                .collect();
            (cov, Decimal::ZERO)
        }
        CovarianceMethod::LedoitWolf => {
            let (shrunk, s) = ledoit_wolf(&centered, p);
            let cov = shrunk
                .into_iter()
                .map(|row| row.into_iter().map(|v| v * annual).collect())
                .collect();
            (cov, s)
        }
    };

    Ok(CovarianceEstimate {
        matrix,
        method,
        shrinkage,
        observations: n_obs,
    })
}

fn center(returns: &[Vec<Decimal>], p: usize) -> Matrix {
    let n = Decimal::from(returns.len() as i64);
    let means: Vec<Decimal> = (0..p)
        .map(|j| returns.iter().map(|r| r[j]).sum::<Decimal>() / n)
        .collect();
    returns
        .iter()
        .map(|r| r.iter().zip(means.iter()).map(|(x, m)| *x - *m).collect())
        .collect()
}

/// X'X for a centered T x p matrix.
fn cross_products(x: &[Vec<Decimal>], p: usize) -> Matrix {
    let mut out = vec![vec![Decimal::ZERO; p]; p];
    for row in x {
        for i in 0..p {
            for j in i..p {
                out[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            out[i][j] = out[j][i];
        }
    }
    out
}

/// Shrink the biased empirical covariance towards `mu * I`.
///
/// Returns the daily shrunk matrix and the shrinkage intensity.
fn ledoit_wolf(x: &[Vec<Decimal>], p: usize) -> (Matrix, Decimal) {
    let n = Decimal::from(x.len() as i64);
    let p_dec = Decimal::from(p as i64);

    let emp_cov: Matrix = cross_products(x, p)
        .into_iter()
        .map(|row| row.into_iter().map(|v| v / n).collect())
        .collect();
    let trace: Decimal = (0..p).map(|i| emp_cov[i][i]).sum();
    let mu = trace / p_dec;

    // sum over i,j of (X2' X2)_ij collapses to the squared row sums of X2
    let beta_raw: Decimal = x
        .iter()
        .map(|row| {
            let s: Decimal = row.iter().map(|v| *v * *v).sum();
            s * s
        })
        .sum();
    // sum of (X'X)^2 / n^2 is the squared Frobenius norm of emp_cov
    let delta_raw: Decimal = emp_cov.iter().flatten().map(|v| *v * *v).sum();

    let beta = (beta_raw / n - delta_raw) / (p_dec * n);
    let delta = (delta_raw - dec!(2) * mu * trace + p_dec * mu * mu) / p_dec;
    let beta = beta.min(delta);

    let shrinkage = if beta <= Decimal::ZERO || delta.is_zero() {
        Decimal::ZERO
    } else {
        (beta / delta).min(Decimal::ONE)
    };

    let shrunk = emp_cov
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, v)| {
                    let target = if i == j { mu } else { Decimal::ZERO };
                    (Decimal::ONE - shrinkage) * *v + shrinkage * target
                })
                .collect()
        })
        .collect();

    (shrunk, shrinkage)
}

/// Annualized expected return per column of a T x N daily returns matrix.
pub fn estimate_expected_returns(
    returns: &[Vec<Decimal>],
    method: ExpectedReturnsMethod,
    trading_days: i64,
) -> Vec<Decimal> {
    if returns.is_empty() {
        return Vec::new();
    }
    let p = returns[0].len();
    let annual = Decimal::from(trading_days);
    match method {
        ExpectedReturnsMethod::HistoricalMean => {
            let n = Decimal::from(returns.len() as i64);
            (0..p)
                .map(|j| returns.iter().map(|r| r[j]).sum::<Decimal>() / n * annual)
                .collect()
        }
        ExpectedReturnsMethod::Ema => {
            let alpha = dec!(2) / Decimal::from(EMA_SPAN + 1);
            let decay = Decimal::ONE - alpha;
            (0..p)
                .map(|j| {
                    // adjusted weighting: oldest observation gets decay^(T-1)
                    let mut num = Decimal::ZERO;
                    let mut den = Decimal::ZERO;
                    for r in returns {
                        num = num * decay + r[j];
                        den = den * decay + Decimal::ONE;
                    }
                    num / den * annual
                })
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Annualized covariance matrix over a dense price panel.
pub fn covariance_matrix(
    panel: &PricePanel,
    tickers: &[String],
    method: CovarianceMethod,
    settings: &AllocationSettings,
) -> PortfolioResult<ComputationOutput<CovarianceReport>> {
    let start = Instant::now();
    let (returns, period) = prepare_returns(panel, tickers, settings)?;
    let estimate = estimate_covariance(&returns, method, settings.trading_days)?;

    let mut warnings = Vec::new();
    if returns.len() < tickers.len() && method == CovarianceMethod::Sample {
        warnings.push(format!(
            "Sample covariance from {} observations over {} tickers is singular; \
             prefer ledoit_wolf",
            returns.len(),
            tickers.len()
        ));
    }

    let covariance = tickers
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let row = tickers
                .iter()
                .enumerate()
                .map(|(j, b)| (b.clone(), estimate.matrix[i][j]))
                .collect();
            (a.clone(), row)
        })
        .collect();

    let report = CovarianceReport {
        tickers: tickers.to_vec(),
        covariance,
        method,
        shrinkage: estimate.shrinkage,
        period,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Annualized Covariance Estimation",
        &serde_json::json!({
            "method": method,
            "trading_days": settings.trading_days,
            "observations": estimate.observations,
        }),
        warnings,
        elapsed,
        report,
    ))
}

/// Annualized expected returns over a dense price panel.
pub fn expected_returns(
    panel: &PricePanel,
    tickers: &[String],
    method: ExpectedReturnsMethod,
    settings: &AllocationSettings,
) -> PortfolioResult<ComputationOutput<ExpectedReturnsReport>> {
    let start = Instant::now();
    let (returns, period) = prepare_returns(panel, tickers, settings)?;
    let mu = estimate_expected_returns(&returns, method, settings.trading_days);

    let report = ExpectedReturnsReport {
        tickers: tickers.to_vec(),
        expected_returns: tickers.iter().cloned().zip(mu).collect(),
        method,
        period,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Annualized Expected Returns",
        &serde_json::json!({
            "method": method,
            "trading_days": settings.trading_days,
            "ema_span": EMA_SPAN,
        }),
        Vec::new(),
        elapsed,
        report,
    ))
}

/// Validate the universe and extract daily returns with the covered period.
pub(crate) fn prepare_returns(
    panel: &PricePanel,
    tickers: &[String],
    settings: &AllocationSettings,
) -> PortfolioResult<(Vec<Vec<Decimal>>, AnalysisPeriod)> {
    validate_tickers(tickers, 1, settings.max_tickers)?;
    let returns = panel.simple_returns(tickers)?;
    if returns.len() < settings.min_observations {
        return Err(PortfolioError::InsufficientData(format!(
            "{} daily return observations available, at least {} required; \
             widen the date range",
            returns.len(),
            settings.min_observations
        )));
    }
    let period = panel.period().ok_or_else(|| {
        PortfolioError::InsufficientData("Price panel is empty".into())
    })?;
    Ok((returns, period))
}
