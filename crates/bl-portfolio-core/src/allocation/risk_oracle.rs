use rust_decimal::prelude::{MathematicalOps, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PortfolioError;
use crate::market_data::PricePanel;
use crate::metrics::returns::{mean, sample_variance, sqrt_decimal};
use crate::types::{AnalysisPeriod, TRADING_DAYS_PER_YEAR};
use crate::views::ViewSpec;
use crate::PortfolioResult;

/// One-sided 95% normal quantile.
const Z_95: Decimal = dec!(1.645);

/// Annualized tail statistics for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarEstimate {
    /// 95% value at risk, annualized; negative means a loss.
    pub var_95_annual: Decimal,
    /// 95th percentile of daily returns, annualized.
    pub percentile_95_annual: Decimal,
    pub volatility_annual: Decimal,
}

/// Source of per-ticker tail statistics used to flag optimistic views.
///
/// Implementations may fit any volatility model; the allocator only reads
/// the three annualized figures and never fails because of the oracle.
pub trait RiskOracle {
    fn estimate_var(&self, ticker: &str, period: &AnalysisPeriod) -> PortfolioResult<VarEstimate>;
}

// ---------------------------------------------------------------------------
// Optimism check
// ---------------------------------------------------------------------------

/// Advisory warnings for views whose stated return is implausibly high.
///
/// An absolute view is flagged when its return exceeds `threshold` and the
/// ticker's annualized 95th percentile. A relative view is flagged when it
/// exceeds `threshold` and twice the percentile of its long leg. Oracle
/// failures are logged and the view is skipped.
pub fn check_view_optimism(
    views: &ViewSpec,
    tickers: &[String],
    period: &AnalysisPeriod,
    oracle: &dyn RiskOracle,
    threshold: Decimal,
) -> Vec<String> {
    let mut warnings = Vec::new();

    for k in 0..views.len() {
        let q = views.q[k];
        if q <= threshold {
            continue;
        }
        let relative = views.is_relative(k);
        let Some(j) = views.long_leg(k) else {
            continue;
        };
        let ticker = &tickers[j];

        let estimate = match oracle.estimate_var(ticker, period) {
            Ok(e) => e,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "VaR lookup failed, skipping optimism check");
                continue;
            }
        };

        let limit = if relative {
            estimate.percentile_95_annual * dec!(2)
        } else {
            estimate.percentile_95_annual
        };
        if q <= limit {
            continue;
        }

        let message = if relative {
            format!(
                "Optimistic relative view on {}: expected outperformance {:.1}% exceeds twice \
                 the 95th percentile annual return ({:.1}%). VaR 95%: {:.1}%, volatility: {:.1}%. \
                 Consider a more realistic spread.",
                ticker,
                q * dec!(100),
                estimate.percentile_95_annual * dec!(100),
                estimate.var_95_annual * dec!(100),
                estimate.volatility_annual * dec!(100),
            )
        } else {
            format!(
                "Optimistic view on {}: expected return {:.1}% exceeds the 95th percentile \
                 annual return ({:.1}%). VaR 95%: {:.1}%, volatility: {:.1}%. \
                 Consider a more realistic return.",
                ticker,
                q * dec!(100),
                estimate.percentile_95_annual * dec!(100),
                estimate.var_95_annual * dec!(100),
                estimate.volatility_annual * dec!(100),
            )
        };
        warn!(ticker = %ticker, view_return = %q, "optimistic view flagged");
        warnings.push(message);
    }

    warnings
}

// ---------------------------------------------------------------------------
// Historical oracle
// ---------------------------------------------------------------------------

/// Oracle backed by realized daily returns in a price panel.
///
/// Volatility is the sample standard deviation scaled by sqrt(252); VaR is
/// the normal 5% quantile of that volatility; the percentile compounds the
/// daily 95th percentile over a year.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalVarOracle<'a> {
    panel: &'a PricePanel,
}

impl<'a> HistoricalVarOracle<'a> {
    pub fn new(panel: &'a PricePanel) -> Self {
        HistoricalVarOracle { panel }
    }
}

impl RiskOracle for HistoricalVarOracle<'_> {
    fn estimate_var(&self, ticker: &str, period: &AnalysisPeriod) -> PortfolioResult<VarEstimate> {
        let closes: Vec<Decimal> = self
            .panel
            .rows
            .iter()
            .filter(|r| r.date >= period.start && r.date <= period.end)
            .filter_map(|r| r.closes.get(ticker).copied())
            .collect();
        let returns: Vec<Decimal> = closes
            .windows(2)
            .filter(|w| !w[0].is_zero())
            .map(|w| w[1] / w[0] - Decimal::ONE)
            .collect();
        if returns.len() < 2 {
            return Err(PortfolioError::InsufficientData(format!(
                "{} has {} daily returns in {}..{}; VaR needs at least 2",
                ticker,
                returns.len(),
                period.start,
                period.end
            )));
        }

        let root = sqrt_decimal(Decimal::from(TRADING_DAYS_PER_YEAR));
        let vol_daily = sqrt_decimal(sample_variance(&returns, mean(&returns)));
        let p95_daily = percentile(&returns, dec!(0.95));
        let percentile_95_annual = (Decimal::ONE + p95_daily)
            .checked_powi(TRADING_DAYS_PER_YEAR)
            .map(|g| g - Decimal::ONE)
            .ok_or_else(|| PortfolioError::Numerical {
                context: format!("annualizing the 95th percentile for {}", ticker),
                suggestion: "daily returns are too extreme to compound; check the price data"
                    .into(),
            })?;

        Ok(VarEstimate {
            var_95_annual: -Z_95 * vol_daily * root,
            percentile_95_annual,
            volatility_annual: vol_daily * root,
        })
    }
}

/// Linear-interpolated percentile, `q` in [0, 1].
fn percentile(data: &[Decimal], q: Decimal) -> Decimal {
    let mut sorted = data.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    let pos = q * Decimal::from((n - 1) as i64);
    let lower = pos.floor();
    let frac = pos - lower;
    let i = lower.to_usize().unwrap_or(0).min(n - 1);
    let next = (i + 1).min(n - 1);
    sorted[i] + (sorted[next] - sorted[i]) * frac
}
