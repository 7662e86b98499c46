use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::matrix::{quadratic_form, vec_dot};
use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Used when the market portfolio shows no variance to divide by.
pub const FALLBACK_RISK_AVERSION: Decimal = dec!(2.5);

/// Investor temperament, scaling the market-implied risk aversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStyle {
    Aggressive,
    #[default]
    Balanced,
    Conservative,
}

impl InvestmentStyle {
    pub fn multiplier(self) -> Decimal {
        match self {
            InvestmentStyle::Aggressive => dec!(0.5),
            InvestmentStyle::Balanced => Decimal::ONE,
            InvestmentStyle::Conservative => dec!(2),
        }
    }
}

impl FromStr for InvestmentStyle {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(InvestmentStyle::Aggressive),
            "balanced" => Ok(InvestmentStyle::Balanced),
            "conservative" => Ok(InvestmentStyle::Conservative),
            other => Err(PortfolioError::config(
                "investment_style",
                format!(
                    "Unknown investment style '{}'; expected one of \
                     \"aggressive\", \"balanced\", \"conservative\"",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for InvestmentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestmentStyle::Aggressive => "aggressive",
            InvestmentStyle::Balanced => "balanced",
            InvestmentStyle::Conservative => "conservative",
        };
        f.write_str(s)
    }
}

/// Where the risk-aversion coefficient used by an allocation came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskAversionSource {
    /// Caller supplied delta directly; no style scaling applied.
    Supplied,
    /// Derived from the market-cap portfolio, then scaled by style and clipped.
    Estimated { base: Decimal, multiplier: Decimal },
    /// Market variance was not positive; the conventional 2.5 was used.
    Fallback,
}

/// Market price of risk implied by the cap-weighted portfolio:
/// `(E[r_mkt] - rf) / (w' Sigma w)`, clipped to `[floor, cap]`.
///
/// `annual_returns` are the per-asset annualized mean returns and `sigma` the
/// annualized covariance. Returns `None` when the market variance is not
/// positive.
pub fn market_implied_risk_aversion(
    market_weights: &[Decimal],
    annual_returns: &[Decimal],
    sigma: &[Vec<Decimal>],
    risk_free_rate: Decimal,
    floor: Decimal,
    cap: Decimal,
) -> Option<Decimal> {
    let variance = quadratic_form(market_weights, sigma);
    if variance <= Decimal::ZERO {
        return None;
    }
    let market_return = vec_dot(market_weights, annual_returns);
    let delta = (market_return - risk_free_rate) / variance;
    Some(clip(delta, floor, cap))
}

/// Resolve delta from an optional caller value, falling back to the market
/// estimate scaled by style. The scaled value is clipped again so the style
/// multiplier cannot push it outside the band.
#[allow(clippy::too_many_arguments)]
pub fn resolve_risk_aversion(
    supplied: Option<Decimal>,
    style: InvestmentStyle,
    market_weights: &[Decimal],
    annual_returns: &[Decimal],
    sigma: &[Vec<Decimal>],
    risk_free_rate: Decimal,
    floor: Decimal,
    cap: Decimal,
) -> PortfolioResult<(Decimal, RiskAversionSource)> {
    if let Some(delta) = supplied {
        if delta <= Decimal::ZERO {
            return Err(PortfolioError::invalid(
                "risk_aversion",
                format!("Risk aversion must be positive, got {}; typical values are 1 to 5, e.g. 2.5", delta),
            ));
        }
        return Ok((delta, RiskAversionSource::Supplied));
    }

    match market_implied_risk_aversion(
        market_weights,
        annual_returns,
        sigma,
        risk_free_rate,
        floor,
        cap,
    ) {
        Some(base) => {
            let multiplier = style.multiplier();
            let delta = clip(base * multiplier, floor, cap);
            Ok((delta, RiskAversionSource::Estimated { base, multiplier }))
        }
        None => Ok((FALLBACK_RISK_AVERSION, RiskAversionSource::Fallback)),
    }
}

fn clip(v: Decimal, floor: Decimal, cap: Decimal) -> Decimal {
    v.max(floor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigma() -> Vec<Vec<Decimal>> {
        vec![vec![dec!(0.04), dec!(0)], vec![dec!(0), dec!(0.04)]]
    }

    #[test]
    fn test_market_implied_value() {
        // var = 0.5^2*0.04*2 = 0.02, excess = 0.10 - 0.02 = 0.08 -> 4
        let w = vec![dec!(0.5), dec!(0.5)];
        let mu = vec![dec!(0.10), dec!(0.10)];
        let d = market_implied_risk_aversion(&w, &mu, &sigma(), dec!(0.02), dec!(0.5), dec!(15));
        assert_eq!(d, Some(dec!(4)));
    }

    #[test]
    fn test_clipped_to_band() {
        let w = vec![dec!(0.5), dec!(0.5)];
        let losing = vec![dec!(-0.3), dec!(-0.3)];
        let d = market_implied_risk_aversion(&w, &losing, &sigma(), dec!(0.02), dec!(0.5), dec!(15));
        assert_eq!(d, Some(dec!(0.5)));
        let booming = vec![dec!(5), dec!(5)];
        let d = market_implied_risk_aversion(&w, &booming, &sigma(), dec!(0.02), dec!(0.5), dec!(15));
        assert_eq!(d, Some(dec!(15)));
    }

    #[test]
    fn test_style_scaling() {
        let w = vec![dec!(0.5), dec!(0.5)];
        let mu = vec![dec!(0.10), dec!(0.10)];
        let (d, src) = resolve_risk_aversion(
            None,
            InvestmentStyle::Conservative,
            &w,
            &mu,
            &sigma(),
            dec!(0.02),
            dec!(0.5),
            dec!(15),
        )
        .unwrap();
        assert_eq!(d, dec!(8));
        assert_eq!(
            src,
            RiskAversionSource::Estimated { base: dec!(4), multiplier: dec!(2) }
        );
    }

    #[test]
    fn test_zero_variance_falls_back() {
        let zero = vec![vec![dec!(0), dec!(0)], vec![dec!(0), dec!(0)]];
        let w = vec![dec!(0.5), dec!(0.5)];
        let (d, src) = resolve_risk_aversion(
            None,
            InvestmentStyle::Balanced,
            &w,
            &w,
            &zero,
            dec!(0.02),
            dec!(0.5),
            dec!(15),
        )
        .unwrap();
        assert_eq!(d, FALLBACK_RISK_AVERSION);
        assert_eq!(src, RiskAversionSource::Fallback);
    }

    #[test]
    fn test_supplied_must_be_positive() {
        let w = vec![dec!(1)];
        let s = vec![vec![dec!(0.04)]];
        assert!(resolve_risk_aversion(
            Some(dec!(0)),
            InvestmentStyle::Balanced,
            &w,
            &w,
            &s,
            dec!(0.02),
            dec!(0.5),
            dec!(15)
        )
        .is_err());
        let (d, src) = resolve_risk_aversion(
            Some(dec!(3)),
            InvestmentStyle::Aggressive,
            &w,
            &w,
            &s,
            dec!(0.02),
            dec!(0.5),
            dec!(15),
        )
        .unwrap();
        assert_eq!(d, dec!(3));
        assert_eq!(src, RiskAversionSource::Supplied);
    }

    #[test]
    fn test_style_parsing() {
        assert_eq!("Aggressive".parse::<InvestmentStyle>().unwrap(), InvestmentStyle::Aggressive);
        let err = "reckless".parse::<InvestmentStyle>().unwrap_err();
        assert!(matches!(err, PortfolioError::Configuration { .. }));
    }
}
