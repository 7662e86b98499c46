use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PortfolioError;
use crate::types::Rate;
use crate::PortfolioResult;

/// Calendar cadence of scheduled rebalances after the initial allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceFrequency {
    None,
    /// Every Monday.
    Weekly,
    /// First day of every month.
    #[default]
    Monthly,
    /// January, April, July and October 1st.
    Quarterly,
    #[serde(alias = "semi_annual", alias = "semiannual")]
    SemiAnnual,
    #[serde(alias = "yearly")]
    Annual,
}

impl FromStr for RebalanceFrequency {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RebalanceFrequency::None),
            "weekly" => Ok(RebalanceFrequency::Weekly),
            "monthly" => Ok(RebalanceFrequency::Monthly),
            "quarterly" => Ok(RebalanceFrequency::Quarterly),
            "semi-annual" | "semi_annual" | "semiannual" => Ok(RebalanceFrequency::SemiAnnual),
            "annual" | "yearly" => Ok(RebalanceFrequency::Annual),
            other => Err(PortfolioError::config(
                "rebalance_frequency",
                format!(
                    "Unknown rebalance frequency '{}'; expected one of none, weekly, \
                     monthly, quarterly, semi-annual, annual",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for RebalanceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebalanceFrequency::None => "none",
            RebalanceFrequency::Weekly => "weekly",
            RebalanceFrequency::Monthly => "monthly",
            RebalanceFrequency::Quarterly => "quarterly",
            RebalanceFrequency::SemiAnnual => "semi-annual",
            RebalanceFrequency::Annual => "annual",
        };
        f.write_str(s)
    }
}

/// Immutable trading rules for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Preset the config was derived from, suffixed with "(custom)" once patched.
    pub name: String,
    pub rebalance_frequency: RebalanceFrequency,
    /// Proportional commission on traded notional.
    pub fees: Rate,
    /// Proportional slippage on traded notional.
    pub slippage: Rate,
    /// Exit a position once it falls this far below its entry (or its
    /// running high when `trailing_stop` is set).
    pub stop_loss: Option<Rate>,
    /// Exit a position once it gains this much over its entry.
    pub take_profit: Option<Rate>,
    pub trailing_stop: bool,
    /// Liquidate everything once the portfolio falls this far below its peak.
    pub max_drawdown_limit: Option<Rate>,
}

/// Partial patch applied on top of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOverrides {
    pub rebalance_frequency: Option<RebalanceFrequency>,
    pub fees: Option<Rate>,
    pub slippage: Option<Rate>,
    pub stop_loss: Option<Rate>,
    pub take_profit: Option<Rate>,
    pub trailing_stop: Option<bool>,
    pub max_drawdown_limit: Option<Rate>,
}

pub const PRESET_NAMES: [&str; 3] = ["buy_and_hold", "passive_rebalance", "risk_managed"];

const DEFAULT_FEES: Decimal = dec!(0.001);
const DEFAULT_SLIPPAGE: Decimal = dec!(0.0005);

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::passive_rebalance()
    }
}

impl StrategyConfig {
    /// Allocate once, never trade again.
    pub fn buy_and_hold() -> Self {
        StrategyConfig {
            name: "buy_and_hold".into(),
            rebalance_frequency: RebalanceFrequency::None,
            fees: DEFAULT_FEES,
            slippage: DEFAULT_SLIPPAGE,
            stop_loss: None,
            take_profit: None,
            trailing_stop: false,
            max_drawdown_limit: None,
        }
    }

    /// Monthly rebalance to target, no risk controls.
    pub fn passive_rebalance() -> Self {
        StrategyConfig {
            name: "passive_rebalance".into(),
            rebalance_frequency: RebalanceFrequency::Monthly,
            ..StrategyConfig::buy_and_hold()
        }
    }

    /// Monthly rebalance with a 10% trailing stop and a 20% drawdown kill switch.
    pub fn risk_managed() -> Self {
        StrategyConfig {
            name: "risk_managed".into(),
            rebalance_frequency: RebalanceFrequency::Monthly,
            stop_loss: Some(dec!(0.10)),
            trailing_stop: true,
            max_drawdown_limit: Some(dec!(0.20)),
            ..StrategyConfig::buy_and_hold()
        }
    }

    pub fn preset(name: &str) -> PortfolioResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "buy_and_hold" => Ok(StrategyConfig::buy_and_hold()),
            "passive_rebalance" => Ok(StrategyConfig::passive_rebalance()),
            "risk_managed" => Ok(StrategyConfig::risk_managed()),
            other => Err(PortfolioError::config(
                "strategy",
                format!(
                    "Unknown strategy '{}'; expected one of {:?}",
                    other, PRESET_NAMES
                ),
            )),
        }
    }

    /// Apply every field the patch sets; the result is validated.
    pub fn with_overrides(mut self, overrides: &StrategyOverrides) -> PortfolioResult<Self> {
        if let Some(v) = overrides.rebalance_frequency {
            self.rebalance_frequency = v;
        }
        if let Some(v) = overrides.fees {
            self.fees = v;
        }
        if let Some(v) = overrides.slippage {
            self.slippage = v;
        }
        if let Some(v) = overrides.stop_loss {
            self.stop_loss = Some(v);
        }
        if let Some(v) = overrides.take_profit {
            self.take_profit = Some(v);
        }
        if let Some(v) = overrides.trailing_stop {
            self.trailing_stop = v;
        }
        if let Some(v) = overrides.max_drawdown_limit {
            self.max_drawdown_limit = Some(v);
        }
        if *overrides != StrategyOverrides::default() {
            self.name = format!("{} (custom)", self.name);
        }
        self.validate()?;
        Ok(self)
    }

    /// Combined proportional cost of trading one unit of notional.
    pub fn cost_rate(&self) -> Rate {
        self.fees + self.slippage
    }

    pub fn validate(&self) -> PortfolioResult<()> {
        let cost_band = |v: Decimal| v >= Decimal::ZERO && v <= dec!(0.1);
        let open_unit = |v: Decimal| v > Decimal::ZERO && v < Decimal::ONE;
        check_range("fees", self.fees, cost_band(self.fees), "[0, 0.1]")?;
        check_range("slippage", self.slippage, cost_band(self.slippage), "[0, 0.1]")?;
        if let Some(v) = self.stop_loss {
            check_range("stop_loss", v, open_unit(v), "(0, 1)")?;
        }
        if let Some(v) = self.take_profit {
            if v <= Decimal::ZERO {
                return Err(PortfolioError::config(
                    "take_profit",
                    format!("take_profit must be positive, got {}; e.g. 0.25 for +25%", v),
                ));
            }
        }
        if let Some(v) = self.max_drawdown_limit {
            check_range("max_drawdown_limit", v, open_unit(v), "(0, 1)")?;
        }
        if self.trailing_stop && self.stop_loss.is_none() {
            return Err(PortfolioError::config(
                "trailing_stop",
                "trailing_stop needs a stop_loss distance, e.g. \"stop_loss\": 0.10",
            ));
        }
        Ok(())
    }
}

fn check_range(field: &str, v: Decimal, in_range: bool, range: &str) -> PortfolioResult<()> {
    if in_range {
        return Ok(());
    }
    Err(PortfolioError::config(
        field,
        format!(
            "{} must be a decimal fraction in {}, got {}; e.g. 0.10 for 10%",
            field, range, v
        ),
    ))
}
