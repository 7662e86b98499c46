use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::{RebalanceFrequency, StrategyConfig};
use super::report::{
    compare_benchmark, drawdown_episode, holding_periods, resample, value_points,
    BenchmarkComparison, DrawdownEpisode, HoldingPeriod, SeriesFrequency, ValuePoint,
};
use super::schedule::rebalance_schedule;
use crate::error::PortfolioError;
use crate::market_data::{validate_tickers, BenchmarkSeries, PricePanel, PriceRow};
use crate::metrics::{compute_summary, returns_from_values, MetricsSummary, CAGR_CEILING};
use crate::types::{with_metadata, AnalysisPeriod, ComputationOutput, Money, Rate};
use crate::PortfolioResult;

pub const LIQUIDATION_REASON: &str = "max_drawdown_exceeded";

const MAX_TICKERS: usize = 100;
const WEIGHT_SUM_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

fn default_initial_capital() -> Money {
    dec!(10000)
}

fn default_risk_free_rate() -> Rate {
    dec!(0.02)
}

/// Replay `prices` against fixed target `weights` under `strategy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub tickers: Vec<String>,
    pub prices: PricePanel,
    pub weights: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkSeries>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Money,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub series_frequency: SeriesFrequency,
}

impl BacktestRequest {
    pub fn new(
        tickers: Vec<String>,
        prices: PricePanel,
        weights: BTreeMap<String, Decimal>,
    ) -> Self {
        BacktestRequest {
            tickers,
            prices,
            weights,
            strategy: StrategyConfig::default(),
            benchmark: None,
            initial_capital: default_initial_capital(),
            risk_free_rate: default_risk_free_rate(),
            series_frequency: SeriesFrequency::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TakeProfit => "take_profit",
        };
        f.write_str(s)
    }
}

/// A position closed by a risk rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub date: NaiveDate,
    pub ticker: String,
    pub reason: ExitReason,
    pub price: Decimal,
    pub shares: Decimal,
    /// Gross notional sold.
    pub proceeds: Money,
    pub cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    /// Half the sum of absolute weight changes, cash included.
    pub turnover: Decimal,
    pub cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub date: NaiveDate,
    pub reason: String,
    /// Decline from the peak that triggered the liquidation, as a positive fraction.
    pub drawdown: Rate,
    /// Value the portfolio is frozen at.
    pub value: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub tickers: Vec<String>,
    /// Normalized target weights actually traded.
    pub weights: BTreeMap<String, Decimal>,
    pub initial_capital: Money,
    pub final_value: Money,
    pub metrics: MetricsSummary,
    pub total_fees_paid: Money,
    pub total_turnover: Decimal,
    pub num_rebalances: usize,
    pub rebalances: Vec<RebalanceEvent>,
    pub exits: Vec<ExitEvent>,
    pub drawdown_episode: Option<DrawdownEpisode>,
    pub holding_periods: BTreeMap<String, HoldingPeriod>,
    pub benchmark: Option<BenchmarkComparison>,
    pub is_liquidated: bool,
    pub liquidation: Option<Liquidation>,
    pub series_frequency: SeriesFrequency,
    pub value_series: Vec<ValuePoint>,
    pub period: AnalysisPeriod,
    pub config: StrategyConfig,
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Position {
    shares: Decimal,
    entry_price: Decimal,
    high_water: Decimal,
}

/// Mutable book of one run. Never escapes `run_backtest`.
#[derive(Debug, Default)]
struct BacktestState {
    positions: BTreeMap<String, Position>,
    cash: Money,
    peak_value: Money,
    liquidation: Option<Liquidation>,
    fees_paid: Money,
    turnover: Decimal,
    first_acquired: BTreeMap<String, NaiveDate>,
    last_held: BTreeMap<String, NaiveDate>,
    rebalances: Vec<RebalanceEvent>,
    exits: Vec<ExitEvent>,
}

impl BacktestState {
    fn new(cash: Money) -> Self {
        BacktestState {
            cash,
            ..Default::default()
        }
    }

    /// Cash plus every position that has a close on this row.
    fn mark(&self, row: &PriceRow) -> Money {
        self.positions
            .iter()
            .filter_map(|(ticker, pos)| row.closes.get(ticker).map(|c| pos.shares * c))
            .sum::<Decimal>()
            + self.cash
    }

    /// True when a held position has no close on this row, so `mark` is partial.
    fn has_unpriced(&self, row: &PriceRow) -> bool {
        self.positions
            .iter()
            .any(|(ticker, pos)| pos.shares > Decimal::ZERO && !row.closes.contains_key(ticker))
    }

    /// Trade every priced ticker to its target weight. Costs come out of the
    /// portfolio first and the remainder is split by weight; the share of a
    /// ticker without a close today stays in cash.
    fn rebalance(&mut self, row: &PriceRow, targets: &BTreeMap<String, Decimal>, cost_rate: Rate) {
        let value = self.mark(row);
        if value <= Decimal::ZERO {
            return;
        }

        let mut tradable: Vec<(String, Decimal, Decimal, Decimal)> = Vec::new();
        let tickers = targets
            .keys()
            .chain(self.positions.keys())
            .cloned()
            .collect::<BTreeSet<String>>();
        for ticker in tickers {
            let Some(close) = row.closes.get(&ticker).copied() else {
                continue;
            };
            let target = targets.get(&ticker).copied().unwrap_or(Decimal::ZERO);
            let current = self
                .positions
                .get(&ticker)
                .map(|p| p.shares * close)
                .unwrap_or(Decimal::ZERO);
            tradable.push((ticker, close, target, current));
        }

        let invested_target: Decimal = tradable.iter().map(|t| t.2).sum();
        let mut weight_change = (Decimal::ONE - invested_target - self.cash / value).abs();
        let mut traded = Decimal::ZERO;
        for (_, _, target, current) in &tradable {
            weight_change += (*target - *current / value).abs();
            traded += (*target * value - *current).abs();
        }
        let turnover = weight_change / dec!(2);
        let cost = traded * cost_rate;
        let investable = value - cost;

        let mut invested = Decimal::ZERO;
        for (ticker, close, target, _) in tradable {
            let shares = target * investable / close;
            invested += shares * close;
            if shares <= Decimal::ZERO {
                self.positions.remove(&ticker);
                continue;
            }
            let pos = self.positions.entry(ticker.clone()).or_insert(Position {
                shares: Decimal::ZERO,
                entry_price: close,
                high_water: close,
            });
            if pos.shares.is_zero() {
                pos.entry_price = close;
                pos.high_water = close;
            }
            pos.shares = shares;
            self.first_acquired.entry(ticker).or_insert(row.date);
        }
        // Unpriced holdings are left untouched and stay outside `value`.
        self.cash = investable - invested;

        self.fees_paid += cost;
        self.turnover += turnover;
        debug!(date = %row.date, %turnover, %cost, "rebalanced");
        self.rebalances.push(RebalanceEvent {
            date: row.date,
            turnover,
            cost,
        });
    }

    /// Apply stop-loss, trailing-stop and take-profit rules to every priced
    /// position. Proceeds net of cost are parked in cash.
    fn apply_exits(&mut self, row: &PriceRow, strategy: &StrategyConfig) {
        let cost_rate = strategy.cost_rate();
        let mut closed: Vec<(String, ExitReason, Decimal)> = Vec::new();

        for (ticker, pos) in self.positions.iter_mut() {
            let Some(close) = row.closes.get(ticker).copied() else {
                continue;
            };
            if close > pos.high_water {
                pos.high_water = close;
            }

            let mut reason = None;
            if let Some(stop) = strategy.stop_loss {
                if strategy.trailing_stop {
                    if (pos.high_water - close) / pos.high_water > stop {
                        reason = Some(ExitReason::TrailingStop);
                    }
                } else if (pos.entry_price - close) / pos.entry_price > stop {
                    reason = Some(ExitReason::StopLoss);
                }
            }
            if reason.is_none() {
                if let Some(target) = strategy.take_profit {
                    if (close - pos.entry_price) / pos.entry_price > target {
                        reason = Some(ExitReason::TakeProfit);
                    }
                }
            }
            if let Some(reason) = reason {
                closed.push((ticker.clone(), reason, close));
            }
        }

        for (ticker, reason, price) in closed {
            let Some(pos) = self.positions.remove(&ticker) else {
                continue;
            };
            let proceeds = pos.shares * price;
            let cost = proceeds * cost_rate;
            self.cash += proceeds - cost;
            self.fees_paid += cost;
            self.last_held.insert(ticker.clone(), row.date);
            info!(date = %row.date, ticker = %ticker, %reason, %price, "position exited");
            self.exits.push(ExitEvent {
                date: row.date,
                ticker,
                reason,
                price,
                shares: pos.shares,
                proceeds,
                cost,
            });
        }
    }

    /// Sell everything at the mark without cost and freeze. Refuses a row
    /// on which any holding is unpriced; returns whether it liquidated.
    fn liquidate(&mut self, row: &PriceRow, drawdown: Rate) -> bool {
        if self.has_unpriced(row) {
            return false;
        }
        let value = self.mark(row);
        self.touch_holdings(row.date);
        self.positions.clear();
        self.cash = value;
        self.liquidation = Some(Liquidation {
            date: row.date,
            reason: LIQUIDATION_REASON.to_string(),
            drawdown,
            value,
        });
        true
    }

    fn touch_holdings(&mut self, date: NaiveDate) {
        for (ticker, pos) in &self.positions {
            if pos.shares > Decimal::ZERO {
                self.last_held.insert(ticker.clone(), date);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check target weights against the universe and scale them to sum to one.
///
/// Returns the normalized weights and a warning when the input sum was off.
pub fn normalize_target_weights(
    weights: &BTreeMap<String, Decimal>,
    tickers: &[String],
) -> PortfolioResult<(BTreeMap<String, Decimal>, Option<String>)> {
    if weights.is_empty() {
        return Err(PortfolioError::invalid(
            "weights",
            "weights cannot be empty; e.g. {\"AAPL\": 0.6, \"MSFT\": 0.4}",
        ));
    }
    for (ticker, w) in weights {
        if !tickers.contains(ticker) {
            return Err(PortfolioError::invalid(
                format!("weights.{}", ticker),
                format!(
                    "Ticker '{}' in weights is not in tickers list {:?}",
                    ticker, tickers
                ),
            ));
        }
        if *w < Decimal::ZERO {
            return Err(PortfolioError::invalid(
                format!("weights.{}", ticker),
                format!(
                    "Weight for {} cannot be negative (got {}); the simulator is long-only",
                    ticker, w
                ),
            ));
        }
    }
    let sum: Decimal = weights.values().sum();
    if sum <= Decimal::ZERO {
        return Err(PortfolioError::invalid(
            "weights",
            "Weights must sum to a positive value; e.g. {\"AAPL\": 1.0}",
        ));
    }
    let warning = ((sum - Decimal::ONE).abs() > WEIGHT_SUM_TOLERANCE).then(|| {
        format!(
            "Weights summed to {}; normalized to 1.0",
            sum.round_dp(6).normalize()
        )
    });
    let normalized = weights
        .iter()
        .map(|(t, w)| (t.clone(), *w / sum))
        .collect();
    Ok((normalized, warning))
}

fn validate_request(request: &BacktestRequest) -> PortfolioResult<()> {
    validate_tickers(&request.tickers, 1, MAX_TICKERS)?;
    request.strategy.validate()?;
    if request.initial_capital <= Decimal::ZERO {
        return Err(PortfolioError::invalid(
            "initial_capital",
            format!(
                "initial_capital must be positive, got {}; e.g. 10000",
                request.initial_capital
            ),
        ));
    }
    if request.prices.len() < 2 {
        return Err(PortfolioError::InsufficientData(format!(
            "Backtest needs at least 2 trading days of prices, got {}",
            request.prices.len()
        )));
    }
    request.prices.validate_ordering()?;
    for row in &request.prices.rows {
        for ticker in &request.tickers {
            if let Some(close) = row.closes.get(ticker) {
                if *close <= Decimal::ZERO {
                    return Err(PortfolioError::invalid(
                        format!("prices.{}", ticker),
                        format!(
                            "Close for {} on {} is {}; adjusted closes must be positive",
                            ticker, row.date, close
                        ),
                    ));
                }
            }
        }
    }
    if let Some(benchmark) = &request.benchmark {
        benchmark.validate()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Day-stepped replay of a target allocation.
///
/// Day 0 invests `initial_capital` from cash and counts as the first
/// rebalance. Every later day marks to market, checks the drawdown kill
/// switch, applies exit rules, rebalances on scheduled dates and records the
/// closing value. Metrics are computed on daily values regardless of
/// `series_frequency`, which only shapes `value_series`.
pub fn run_backtest(request: &BacktestRequest) -> PortfolioResult<ComputationOutput<BacktestResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_request(request)?;
    let (targets, weight_warning) = normalize_target_weights(&request.weights, &request.tickers)?;
    warnings.extend(weight_warning);

    let strategy = &request.strategy;
    let rows = &request.prices.rows;
    let dates = request.prices.dates();

    for (ticker, w) in &targets {
        if w.is_zero() {
            continue;
        }
        if !rows[0].closes.contains_key(ticker) {
            return Err(PortfolioError::invalid(
                format!("prices.{}", ticker),
                format!(
                    "No close for {} on the first day {}; start the backtest on a date \
                     every weighted ticker trades",
                    ticker, rows[0].date
                ),
            ));
        }
        let missing = rows.iter().filter(|r| !r.closes.contains_key(ticker)).count();
        if missing > 0 {
            warnings.push(format!(
                "{} has no close on {} trading day(s); it is excluded from valuation \
                 on those days",
                ticker, missing
            ));
        }
    }

    let schedule = rebalance_schedule(&dates, strategy.rebalance_frequency);
    let cost_rate = strategy.cost_rate();
    info!(
        tickers = request.tickers.len(),
        days = rows.len(),
        strategy = %strategy.name,
        frequency = %strategy.rebalance_frequency,
        scheduled = schedule.len(),
        "backtest requested"
    );

    let mut state = BacktestState::new(request.initial_capital);
    let mut values: Vec<Money> = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        if let Some(liq) = &state.liquidation {
            values.push(liq.value);
            continue;
        }

        if i == 0 {
            state.rebalance(row, &targets, cost_rate);
            state.touch_holdings(row.date);
            let value = state.mark(row);
            state.peak_value = value;
            values.push(value);
            continue;
        }

        // A partial mark says nothing about drawdown; peak and kill switch wait.
        let value = state.mark(row);
        let fully_priced = !state.has_unpriced(row);
        if !fully_priced {
            debug!(date = %row.date, "holding without a close, drawdown check skipped");
        }
        if fully_priced && value > state.peak_value {
            state.peak_value = value;
        }
        if let Some(limit) = strategy.max_drawdown_limit.filter(|_| fully_priced) {
            if state.peak_value > Decimal::ZERO {
                let drawdown = (state.peak_value - value) / state.peak_value;
                if drawdown > limit && state.liquidate(row, drawdown) {
                    warn!(date = %row.date, %drawdown, %limit, "max drawdown exceeded, liquidated");
                    values.push(value);
                    continue;
                }
            }
        }

        if strategy.stop_loss.is_some() || strategy.take_profit.is_some() {
            state.apply_exits(row, strategy);
        }
        if schedule.contains(&i) {
            state.rebalance(row, &targets, cost_rate);
        }
        state.touch_holdings(row.date);
        values.push(state.mark(row));
    }

    // --- Reporting ---
    let points = value_points(&dates, &values);
    let mut with_initial = Vec::with_capacity(values.len() + 1);
    with_initial.push(request.initial_capital);
    with_initial.extend_from_slice(&values);
    let metrics = compute_summary(&returns_from_values(&with_initial), request.risk_free_rate);
    if metrics.cagr >= CAGR_CEILING {
        warnings.push(format!(
            "CAGR of a {}-day run exceeds {} and is reported at that ceiling; \
             Sharpe and Calmar inherit it",
            rows.len(),
            CAGR_CEILING
        ));
    }

    let benchmark = match &request.benchmark {
        Some(series) => {
            let cmp = compare_benchmark(&points, series, request.risk_free_rate)?;
            if cmp.is_none() {
                warnings.push(format!(
                    "Benchmark '{}' shares fewer than 2 dates with the backtest; \
                     relative statistics skipped",
                    series.name
                ));
            }
            cmp
        }
        None => None,
    };

    if let Some(liq) = &state.liquidation {
        warnings.push(format!(
            "Portfolio liquidated on {} after a {:.1}% drawdown (limit {:.1}%)",
            liq.date,
            liq.drawdown * dec!(100),
            strategy.max_drawdown_limit.unwrap_or_default() * dec!(100)
        ));
    }
    if !state.exits.is_empty() && strategy.rebalance_frequency == RebalanceFrequency::None {
        warnings.push(format!(
            "{} position(s) exited with no rebalance scheduled; proceeds stay in cash",
            state.exits.len()
        ));
    }

    let period = request.prices.period().ok_or_else(|| {
        PortfolioError::InsufficientData("Backtest price panel is empty".into())
    })?;
    let final_value = values.last().copied().unwrap_or(request.initial_capital);

    let result = BacktestResult {
        tickers: request.tickers.clone(),
        weights: targets,
        initial_capital: request.initial_capital,
        final_value,
        metrics,
        total_fees_paid: state.fees_paid,
        total_turnover: state.turnover,
        num_rebalances: state.rebalances.len(),
        drawdown_episode: drawdown_episode(&points),
        holding_periods: holding_periods(&state.first_acquired, &state.last_held),
        benchmark,
        is_liquidated: state.liquidation.is_some(),
        liquidation: state.liquidation,
        series_frequency: request.series_frequency,
        value_series: resample(&points, request.series_frequency),
        rebalances: state.rebalances,
        exits: state.exits,
        period,
        config: strategy.clone(),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Day-stepped portfolio backtest",
        &serde_json::json!({
            "strategy": strategy.name,
            "rebalance_frequency": strategy.rebalance_frequency.to_string(),
            "cost_rate": cost_rate.to_string(),
            "initial_capital": request.initial_capital.to_string(),
            "risk_free_rate": request.risk_free_rate.to_string(),
            "annualisation": "252 trading days",
            "execution": "closing prices, proportional costs on traded notional",
        }),
        warnings,
        elapsed,
        result,
    ))
}
