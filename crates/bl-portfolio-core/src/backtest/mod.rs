//! Historical replay of a target allocation: rebalance schedule, transaction
//! costs, stop/take-profit exits and a drawdown kill switch.

pub mod config;
pub mod report;
pub mod schedule;
pub mod simulator;

pub use config::{RebalanceFrequency, StrategyConfig, StrategyOverrides, PRESET_NAMES};
pub use report::{
    BenchmarkComparison, DrawdownEpisode, HoldingPeriod, SeriesFrequency, ValuePoint,
};
pub use schedule::rebalance_schedule;
pub use simulator::{
    normalize_target_weights, run_backtest, BacktestRequest, BacktestResult, ExitEvent,
    ExitReason, Liquidation, RebalanceEvent, LIQUIDATION_REASON,
};
