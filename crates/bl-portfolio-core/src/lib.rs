//! Black-Litterman allocation and historical backtesting with decimal precision.
//!
//! The crate has two computational cores that callers compose themselves:
//!
//! - [`allocation`] blends market-implied equilibrium returns with investor
//!   views (parsed by [`views`]) into posterior returns and weights.
//! - [`backtest`] replays a price panel day by day against a target allocation
//!   with rebalancing, transaction costs and risk controls.
//!
//! Both use the pure functions in [`metrics`]. Price retrieval happens before
//! either core is invoked; the crate performs no I/O.

pub mod error;
pub mod market_data;
pub mod metrics;
pub mod types;
pub mod views;

#[cfg(feature = "allocation")]
pub mod allocation;

#[cfg(feature = "backtest")]
pub mod backtest;

pub use error::{ErrorCategory, PortfolioError};
pub use types::*;

/// Standard result type for all portfolio operations
pub type PortfolioResult<T> = Result<T, PortfolioError>;
