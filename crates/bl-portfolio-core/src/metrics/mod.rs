//! Return, risk and benchmark statistics over a periodic returns series.
//!
//! Every function is pure and total: empty, single-point or zero-variance
//! input yields a neutral value (usually zero) instead of an error or a
//! non-finite number.

pub mod returns;

pub use returns::*;
