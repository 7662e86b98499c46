pub mod panel;

pub use panel::{validate_tickers, BenchmarkPoint, BenchmarkSeries, PricePanel, PriceRow};
