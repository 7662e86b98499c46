//! Black-Litterman allocation: covariance shrinkage, market-implied risk
//! aversion, Idzorek view uncertainty and posterior weights.

pub mod black_litterman;
pub mod covariance;
pub mod matrix;
pub mod risk_aversion;
pub mod risk_oracle;

pub use black_litterman::{
    allocate, allocate_with_oracle, AllocateRequest, AllocationResult, AllocationSettings,
    AssetAllocation, ViewContribution,
};
pub use covariance::{
    covariance_matrix, estimate_covariance, expected_returns, CovarianceEstimate,
    CovarianceMethod, CovarianceReport, ExpectedReturnsMethod, ExpectedReturnsReport,
};
pub use risk_aversion::{InvestmentStyle, RiskAversionSource};
pub use risk_oracle::{check_view_optimism, HistoricalVarOracle, RiskOracle, VarEstimate};
