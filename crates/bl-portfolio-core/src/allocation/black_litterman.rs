use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use super::covariance::{
    estimate_covariance, estimate_expected_returns, prepare_returns, CovarianceMethod,
    ExpectedReturnsMethod,
};
use super::matrix::{
    mat_add, mat_inverse, mat_inverse_diagonal, mat_multiply, mat_multiply_transpose_right,
    mat_scale, mat_transpose, mat_vec_multiply, portfolio_std, vec_dot, Matrix, PIVOT_TOLERANCE,
};
use super::risk_aversion::{resolve_risk_aversion, InvestmentStyle, RiskAversionSource};
use super::risk_oracle::{check_view_optimism, RiskOracle};
use crate::error::PortfolioError;
use crate::market_data::{validate_tickers, PricePanel};
use crate::metrics::sharpe_ratio;
use crate::types::{with_metadata, AnalysisPeriod, ComputationOutput, Rate};
use crate::views::{
    normalize_confidence, parse_views, ConfidenceInput, ViewInput, ViewSpec,
};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tunable constants of the allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Scaling of prior uncertainty, tau * Sigma.
    pub tau: Decimal,
    /// Used to estimate risk aversion from market history.
    pub risk_free_rate: Rate,
    /// Subtracted in the reported Sharpe ratio; zero gives return / volatility.
    pub sharpe_risk_free_rate: Rate,
    pub trading_days: i64,
    pub risk_aversion_floor: Decimal,
    pub risk_aversion_cap: Decimal,
    pub max_tickers: usize,
    /// Minimum daily return observations before any estimate is attempted.
    pub min_observations: usize,
    /// View returns above this are checked against the risk oracle.
    pub optimism_threshold: Rate,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        AllocationSettings {
            tau: dec!(0.05),
            risk_free_rate: dec!(0.02),
            sharpe_risk_free_rate: Decimal::ZERO,
            trading_days: 252,
            risk_aversion_floor: dec!(0.5),
            risk_aversion_cap: dec!(15),
            max_tickers: 100,
            min_observations: 20,
            optimism_threshold: dec!(0.40),
        }
    }
}

impl AllocationSettings {
    pub fn validate(&self) -> PortfolioResult<()> {
        if self.tau <= Decimal::ZERO || self.tau > Decimal::ONE {
            return Err(PortfolioError::config(
                "tau",
                format!("tau must be in (0, 1], got {}; 0.05 is conventional", self.tau),
            ));
        }
        if self.trading_days <= 0 {
            return Err(PortfolioError::config(
                "trading_days",
                format!("trading_days must be positive, got {}", self.trading_days),
            ));
        }
        if self.risk_aversion_floor <= Decimal::ZERO
            || self.risk_aversion_cap < self.risk_aversion_floor
        {
            return Err(PortfolioError::config(
                "risk_aversion_floor",
                format!(
                    "risk aversion band [{}, {}] must be positive and ordered, e.g. [0.5, 15]",
                    self.risk_aversion_floor, self.risk_aversion_cap
                ),
            ));
        }
        if self.max_tickers < 2 {
            return Err(PortfolioError::config(
                "max_tickers",
                "max_tickers must allow at least 2 tickers",
            ));
        }
        if self.min_observations < 2 {
            return Err(PortfolioError::config(
                "min_observations",
                "at least 2 observations are needed to estimate a covariance",
            ));
        }
        Ok(())
    }
}

/// Input to a Black-Litterman allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateRequest {
    /// Active universe; column order of every matrix in the result.
    pub tickers: Vec<String>,
    pub prices: PricePanel,
    /// Market capitalizations; equal weights are used when absent.
    #[serde(default)]
    pub market_caps: Option<BTreeMap<String, Decimal>>,
    #[serde(default)]
    pub views: Option<ViewInput>,
    #[serde(default)]
    pub confidences: Option<ConfidenceInput>,
    /// Overrides the market-implied delta; style is then ignored.
    #[serde(default)]
    pub risk_aversion: Option<Decimal>,
    #[serde(default)]
    pub investment_style: InvestmentStyle,
    #[serde(default)]
    pub covariance_method: CovarianceMethod,
}

impl AllocateRequest {
    pub fn new(tickers: Vec<String>, prices: PricePanel) -> Self {
        AllocateRequest {
            tickers,
            prices,
            market_caps: None,
            views: None,
            confidences: None,
            risk_aversion: None,
            investment_style: InvestmentStyle::default(),
            covariance_method: CovarianceMethod::default(),
        }
    }
}

/// Per-asset line of an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAllocation {
    pub ticker: String,
    pub weight: Decimal,
    pub market_weight: Decimal,
    pub tilt: Decimal,
    pub prior_return: Rate,
    pub posterior_return: Rate,
}

/// How one view moved the posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewContribution {
    pub description: String,
    pub confidence: Decimal,
    pub omega: Decimal,
    /// Change in the view portfolio's expected return, posterior minus prior.
    pub impact_on_return: Rate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub tickers: Vec<String>,
    pub weights: BTreeMap<String, Decimal>,
    pub allocations: Vec<AssetAllocation>,
    pub prior_returns: BTreeMap<String, Rate>,
    pub posterior_returns: BTreeMap<String, Rate>,
    pub expected_return: Rate,
    pub volatility: Rate,
    pub sharpe_ratio: Decimal,
    pub risk_aversion: Decimal,
    pub risk_aversion_source: RiskAversionSource,
    pub investment_style: InvestmentStyle,
    pub tau: Decimal,
    pub covariance_method: CovarianceMethod,
    pub shrinkage: Decimal,
    /// Sigma + M with views, Sigma without.
    pub posterior_covariance: Matrix,
    pub has_views: bool,
    pub view_descriptions: Vec<String>,
    pub view_contributions: Vec<ViewContribution>,
    pub observations: usize,
    pub period: AnalysisPeriod,
}

/// Posterior of the Bayesian blend.
struct Posterior {
    returns: Vec<Decimal>,
    /// M = [(tau*Sigma)^-1 + P' Omega^-1 P]^-1
    uncertainty: Matrix,
    omega: Vec<Decimal>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Blend market-implied equilibrium returns with the request's views and
/// derive posterior weights.
pub fn allocate(
    request: &AllocateRequest,
    settings: &AllocationSettings,
) -> PortfolioResult<ComputationOutput<AllocationResult>> {
    run_allocation(request, settings, None)
}

/// As [`allocate`], additionally flagging implausibly optimistic views
/// against the oracle's tail statistics. Flags are warnings only.
pub fn allocate_with_oracle(
    request: &AllocateRequest,
    settings: &AllocationSettings,
    oracle: &dyn RiskOracle,
) -> PortfolioResult<ComputationOutput<AllocationResult>> {
    run_allocation(request, settings, Some(oracle))
}

fn run_allocation(
    request: &AllocateRequest,
    settings: &AllocationSettings,
    oracle: Option<&dyn RiskOracle>,
) -> PortfolioResult<ComputationOutput<AllocationResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    settings.validate()?;
    let tickers = &request.tickers;
    validate_tickers(tickers, 2, settings.max_tickers)?;
    let n = tickers.len();

    // Views are resolved before touching any data so shape errors surface first
    let views: Option<(ViewSpec, Vec<Decimal>)> = match &request.views {
        Some(input) => {
            let spec = parse_views(input, tickers)?;
            let conf = normalize_confidence(request.confidences.as_ref(), &spec, tickers)?;
            Some((spec, conf))
        }
        None => {
            if request.confidences.is_some() {
                warnings.push("Confidences were supplied without views and are ignored".into());
            }
            None
        }
    };
    let k = views.as_ref().map_or(0, |(spec, _)| spec.len());
    info!(tickers = n, views = k, "black-litterman allocation requested");

    // --- Step 1: Sigma ---
    let (returns, period) = prepare_returns(&request.prices, tickers, settings)?;
    let cov = estimate_covariance(&returns, request.covariance_method, settings.trading_days)?;
    let sigma = &cov.matrix;
    debug!(
        method = ?cov.method,
        shrinkage = %cov.shrinkage,
        observations = cov.observations,
        "covariance estimated"
    );

    // --- Step 2: market weights ---
    let w_mkt = market_weights(request.market_caps.as_ref(), tickers, &mut warnings)?;

    // --- Step 3: delta ---
    let annual_means = estimate_expected_returns(
        &returns,
        ExpectedReturnsMethod::HistoricalMean,
        settings.trading_days,
    );
    let (delta, delta_source) = resolve_risk_aversion(
        request.risk_aversion,
        request.investment_style,
        &w_mkt,
        &annual_means,
        sigma,
        settings.risk_free_rate,
        settings.risk_aversion_floor,
        settings.risk_aversion_cap,
    )?;
    if delta_source == RiskAversionSource::Fallback {
        warnings.push(format!(
            "Market portfolio variance is not positive; risk aversion fell back to {}",
            delta
        ));
    }
    info!(risk_aversion = %delta, source = ?delta_source, "risk aversion resolved");

    // --- Step 4: prior pi = delta * Sigma * w_mkt ---
    let pi: Vec<Decimal> = mat_vec_multiply(sigma, &w_mkt)
        .into_iter()
        .map(|v| delta * v)
        .collect();

    // --- Steps 5-7: posterior and weights ---
    let (weights, posterior_returns, posterior_cov, contributions, descriptions) = match &views {
        Some((spec, conf)) => {
            let post = black_litterman_posterior(sigma, &pi, spec, conf, settings.tau)?;
            let raw = mat_vec_multiply(
                &mat_inverse(&mat_scale(sigma, delta), "delta * Sigma")?,
                &post.returns,
            );
            let weights = normalize_weights(&raw, &mut warnings);
            let descriptions = spec.describe(tickers);
            let contributions = (0..spec.len())
                .map(|i| ViewContribution {
                    description: descriptions[i].clone(),
                    confidence: conf[i],
                    omega: post.omega[i],
                    impact_on_return: vec_dot(&spec.p[i], &post.returns)
                        - vec_dot(&spec.p[i], &pi),
                })
                .collect();
            let posterior_cov = mat_add(sigma, &post.uncertainty);
            (weights, post.returns, posterior_cov, contributions, descriptions)
        }
        None => (w_mkt.clone(), pi.clone(), sigma.clone(), Vec::new(), Vec::new()),
    };

    // --- Step 8: performance ---
    let expected_return = vec_dot(&weights, &posterior_returns);
    let volatility = portfolio_std(&weights, &posterior_cov);
    let sharpe = sharpe_ratio(expected_return, volatility, settings.sharpe_risk_free_rate);

    let allocations: Vec<AssetAllocation> = (0..n)
        .map(|i| AssetAllocation {
            ticker: tickers[i].clone(),
            weight: weights[i],
            market_weight: w_mkt[i],
            tilt: weights[i] - w_mkt[i],
            prior_return: pi[i],
            posterior_return: posterior_returns[i],
        })
        .collect();

    // --- Warnings ---
    for a in &allocations {
        if a.weight < Decimal::ZERO {
            warnings.push(format!(
                "Short position: {} has weight {:.4}; weights are unconstrained and a view \
                 disfavors this asset strongly",
                a.ticker, a.weight
            ));
        }
        if a.weight > dec!(0.50) {
            warnings.push(format!(
                "Concentrated position: {} has weight {:.4}",
                a.ticker, a.weight
            ));
        }
        if a.tilt.abs() > dec!(0.20) {
            warnings.push(format!(
                "Large tilt from market: {} tilt = {:.4}",
                a.ticker, a.tilt
            ));
        }
    }
    if let (Some(oracle), Some((spec, _))) = (oracle, &views) {
        warnings.extend(check_view_optimism(
            spec,
            tickers,
            &period,
            oracle,
            settings.optimism_threshold,
        ));
    }

    let result = AllocationResult {
        tickers: tickers.clone(),
        weights: tickers.iter().cloned().zip(weights.iter().copied()).collect(),
        allocations,
        prior_returns: tickers.iter().cloned().zip(pi.iter().copied()).collect(),
        posterior_returns: tickers
            .iter()
            .cloned()
            .zip(posterior_returns.iter().copied())
            .collect(),
        expected_return,
        volatility,
        sharpe_ratio: sharpe,
        risk_aversion: delta,
        risk_aversion_source: delta_source,
        investment_style: request.investment_style,
        tau: settings.tau,
        covariance_method: cov.method,
        shrinkage: cov.shrinkage,
        posterior_covariance: posterior_cov,
        has_views: views.is_some(),
        view_descriptions: descriptions,
        view_contributions: contributions,
        observations: cov.observations,
        period,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Black-Litterman Allocation (Idzorek confidence mapping)",
        &serde_json::json!({
            "n_assets": n,
            "n_views": k,
            "tau": settings.tau.to_string(),
            "risk_free_rate": settings.risk_free_rate.to_string(),
            "sharpe_risk_free_rate": settings.sharpe_risk_free_rate.to_string(),
            "trading_days": settings.trading_days,
            "covariance_method": cov.method,
            "investment_style": request.investment_style.to_string(),
            "weights_constrained": false,
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Black-Litterman construction helpers
// ---------------------------------------------------------------------------

/// Market-cap weights in ticker order, or equal weights when caps are absent.
fn market_weights(
    caps: Option<&BTreeMap<String, Decimal>>,
    tickers: &[String],
    warnings: &mut Vec<String>,
) -> PortfolioResult<Vec<Decimal>> {
    let n = Decimal::from(tickers.len() as i64);
    let caps = match caps {
        Some(c) if !c.is_empty() => c,
        _ => {
            warnings.push("Market caps unavailable; using equal market weights".into());
            return Ok(vec![Decimal::ONE / n; tickers.len()]);
        }
    };

    if let Some(unknown) = caps.keys().find(|t| !tickers.contains(t)) {
        return Err(PortfolioError::invalid(
            format!("market_caps.{}", unknown),
            format!(
                "Ticker '{}' not in tickers list {:?}; supply caps for the active universe only",
                unknown, tickers
            ),
        ));
    }

    let mut raw = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        match caps.get(ticker) {
            None => {
                return Err(PortfolioError::invalid(
                    format!("market_caps.{}", ticker),
                    format!(
                        "Missing market cap for {}; supply every ticker or none, \
                         e.g. {{\"{}\": 3.0e12}}",
                        ticker, ticker
                    ),
                ))
            }
            Some(cap) if *cap <= Decimal::ZERO => {
                return Err(PortfolioError::invalid(
                    format!("market_caps.{}", ticker),
                    format!("Market cap must be positive, got {}", cap),
                ))
            }
            Some(cap) => raw.push(*cap),
        }
    }
    let total: Decimal = raw.iter().copied().sum();
    Ok(raw.into_iter().map(|c| c / total).collect())
}

/// Diagonal of Omega via the Idzorek closed form:
/// omega_k = tau * (1 - c_k) / c_k * (P Sigma P')_kk.
fn build_omega(
    p_sigma_pt: &[Vec<Decimal>],
    confidences: &[Decimal],
    tau: Decimal,
) -> PortfolioResult<Vec<Decimal>> {
    let mut omega = Vec::with_capacity(confidences.len());
    for (i, conf) in confidences.iter().enumerate() {
        let variance_term = p_sigma_pt[i][i];
        let alpha = (Decimal::ONE - *conf) / *conf;
        let omega_ii = tau * alpha * variance_term;
        if omega_ii < Decimal::ZERO {
            return Err(PortfolioError::Numerical {
                context: format!("Omega[{},{}] = {}", i, i, omega_ii),
                suggestion: "view variance is negative; the covariance is not positive \
                             semi-definite, widen the date range"
                    .into(),
            });
        }
        // full confidence collapses the view variance; keep Omega invertible
        omega.push(if omega_ii < PIVOT_TOLERANCE {
            PIVOT_TOLERANCE
        } else {
            omega_ii
        });
    }
    Ok(omega)
}

/// E[R] = [(tau*Sigma)^-1 + P' Omega^-1 P]^-1 [(tau*Sigma)^-1 pi + P' Omega^-1 Q]
fn black_litterman_posterior(
    sigma: &[Vec<Decimal>],
    pi: &[Decimal],
    views: &ViewSpec,
    confidences: &[Decimal],
    tau: Decimal,
) -> PortfolioResult<Posterior> {
    let p_mat = &views.p;
    let p_sigma_pt = mat_multiply_transpose_right(&mat_multiply(p_mat, sigma), p_mat);
    let omega = build_omega(&p_sigma_pt, confidences, tau)?;
    let omega_mat: Matrix = (0..omega.len())
        .map(|i| {
            let mut row = vec![Decimal::ZERO; omega.len()];
            row[i] = omega[i];
            row
        })
        .collect();

    let tau_sigma_inv = mat_inverse(&mat_scale(sigma, tau), "tau * Sigma")?;
    let omega_inv = mat_inverse_diagonal(&omega_mat)?;
    let pt = mat_transpose(p_mat);

    let pt_omega_inv = mat_multiply(&pt, &omega_inv);
    let pt_omega_inv_p = mat_multiply(&pt_omega_inv, p_mat);
    let pt_omega_inv_q = mat_vec_multiply(&pt_omega_inv, &views.q);

    let a_mat = mat_add(&tau_sigma_inv, &pt_omega_inv_p);
    let a_inv = mat_inverse(&a_mat, "posterior precision")?;

    let b_vec: Vec<Decimal> = mat_vec_multiply(&tau_sigma_inv, pi)
        .iter()
        .zip(pt_omega_inv_q.iter())
        .map(|(a, b)| *a + *b)
        .collect();

    Ok(Posterior {
        returns: mat_vec_multiply(&a_inv, &b_vec),
        uncertainty: a_inv,
        omega,
    })
}

/// Scale raw mean-variance weights to sum to one. Signs are kept.
fn normalize_weights(raw: &[Decimal], warnings: &mut Vec<String>) -> Vec<Decimal> {
    let sum: Decimal = raw.iter().copied().sum();
    if sum.abs() < PIVOT_TOLERANCE {
        warnings.push(
            "Optimal weights sum to zero and cannot be normalized; falling back to equal weights"
                .into(),
        );
        let n = Decimal::from(raw.len() as i64);
        return vec![Decimal::ONE / n; raw.len()];
    }
    raw.iter().map(|w| *w / sum).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
