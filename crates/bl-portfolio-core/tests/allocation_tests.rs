use bl_portfolio_core::allocation::{
    allocate, allocate_with_oracle, covariance_matrix, expected_returns, AllocateRequest,
    AllocationSettings, CovarianceMethod, ExpectedReturnsMethod, HistoricalVarOracle,
    InvestmentStyle, RiskAversionSource, RiskOracle, VarEstimate,
};
use bl_portfolio_core::market_data::{PricePanel, PriceRow};
use bl_portfolio_core::views::{parse_views, ConfidenceInput, ConfidenceValue, ViewInput};
use bl_portfolio_core::{AnalysisPeriod, PortfolioError, PortfolioResult};
use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

// ===========================================================================
// Fixtures
// ===========================================================================

/// Three assets with different drifts and a repeating four-day wiggle.
fn panel(days: usize) -> PricePanel {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let patterns = [
        [dec!(0.011), dec!(-0.007), dec!(0.005), dec!(-0.003)],
        [dec!(-0.004), dec!(0.008), dec!(0.002), dec!(-0.004)],
        [dec!(0.002), dec!(0.003), dec!(-0.005), dec!(0.003)],
    ];
    let names = ["X", "Y", "Z"];
    let mut prices = [dec!(150), dec!(80), dec!(25)];
    let mut rows = Vec::with_capacity(days);
    for d in 0..days {
        if d > 0 {
            for (i, p) in prices.iter_mut().enumerate() {
                *p *= Decimal::ONE + patterns[i][(d + 2 * i) % 4];
            }
        }
        rows.push(PriceRow {
            date: start + Duration::days(d as i64),
            closes: names
                .iter()
                .zip(prices.iter())
                .map(|(n, p)| (n.to_string(), *p))
                .collect(),
        });
    }
    PricePanel::new(rows)
}

fn tickers() -> Vec<String> {
    vec!["X".into(), "Y".into(), "Z".into()]
}

fn request() -> AllocateRequest {
    let caps: BTreeMap<String, Decimal> = [("X", dec!(500)), ("Y", dec!(300)), ("Z", dec!(200))]
        .iter()
        .map(|(t, c)| (t.to_string(), *c))
        .collect();
    let mut r = AllocateRequest::new(tickers(), panel(120));
    r.market_caps = Some(caps);
    r
}

fn view_on_x(q: Decimal) -> ViewInput {
    ViewInput::TickerKeyed {
        p: vec![BTreeMap::from([("X".to_string(), dec!(1))])],
        q: vec![q],
    }
}

fn uniform(c: Decimal) -> Option<ConfidenceInput> {
    Some(ConfidenceInput::Uniform(ConfidenceValue::Number(c)))
}

fn weight_sum(w: &BTreeMap<String, Decimal>) -> Decimal {
    w.values().copied().sum()
}

struct FixedOracle(Decimal);

impl RiskOracle for FixedOracle {
    fn estimate_var(&self, _ticker: &str, _period: &AnalysisPeriod) -> PortfolioResult<VarEstimate> {
        Ok(VarEstimate {
            var_95_annual: dec!(-0.30),
            percentile_95_annual: self.0,
            volatility_annual: dec!(0.25),
        })
    }
}

// ===========================================================================
// Equilibrium (no views)
// ===========================================================================

#[test]
fn test_no_views_posterior_equals_prior() {
    let out = allocate(&request(), &AllocationSettings::default()).unwrap();
    let r = &out.result;

    assert!(!r.has_views);
    assert_eq!(r.prior_returns, r.posterior_returns);
    assert_eq!(r.weights["X"], dec!(0.5));
    assert_eq!(r.weights["Y"], dec!(0.3));
    assert_eq!(r.weights["Z"], dec!(0.2));
    assert!(r.view_descriptions.is_empty());
    assert_eq!(r.observations, 119);
    assert_eq!(r.period.trading_days, 120);
}

#[test]
fn test_no_views_performance_consistent() {
    let r = allocate(&request(), &AllocationSettings::default()).unwrap().result;
    assert!(r.volatility > Decimal::ZERO);
    // Sharpe is plain return over volatility unless a hurdle rate is set
    assert_eq!(r.sharpe_ratio, r.expected_return / r.volatility);
    assert!(r.risk_aversion >= dec!(0.5) && r.risk_aversion <= dec!(15));
}

#[test]
fn test_sharpe_hurdle_rate_is_separate_from_risk_aversion_rate() {
    let plain = allocate(&request(), &AllocationSettings::default()).unwrap().result;
    let settings = AllocationSettings {
        sharpe_risk_free_rate: dec!(0.03),
        ..Default::default()
    };
    let hurdle = allocate(&request(), &settings).unwrap().result;

    // risk aversion still uses the 2% estimation rate
    assert_eq!(plain.risk_aversion, hurdle.risk_aversion);
    assert_eq!(plain.expected_return, hurdle.expected_return);
    assert_eq!(hurdle.sharpe_ratio, (hurdle.expected_return - dec!(0.03)) / hurdle.volatility);
}

#[test]
fn test_conservative_style_raises_risk_aversion() {
    let settings = AllocationSettings::default();
    let mut aggressive = request();
    aggressive.investment_style = InvestmentStyle::Aggressive;
    let mut conservative = request();
    conservative.investment_style = InvestmentStyle::Conservative;

    let a = allocate(&aggressive, &settings).unwrap().result;
    let c = allocate(&conservative, &settings).unwrap().result;
    assert!(c.risk_aversion >= a.risk_aversion);
    match c.risk_aversion_source {
        RiskAversionSource::Estimated { multiplier, .. } => assert_eq!(multiplier, dec!(2)),
        RiskAversionSource::Fallback => {}
        other => panic!("unexpected source {:?}", other),
    }
}

// ===========================================================================
// Views
// ===========================================================================

#[test]
fn test_half_confidence_view_lands_between_prior_and_view() {
    let mut req = request();
    req.views = Some(view_on_x(dec!(0.10)));
    req.confidences = uniform(dec!(0.5));
    let r = allocate(&req, &AllocationSettings::default()).unwrap().result;

    let prior = r.prior_returns["X"];
    let post = r.posterior_returns["X"];
    let (lo, hi) = if prior < dec!(0.10) { (prior, dec!(0.10)) } else { (dec!(0.10), prior) };
    assert!(post > lo && post < hi, "posterior {} not in ({}, {})", post, lo, hi);
    assert!((weight_sum(&r.weights) - Decimal::ONE).abs() < dec!(0.000001));
    assert_eq!(r.view_descriptions, vec!["X absolute return = 10.00%".to_string()]);
}

#[test]
fn test_relative_view_widens_spread() {
    let mut req = request();
    req.views = Some(ViewInput::TickerKeyed {
        p: vec![BTreeMap::from([
            ("X".to_string(), dec!(1)),
            ("Y".to_string(), dec!(-1)),
        ])],
        q: vec![dec!(0.15)],
    });
    req.confidences = uniform(dec!(0.8));
    let r = allocate(&req, &AllocationSettings::default()).unwrap().result;

    let prior_spread = r.prior_returns["X"] - r.prior_returns["Y"];
    let post_spread = r.posterior_returns["X"] - r.posterior_returns["Y"];
    assert!((post_spread - dec!(0.15)).abs() < (prior_spread - dec!(0.15)).abs());
    assert_eq!(r.view_descriptions[0], "X outperforms Y by 15.00%");
    assert_eq!(r.view_contributions.len(), 1);
}

#[test]
fn test_confidence_monotonic() {
    let settings = AllocationSettings::default();
    let q = dec!(0.30);
    let mut last_gap: Option<Decimal> = None;
    let mut last_weight: Option<Decimal> = None;
    let mut direction = Decimal::ZERO;

    for c in [dec!(0.1), dec!(0.3), dec!(0.5), dec!(0.7), dec!(0.9), dec!(1.0)] {
        let mut req = request();
        req.views = Some(view_on_x(q));
        req.confidences = uniform(c);
        let r = allocate(&req, &settings).unwrap().result;

        let gap = (q - r.posterior_returns["X"]).abs();
        if direction.is_zero() {
            direction = (q - r.prior_returns["X"]).signum();
        }
        let signed_weight = r.weights["X"] * direction;
        if let Some(prev) = last_gap {
            assert!(gap <= prev, "confidence {} moved posterior away from view", c);
        }
        if let Some(prev) = last_weight {
            assert!(signed_weight >= prev - dec!(0.0000001), "weight reversed at {}", c);
        }
        // never overshoots the view
        assert!((r.posterior_returns["X"] - q) * direction <= dec!(0.000001));
        last_gap = Some(gap);
        last_weight = Some(signed_weight);
    }
    assert!(last_gap.unwrap() < dec!(0.0001));
}

#[test]
fn test_index_and_ticker_keyed_views_identical() {
    let ticker_keyed = ViewInput::TickerKeyed {
        p: vec![BTreeMap::from([
            ("Y".to_string(), dec!(1)),
            ("Z".to_string(), dec!(-1)),
        ])],
        q: vec![dec!(0.04)],
    };
    let index_keyed = ViewInput::IndexKeyed {
        p: vec![vec![dec!(0), dec!(1), dec!(-1)]],
        q: vec![dec!(0.04)],
    };
    assert_eq!(
        parse_views(&ticker_keyed, &tickers()).unwrap(),
        parse_views(&index_keyed, &tickers()).unwrap()
    );

    let settings = AllocationSettings::default();
    let mut a = request();
    a.views = Some(ticker_keyed);
    let mut b = request();
    b.views = Some(index_keyed);
    let ra = allocate(&a, &settings).unwrap().result;
    let rb = allocate(&b, &settings).unwrap().result;
    assert_eq!(ra.weights, rb.weights);
    assert_eq!(ra.posterior_returns, rb.posterior_returns);
    assert_eq!(ra.view_descriptions, rb.view_descriptions);
}

#[test]
fn test_json_view_shapes() {
    let keyed: ViewInput = serde_json::from_str(r#"{"P": [{"X": 1, "Z": -1}], "Q": [0.05]}"#).unwrap();
    let indexed: ViewInput = serde_json::from_str(r#"{"P": [[1, 0, -1]], "Q": [0.05]}"#).unwrap();
    let legacy: ViewInput = serde_json::from_str(r#"{"X": 0.12, "Z": 0.03}"#).unwrap();

    assert!(matches!(keyed, ViewInput::TickerKeyed { .. }));
    assert!(matches!(indexed, ViewInput::IndexKeyed { .. }));
    assert!(matches!(legacy, ViewInput::AbsoluteLegacy(_)));

    let spec = parse_views(&legacy, &tickers()).unwrap();
    assert_eq!(spec.p, vec![vec![dec!(1), dec!(0), dec!(0)], vec![dec!(0), dec!(0), dec!(1)]]);
    assert_eq!(spec.q, vec![dec!(0.12), dec!(0.03)]);
}

#[test]
fn test_per_ticker_confidences_for_legacy_views() {
    let mut req = request();
    req.views = Some(serde_json::from_str(r#"{"X": 0.12, "Z": 0.03}"#).unwrap());
    req.confidences = Some(serde_json::from_str(r#"{"X": "70%", "Z": 40}"#).unwrap());
    let r = allocate(&req, &AllocationSettings::default()).unwrap().result;
    let confidences: Vec<Decimal> = r.view_contributions.iter().map(|v| v.confidence).collect();
    assert_eq!(confidences, vec![dec!(0.7), dec!(0.4)]);

    let mut missing = request();
    missing.views = Some(serde_json::from_str(r#"{"X": 0.12, "Z": 0.03}"#).unwrap());
    missing.confidences = Some(serde_json::from_str(r#"{"X": 0.7}"#).unwrap());
    let err = allocate(&missing, &AllocationSettings::default()).unwrap_err();
    assert!(err.to_string().contains("Missing confidence for view on Z"));
}

#[test]
fn test_ambiguous_confidence_rejected() {
    let mut req = request();
    req.views = Some(view_on_x(dec!(0.10)));
    req.confidences = uniform(dec!(3));
    let err = allocate(&req, &AllocationSettings::default()).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput { .. }));
}

#[test]
fn test_unknown_view_ticker_lists_universe() {
    let mut req = request();
    req.views = Some(ViewInput::TickerKeyed {
        p: vec![BTreeMap::from([("QQQ".to_string(), dec!(1))])],
        q: vec![dec!(0.1)],
    });
    let msg = allocate(&req, &AllocationSettings::default()).unwrap_err().to_string();
    assert!(msg.contains("QQQ"));
    assert!(msg.contains("X"));
}

// ===========================================================================
// Optimism oracle
// ===========================================================================

#[test]
fn test_optimistic_view_flagged_by_oracle() {
    let mut req = request();
    req.views = Some(view_on_x(dec!(0.60)));
    let out = allocate_with_oracle(&req, &AllocationSettings::default(), &FixedOracle(dec!(0.20)))
        .unwrap();
    let flagged: Vec<&String> = out
        .warnings
        .iter()
        .filter(|w| w.contains("95th percentile"))
        .collect();
    assert_eq!(flagged.len(), 1);
    assert!(flagged[0].contains('X'));
    assert!(flagged[0].contains("60.0%"));
}

#[test]
fn test_historical_oracle_quiet_for_modest_view() {
    let mut req = request();
    req.views = Some(view_on_x(dec!(0.05)));
    let oracle = HistoricalVarOracle::new(&req.prices);
    let out = allocate_with_oracle(&req, &AllocationSettings::default(), &oracle).unwrap();
    assert!(!out.warnings.iter().any(|w| w.contains("95th percentile")));
}

// ===========================================================================
// Estimators
// ===========================================================================

#[test]
fn test_covariance_matrix_report() {
    let settings = AllocationSettings::default();
    let p = panel(120);
    let out = covariance_matrix(&p, &tickers(), CovarianceMethod::LedoitWolf, &settings).unwrap();
    let c = &out.result;
    assert!(c.shrinkage >= Decimal::ZERO && c.shrinkage <= Decimal::ONE);
    for a in tickers() {
        assert!(c.covariance[&a][&a] > Decimal::ZERO);
        for b in tickers() {
            assert_eq!(c.covariance[&a][&b], c.covariance[&b][&a]);
        }
    }

    let sample = covariance_matrix(&p, &tickers(), CovarianceMethod::Sample, &settings).unwrap();
    assert_eq!(sample.result.shrinkage, Decimal::ZERO);
}

#[test]
fn test_expected_returns_methods() {
    let settings = AllocationSettings::default();
    let p = panel(120);
    let mean = expected_returns(&p, &tickers(), ExpectedReturnsMethod::HistoricalMean, &settings)
        .unwrap()
        .result;
    let ema = expected_returns(&p, &tickers(), ExpectedReturnsMethod::Ema, &settings)
        .unwrap()
        .result;
    assert_eq!(mean.expected_returns.len(), 3);
    assert_eq!(ema.expected_returns.len(), 3);
    assert_eq!(mean.period, ema.period);
}

#[test]
fn test_short_history_rejected() {
    let mut req = request();
    req.prices = panel(10);
    assert!(matches!(
        allocate(&req, &AllocationSettings::default()).unwrap_err(),
        PortfolioError::InsufficientData(_)
    ));
}
