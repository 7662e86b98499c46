use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PortfolioError;
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// View payload as supplied by a caller.
///
/// Deserializes from the three JSON shapes accepted at the boundary:
/// `{"P": [{"NVDA": 1, "AAPL": -1}], "Q": [0.2]}`,
/// `{"P": [[1, -1, 0]], "Q": [0.2]}` and the legacy flat `{"AAPL": 0.10}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewInput {
    /// One map of ticker exposures per view.
    TickerKeyed {
        #[serde(rename = "P")]
        p: Vec<BTreeMap<String, Decimal>>,
        #[serde(rename = "Q")]
        q: Vec<Decimal>,
    },
    /// One exposure per active ticker, positionally, per view.
    IndexKeyed {
        #[serde(rename = "P")]
        p: Vec<Vec<Decimal>>,
        #[serde(rename = "Q")]
        q: Vec<Decimal>,
    },
    /// Each key is an absolute view on that ticker with unit exposure.
    AbsoluteLegacy(BTreeMap<String, Decimal>),
}

/// Canonical view representation: `P` is K x N over the active tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub p: Vec<Vec<Decimal>>,
    pub q: Vec<Decimal>,
}

const VIEW_EXAMPLES: &str = "absolute {\"P\": [{\"AAPL\": 1}], \"Q\": [0.10]}, \
     relative {\"P\": [{\"NVDA\": 1, \"AAPL\": -1}], \"Q\": [0.20]}, \
     index-keyed {\"P\": [[1, -1, 0]], \"Q\": [0.20]}";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Resolve any accepted view shape into `(P, Q)` over `tickers`.
pub fn parse_views(input: &ViewInput, tickers: &[String]) -> PortfolioResult<ViewSpec> {
    let spec = match input {
        ViewInput::TickerKeyed { p, q } => {
            check_not_empty(p.len(), q.len())?;
            check_row_count(p.len(), q.len())?;
            let mut rows = Vec::with_capacity(p.len());
            for (i, view) in p.iter().enumerate() {
                let mut row = vec![Decimal::ZERO; tickers.len()];
                for (ticker, weight) in view {
                    let j = ticker_index(ticker, tickers, &format!("views.P[{}]", i))?;
                    row[j] = *weight;
                }
                rows.push(row);
            }
            ViewSpec { p: rows, q: q.clone() }
        }
        ViewInput::IndexKeyed { p, q } => {
            check_not_empty(p.len(), q.len())?;
            for (i, row) in p.iter().enumerate() {
                if row.len() != tickers.len() {
                    return Err(PortfolioError::invalid(
                        format!("views.P[{}]", i),
                        format!(
                            "P matrix has {} columns but there are {} tickers {:?}; \
                             dimensions must match, e.g. {:?} for a view on the first ticker",
                            row.len(),
                            tickers.len(),
                            tickers,
                            unit_row(tickers.len())
                        ),
                    ));
                }
            }
            check_row_count(p.len(), q.len())?;
            ViewSpec { p: p.clone(), q: q.clone() }
        }
        ViewInput::AbsoluteLegacy(views) => {
            if views.is_empty() {
                return Err(PortfolioError::invalid(
                    "views",
                    format!("View dictionary cannot be empty; use e.g. {}", VIEW_EXAMPLES),
                ));
            }
            let mut indexed = Vec::with_capacity(views.len());
            for (ticker, expected) in views {
                let j = ticker_index(ticker, tickers, "views")?;
                if *expected < dec!(-1) || *expected > dec!(10) {
                    return Err(PortfolioError::invalid(
                        format!("views.{}", ticker),
                        format!(
                            "Expected return {} seems unreasonable; use decimals between \
                             -1.0 (-100%) and 10.0 (+1000%), e.g. 0.10 for 10%",
                            expected
                        ),
                    ));
                }
                indexed.push((j, *expected));
            }
            // Legacy dicts carry no order of their own; follow the ticker list.
            indexed.sort_by_key(|(j, _)| *j);
            let mut p = Vec::with_capacity(indexed.len());
            let mut q = Vec::with_capacity(indexed.len());
            for (j, expected) in indexed {
                let mut row = vec![Decimal::ZERO; tickers.len()];
                row[j] = Decimal::ONE;
                p.push(row);
                q.push(expected);
            }
            ViewSpec { p, q }
        }
    };

    for (i, row) in spec.p.iter().enumerate() {
        if row.iter().all(|w| w.is_zero()) {
            return Err(PortfolioError::invalid(
                format!("views.P[{}]", i),
                format!(
                    "View has no nonzero exposure; every view must pick at least one ticker, \
                     e.g. {}",
                    VIEW_EXAMPLES
                ),
            ));
        }
    }

    Ok(spec)
}

fn check_not_empty(p_rows: usize, q_len: usize) -> PortfolioResult<()> {
    if p_rows == 0 {
        return Err(PortfolioError::invalid(
            "views.P",
            format!("P matrix cannot be empty; provide at least one view, e.g. {}", VIEW_EXAMPLES),
        ));
    }
    if q_len == 0 {
        return Err(PortfolioError::invalid(
            "views.Q",
            "Q cannot be empty; provide one expected return per view, e.g. [0.10]",
        ));
    }
    Ok(())
}

fn check_row_count(p_rows: usize, q_len: usize) -> PortfolioResult<()> {
    if p_rows != q_len {
        return Err(PortfolioError::invalid(
            "views",
            format!(
                "P matrix has {} rows but Q has {} elements; number of views must match, \
                 e.g. {{\"P\": [{{\"AAPL\": 1}}, {{\"MSFT\": 1}}], \"Q\": [0.10, 0.05]}}",
                p_rows, q_len
            ),
        ));
    }
    Ok(())
}

fn ticker_index(ticker: &str, tickers: &[String], field: &str) -> PortfolioResult<usize> {
    tickers.iter().position(|t| t == ticker).ok_or_else(|| {
        PortfolioError::invalid(
            field,
            format!(
                "Ticker '{}' not found in tickers list. Available tickers: {:?}",
                ticker, tickers
            ),
        )
    })
}

fn unit_row(n: usize) -> Vec<i32> {
    let mut row = vec![0; n];
    if let Some(first) = row.first_mut() {
        *first = 1;
    }
    row
}

// ---------------------------------------------------------------------------
// ViewSpec
// ---------------------------------------------------------------------------

impl ViewSpec {
    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// A view touching more than one asset is relative.
    pub fn is_relative(&self, view: usize) -> bool {
        self.p[view].iter().filter(|w| !w.is_zero()).count() > 1
    }

    /// Column of the single picked asset for an absolute view.
    pub fn single_asset(&self, view: usize) -> Option<usize> {
        let mut nonzero = self.p[view]
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.is_zero());
        match (nonzero.next(), nonzero.next()) {
            (Some((j, _)), None) => Some(j),
            _ => None,
        }
    }

    /// Column with the largest positive exposure in a view.
    pub fn long_leg(&self, view: usize) -> Option<usize> {
        self.p[view]
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > Decimal::ZERO)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(j, _)| j)
    }

    /// One human-readable line per view.
    pub fn describe(&self, tickers: &[String]) -> Vec<String> {
        (0..self.len())
            .map(|k| {
                let pct = self.q[k] * dec!(100);
                let row = &self.p[k];
                let legs: Vec<(usize, Decimal)> = row
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| !w.is_zero())
                    .map(|(j, w)| (j, *w))
                    .collect();
                match legs.as_slice() {
                    [(j, w)] if *w == Decimal::ONE => {
                        format!("{} absolute return = {:.2}%", tickers[*j], pct)
                    }
                    [(a, wa), (b, wb)] if *wa == Decimal::ONE && *wb == -Decimal::ONE => {
                        format!("{} outperforms {} by {:.2}%", tickers[*a], tickers[*b], pct)
                    }
                    [(a, wa), (b, wb)] if *wa == -Decimal::ONE && *wb == Decimal::ONE => {
                        format!("{} outperforms {} by {:.2}%", tickers[*b], tickers[*a], pct)
                    }
                    _ => {
                        let terms: Vec<String> = legs
                            .iter()
                            .map(|(j, w)| format!("{}×{}", w.normalize(), tickers[*j]))
                            .collect();
                        format!("{} = {:.2}%", terms.join(" + "), pct)
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tickers() -> Vec<String> {
        vec!["NVDA".into(), "AAPL".into(), "MSFT".into()]
    }

    fn ticker_keyed(rows: Vec<Vec<(&str, Decimal)>>, q: Vec<Decimal>) -> ViewInput {
        ViewInput::TickerKeyed {
            p: rows
                .into_iter()
                .map(|r| r.into_iter().map(|(t, w)| (t.to_string(), w)).collect())
                .collect(),
            q,
        }
    }

    // ------------------------------------------------------------------
    // 1. Ticker-keyed views
    // ------------------------------------------------------------------

    #[test]
    fn test_absolute_ticker_keyed() {
        let input = ticker_keyed(vec![vec![("AAPL", dec!(1))]], vec![dec!(0.10)]);
        let spec = parse_views(&input, &tickers()).unwrap();
        assert_eq!(spec.p, vec![vec![dec!(0), dec!(1), dec!(0)]]);
        assert_eq!(spec.q, vec![dec!(0.10)]);
        assert!(!spec.is_relative(0));
        assert_eq!(spec.single_asset(0), Some(1));
    }

    #[test]
    fn test_relative_ticker_keyed() {
        let input = ticker_keyed(
            vec![vec![("NVDA", dec!(1)), ("AAPL", dec!(-1))]],
            vec![dec!(0.20)],
        );
        let spec = parse_views(&input, &tickers()).unwrap();
        assert_eq!(spec.p, vec![vec![dec!(1), dec!(-1), dec!(0)]]);
        assert!(spec.is_relative(0));
        assert_eq!(spec.long_leg(0), Some(0));
        assert_eq!(spec.describe(&tickers()), vec!["NVDA outperforms AAPL by 20.00%"]);
    }

    #[test]
    fn test_unknown_ticker_named_in_error() {
        let input = ticker_keyed(vec![vec![("TSLA", dec!(1))]], vec![dec!(0.10)]);
        let err = parse_views(&input, &tickers()).unwrap_err().to_string();
        assert!(err.contains("TSLA"));
        assert!(err.contains("MSFT"));
    }

    #[test]
    fn test_empty_p_rejected() {
        let input = ViewInput::TickerKeyed { p: vec![], q: vec![dec!(0.1)] };
        let err = parse_views(&input, &tickers()).unwrap_err().to_string();
        assert!(err.contains("P matrix cannot be empty"));
    }

    #[test]
    fn test_empty_q_rejected() {
        let input = ticker_keyed(vec![vec![("AAPL", dec!(1))]], vec![]);
        let err = parse_views(&input, &tickers()).unwrap_err().to_string();
        assert!(err.contains("Q cannot be empty"));
    }

    #[test]
    fn test_row_count_mismatch() {
        let input = ticker_keyed(
            vec![vec![("AAPL", dec!(1))], vec![("MSFT", dec!(1))]],
            vec![dec!(0.1)],
        );
        assert!(parse_views(&input, &tickers()).is_err());
    }

    #[test]
    fn test_zero_row_rejected() {
        let input = ticker_keyed(vec![vec![("AAPL", dec!(0))]], vec![dec!(0.1)]);
        assert!(parse_views(&input, &tickers()).is_err());
    }

    // ------------------------------------------------------------------
    // 2. Index-keyed views
    // ------------------------------------------------------------------

    #[test]
    fn test_index_keyed_matches_ticker_keyed() {
        let by_index = ViewInput::IndexKeyed {
            p: vec![vec![dec!(1), dec!(-1), dec!(0)]],
            q: vec![dec!(0.20)],
        };
        let by_ticker = ticker_keyed(
            vec![vec![("NVDA", dec!(1)), ("AAPL", dec!(-1))]],
            vec![dec!(0.20)],
        );
        assert_eq!(
            parse_views(&by_index, &tickers()).unwrap(),
            parse_views(&by_ticker, &tickers()).unwrap()
        );
    }

    #[test]
    fn test_index_keyed_column_mismatch() {
        let input = ViewInput::IndexKeyed {
            p: vec![vec![dec!(1), dec!(-1)]],
            q: vec![dec!(0.20)],
        };
        let err = parse_views(&input, &tickers()).unwrap_err().to_string();
        assert!(err.contains("2 columns"));
        assert!(err.contains("3 tickers"));
    }

    // ------------------------------------------------------------------
    // 3. Legacy absolute dict
    // ------------------------------------------------------------------

    #[test]
    fn test_legacy_follows_ticker_order() {
        let mut views = BTreeMap::new();
        views.insert("MSFT".to_string(), dec!(0.05));
        views.insert("AAPL".to_string(), dec!(0.10));
        let spec = parse_views(&ViewInput::AbsoluteLegacy(views), &tickers()).unwrap();
        assert_eq!(spec.q, vec![dec!(0.10), dec!(0.05)]);
        assert_eq!(spec.p[0], vec![dec!(0), dec!(1), dec!(0)]);
        assert_eq!(spec.p[1], vec![dec!(0), dec!(0), dec!(1)]);
    }

    #[test]
    fn test_legacy_unreasonable_return() {
        let mut views = BTreeMap::new();
        views.insert("AAPL".to_string(), dec!(12));
        assert!(parse_views(&ViewInput::AbsoluteLegacy(views), &tickers()).is_err());
    }

    // ------------------------------------------------------------------
    // 4. JSON shapes
    // ------------------------------------------------------------------

    #[test]
    fn test_deserialize_shapes() {
        let a: ViewInput =
            serde_json::from_str(r#"{"P": [{"NVDA": 1, "AAPL": -1}], "Q": [0.2]}"#).unwrap();
        assert!(matches!(a, ViewInput::TickerKeyed { .. }));
        let b: ViewInput = serde_json::from_str(r#"{"P": [[1, -1, 0]], "Q": [0.2]}"#).unwrap();
        assert!(matches!(b, ViewInput::IndexKeyed { .. }));
        let c: ViewInput = serde_json::from_str(r#"{"AAPL": 0.1}"#).unwrap();
        assert!(matches!(c, ViewInput::AbsoluteLegacy(_)));
        assert_eq!(
            parse_views(&a, &tickers()).unwrap(),
            parse_views(&b, &tickers()).unwrap()
        );
    }

    #[test]
    fn test_describe_weighted_view() {
        let spec = ViewSpec {
            p: vec![vec![dec!(0.5), dec!(0.5), dec!(-1)]],
            q: vec![dec!(0.03)],
        };
        let d = spec.describe(&tickers());
        assert_eq!(d, vec!["0.5×NVDA + 0.5×AAPL + -1×MSFT = 3.00%"]);
    }
}
