use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::parser::ViewSpec;
use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Confidence used for every view when the caller supplies none.
pub const DEFAULT_CONFIDENCE: Decimal = dec!(0.5);

/// A single confidence as supplied: a number (`0.7`, `70`) or a string
/// (`"70%"`, `"0.7"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfidenceValue {
    Number(Decimal),
    Text(String),
}

/// Confidence payload: one value for all views, one per view, or (legacy)
/// one per ticker of an absolute view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfidenceInput {
    Uniform(ConfidenceValue),
    PerView(Vec<ConfidenceValue>),
    PerTicker(BTreeMap<String, ConfidenceValue>),
}

impl From<Decimal> for ConfidenceValue {
    fn from(v: Decimal) -> Self {
        ConfidenceValue::Number(v)
    }
}

impl From<&str> for ConfidenceValue {
    fn from(v: &str) -> Self {
        ConfidenceValue::Text(v.to_string())
    }
}

/// Map a raw confidence onto (0, 1].
///
/// Values in (0, 1] are taken as fractions, values in [5, 100] as
/// percentages. The band (1, 5) is ambiguous and rejected, as are zero,
/// negatives and anything above 100. A trailing `%` forces the percentage
/// reading.
pub fn normalize_confidence_value(value: &ConfidenceValue, field: &str) -> PortfolioResult<Decimal> {
    match value {
        ConfidenceValue::Number(v) => normalize_number(*v, field),
        ConfidenceValue::Text(raw) => {
            let trimmed = raw.trim();
            if let Some(stripped) = trimmed.strip_suffix('%') {
                let v = Decimal::from_str(stripped.trim()).map_err(|_| unparsable(raw, field))?;
                if v <= Decimal::ZERO || v > dec!(100) {
                    return Err(PortfolioError::invalid(
                        field,
                        format!(
                            "Confidence '{}' must be a percentage in (0%, 100%], e.g. \"70%\"",
                            raw
                        ),
                    ));
                }
                Ok(v / dec!(100))
            } else {
                let v = Decimal::from_str(trimmed).map_err(|_| unparsable(raw, field))?;
                normalize_number(v, field)
            }
        }
    }
}

fn normalize_number(v: Decimal, field: &str) -> PortfolioResult<Decimal> {
    if v <= Decimal::ZERO {
        return Err(PortfolioError::invalid(
            field,
            format!(
                "Confidence {} must be positive; a view with no confidence should be \
                 omitted. Use 0.7 or 70 for 70%",
                v
            ),
        ));
    }
    if v <= Decimal::ONE {
        return Ok(v);
    }
    if v < dec!(5) {
        return Err(PortfolioError::invalid(
            field,
            format!(
                "Confidence {} is ambiguous; use a fraction in (0, 1] such as 0.7 \
                 or a percentage in [5, 100] such as 70",
                v
            ),
        ));
    }
    if v <= dec!(100) {
        return Ok(v / dec!(100));
    }
    Err(PortfolioError::invalid(
        field,
        format!("Confidence {} exceeds 100%; use 0.7 or 70 for 70%", v),
    ))
}

fn unparsable(raw: &str, field: &str) -> PortfolioError {
    PortfolioError::invalid(
        field,
        format!("Cannot parse confidence '{}'; use 0.7, 70 or \"70%\"", raw),
    )
}

/// Resolve the confidence payload into one value in (0, 1] per view.
pub fn normalize_confidence(
    input: Option<&ConfidenceInput>,
    views: &ViewSpec,
    tickers: &[String],
) -> PortfolioResult<Vec<Decimal>> {
    let k = views.len();
    match input {
        None => Ok(vec![DEFAULT_CONFIDENCE; k]),
        Some(ConfidenceInput::Uniform(value)) => {
            let c = normalize_confidence_value(value, "view_confidences")?;
            Ok(vec![c; k])
        }
        Some(ConfidenceInput::PerView(values)) => {
            if values.len() != k {
                return Err(PortfolioError::invalid(
                    "view_confidences",
                    format!(
                        "Got {} confidences for {} views; supply one per view, \
                         a single value for all, or omit for the default 50%",
                        values.len(),
                        k
                    ),
                ));
            }
            values
                .iter()
                .enumerate()
                .map(|(i, v)| normalize_confidence_value(v, &format!("view_confidences[{}]", i)))
                .collect()
        }
        Some(ConfidenceInput::PerTicker(map)) => {
            let mut out = Vec::with_capacity(k);
            let mut used = Vec::with_capacity(k);
            for view in 0..k {
                let j = views.single_asset(view).ok_or_else(|| {
                    PortfolioError::invalid(
                        "view_confidences",
                        format!(
                            "Per-ticker confidences only apply to absolute views; \
                             view {} is relative, supply a list with one confidence per view",
                            view
                        ),
                    )
                })?;
                let ticker = &tickers[j];
                let value = map.get(ticker).ok_or_else(|| {
                    PortfolioError::invalid(
                        "view_confidences",
                        format!("Missing confidence for view on {}", ticker),
                    )
                })?;
                out.push(normalize_confidence_value(
                    value,
                    &format!("view_confidences.{}", ticker),
                )?);
                used.push(ticker.as_str());
            }
            if let Some(extra) = map.keys().find(|t| !used.contains(&t.as_str())) {
                return Err(PortfolioError::invalid(
                    "view_confidences",
                    format!("Confidence given for {} but there is no view on it", extra),
                ));
            }
            Ok(out)
        }
    }
}
