//! Investor views: shape-polymorphic input resolved once into a canonical
//! picking matrix `P`, view-return vector `Q` and per-view confidences.

pub mod confidence;
pub mod parser;

pub use confidence::{normalize_confidence, normalize_confidence_value, ConfidenceInput, ConfidenceValue};
pub use parser::{parse_views, ViewInput, ViewSpec};
