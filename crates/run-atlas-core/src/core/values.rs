// crates/run-atlas-core/src/core/values.rs
// ============================================================================
// Module: Field Values and Structured Results
// Description: Raw per-field value extraction and stored structured results.
// Purpose: Feed client-side plotting and expose captured result payloads.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Field values are returned column-wise, one list per requested field, in the
//! same row order as the optional run id list. Large result sets are sampled
//! reproducibly from a seed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::filter::FilterSpec;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Largest number of fields per request.
pub const MAX_VALUE_FIELDS: usize = 10;

/// Default number of returned points.
pub const DEFAULT_MAX_POINTS: u32 = 10_000;

/// Largest number of returned points.
pub const MAX_POINTS_LIMIT: u32 = 50_000;

/// Sampling seed used when the request has none.
pub const DEFAULT_SAMPLE_SEED: i64 = 42;

// ============================================================================
// SECTION: Field Values
// ============================================================================

/// Request for raw field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValuesRequest {
    /// Optional filter.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    /// Field paths to extract (1 through 10).
    pub fields: Vec<String>,
    /// Maximum points returned before sampling kicks in.
    #[serde(default = "default_max_points")]
    pub max_points: u32,
    /// Whether to return the run id of every row.
    #[serde(default = "default_include_run_ids")]
    pub include_run_ids: bool,
    /// Sampling seed.
    #[serde(default)]
    pub seed: Option<i64>,
}

impl FieldValuesRequest {
    /// Creates a request for the given fields with default limits.
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            filter: None,
            fields,
            max_points: DEFAULT_MAX_POINTS,
            include_run_ids: true,
            seed: None,
        }
    }

    /// Returns a description of the first violated request limit.
    #[must_use]
    pub fn violation(&self) -> Option<String> {
        if self.fields.is_empty() || self.fields.len() > MAX_VALUE_FIELDS {
            return Some(format!("fields must contain 1 to {MAX_VALUE_FIELDS} entries"));
        }
        if self.max_points == 0 || self.max_points > MAX_POINTS_LIMIT {
            return Some(format!("max_points must be between 1 and {MAX_POINTS_LIMIT}"));
        }
        None
    }

    /// Returns the sampling seed mapped into `[0, 1)` for `setseed`.
    #[must_use]
    pub fn normalized_seed(&self) -> f64 {
        let seed = self.seed.unwrap_or(DEFAULT_SAMPLE_SEED).rem_euclid(10_000);
        // Exact: the remainder is below 10_000.
        #[allow(clippy::cast_precision_loss, reason = "Remainder is far below 2^52.")]
        let seed = seed as f64;
        seed / 10_000.0
    }

    /// Returns an empty response shaped like this request.
    #[must_use]
    pub fn empty_response(&self) -> FieldValuesResponse {
        FieldValuesResponse {
            fields: self.fields.iter().map(|field| (field.clone(), Vec::new())).collect(),
            run_ids: self.include_run_ids.then(Vec::new),
            total: 0,
            returned: 0,
            sampled: false,
        }
    }
}

/// Serde default for [`FieldValuesRequest::max_points`].
const fn default_max_points() -> u32 {
    DEFAULT_MAX_POINTS
}

/// Serde default for [`FieldValuesRequest::include_run_ids`].
const fn default_include_run_ids() -> bool {
    true
}

/// Raw field values keyed by field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValuesResponse {
    /// One value list per field; numbers when numeric, else text or null.
    pub fields: BTreeMap<String, Vec<Value>>,
    /// Run ids in row order.
    #[serde(default)]
    pub run_ids: Option<Vec<String>>,
    /// Matching runs before sampling.
    pub total: u64,
    /// Rows returned.
    pub returned: u64,
    /// Whether rows were sampled.
    pub sampled: bool,
}

/// Converts a stored value rendered as text into a plot value.
///
/// Finite numbers become JSON numbers, other text stays text, and absent
/// values become null.
#[must_use]
pub fn plot_value(text: Option<&str>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| Value::from(text), Value::Number)
}

// ============================================================================
// SECTION: Structured Results
// ============================================================================

/// Structured result captured by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Result name, unique per run.
    pub name: String,
    /// JSON payload.
    pub data: Value,
    /// Element type label.
    #[serde(default)]
    pub dtype: Option<String>,
    /// Array shape.
    #[serde(default)]
    pub shape: Option<Vec<i64>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}
