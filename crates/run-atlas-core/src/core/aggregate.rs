// crates/run-atlas-core/src/core/aggregate.rs
// ============================================================================
// Module: Aggregation Types
// Description: Grouped statistics requests and named plot series.
// Purpose: Define the aggregation wire format shared by every backend.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An aggregation groups runs by optional `group_by` fields into named series,
//! then by the x field into points. Each point carries the chosen aggregate,
//! optional error bounds, quartiles, and a bounded sample of run ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::core::filter::FilterSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator joining multi-field group keys.
pub const GROUP_KEY_SEPARATOR: &str = " | ";

/// Series name used when no `group_by` fields are given.
pub const DEFAULT_SERIES_NAME: &str = "all";

/// Largest number of run ids carried per point or histogram bin.
pub const MAX_SAMPLE_RUN_IDS: usize = 100;

// ============================================================================
// SECTION: Request
// ============================================================================

/// Aggregation function applied per point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    /// Arithmetic mean.
    #[default]
    Mean,
    /// Continuous 50th percentile.
    Median,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Number of values.
    Count,
    /// Sum.
    Sum,
}

/// Error bar model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBarType {
    /// No error bars.
    #[default]
    None,
    /// Center plus or minus the sample standard deviation.
    Std,
    /// Center plus or minus the standard error of the mean.
    Sem,
    /// Center plus or minus the 95% confidence margin.
    Ci95,
}

/// Request for aggregated plot data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// X-axis field, for example `params.dim`.
    pub x_field: String,
    /// Y-axis field, for example `metrics.score`.
    pub y_field: String,
    /// Fields whose values split runs into series.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Aggregation function.
    #[serde(default)]
    pub agg_fn: AggFn,
    /// Error bar model.
    #[serde(default)]
    pub error_bars: ErrorBarType,
    /// Optional filter.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

impl AggregateRequest {
    /// Creates a request with default aggregation settings.
    #[must_use]
    pub fn new(x_field: impl Into<String>, y_field: impl Into<String>) -> Self {
        Self {
            x_field: x_field.into(),
            y_field: y_field.into(),
            group_by: Vec::new(),
            agg_fn: AggFn::default(),
            error_bars: ErrorBarType::default(),
            filter: None,
        }
    }
}

// ============================================================================
// SECTION: Response
// ============================================================================

/// X coordinate of a point: numeric when the grouped value parses as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XValue {
    /// Finite number.
    Number(f64),
    /// Any other value rendered as text.
    Text(String),
}

impl XValue {
    /// Classifies a grouped value rendered as text.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(number) if number.is_finite() && !text.trim().is_empty() => Self::Number(number),
            _ => Self::Text(text.to_string()),
        }
    }

    /// Orders numbers before text, numbers numerically and text lexically.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left.total_cmp(right),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
        }
    }
}

/// One aggregated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// X coordinate.
    pub x: XValue,
    /// Aggregated y value.
    pub y: f64,
    /// Lower error bound.
    #[serde(default)]
    pub y_low: Option<f64>,
    /// Upper error bound.
    #[serde(default)]
    pub y_high: Option<f64>,
    /// Number of values aggregated.
    pub n: u64,
    /// Contributing run ids, truncated to 100.
    #[serde(default)]
    pub run_ids: Vec<String>,
    /// Minimum y.
    pub y_min: f64,
    /// 25th percentile of y.
    pub y_q1: f64,
    /// Median of y.
    pub y_median: f64,
    /// 75th percentile of y.
    pub y_q3: f64,
    /// Maximum y.
    pub y_max: f64,
}

/// A named series of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Group key, or `all` without grouping.
    pub name: String,
    /// Points ordered by x.
    pub points: Vec<DataPoint>,
}

/// Aggregated plot data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    /// Series ordered by name.
    pub series: Vec<Series>,
    /// Echo of the x field.
    pub x_field: String,
    /// Echo of the y field.
    pub y_field: String,
}

impl AggregateResponse {
    /// Builds a response, ordering series by name and points by x.
    #[must_use]
    pub fn from_series(request: &AggregateRequest, mut series: Vec<Series>) -> Self {
        series.sort_by(|left, right| left.name.cmp(&right.name));
        for entry in &mut series {
            entry.points.sort_by(|left, right| left.x.compare(&right.x));
        }
        Self {
            series,
            x_field: request.x_field.clone(),
            y_field: request.y_field.clone(),
        }
    }
}

/// Joins per-field group values into a series name.
///
/// A single field uses its bare value; an empty list yields `all`.
#[must_use]
pub fn group_key(parts: &[String]) -> String {
    if parts.is_empty() {
        DEFAULT_SERIES_NAME.to_string()
    } else {
        parts.join(GROUP_KEY_SEPARATOR)
    }
}
