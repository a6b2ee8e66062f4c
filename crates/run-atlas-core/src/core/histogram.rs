// crates/run-atlas-core/src/core/histogram.rs
// ============================================================================
// Module: Histogram Types
// Description: Equal-width binning requests, responses, and bin layout math.
// Purpose: Share bin edge and bucket clamping rules between backends.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Bins are equal width between the observed minimum and maximum. The last
//! bin is inclusive of the maximum; out-of-range indices are clamped so no
//! value is dropped. When every value is equal the width is 1.0.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::filter::FilterSpec;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default number of bins.
pub const DEFAULT_BIN_COUNT: u32 = 20;

/// Largest accepted number of bins.
pub const MAX_BIN_COUNT: u32 = 200;

// ============================================================================
// SECTION: Request / Response
// ============================================================================

/// Request for a histogram of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRequest {
    /// Field to bin, for example `metrics.accuracy`.
    pub field: String,
    /// Number of bins, 1 through 200.
    #[serde(default = "default_bin_count")]
    pub bin_count: u32,
    /// Optional filter.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
}

impl HistogramRequest {
    /// Creates a request without a filter.
    #[must_use]
    pub fn new(field: impl Into<String>, bin_count: u32) -> Self {
        Self {
            field: field.into(),
            bin_count,
            filter: None,
        }
    }

    /// Returns true when the bin count is within `1..=max`.
    #[must_use]
    pub const fn has_valid_bin_count(&self, max: u32) -> bool {
        self.bin_count >= 1 && self.bin_count <= max
    }
}

/// Serde default for [`HistogramRequest::bin_count`].
const fn default_bin_count() -> u32 {
    DEFAULT_BIN_COUNT
}

/// Histogram of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramResponse {
    /// Echo of the field.
    pub field: String,
    /// Bin edges, one more than the number of bins.
    pub bins: Vec<f64>,
    /// Count per bin.
    pub counts: Vec<u64>,
    /// Number of binned values.
    pub total: u64,
    /// Sample of run ids per bin (at most 100 each).
    pub run_ids_per_bin: Vec<Vec<String>>,
}

impl HistogramResponse {
    /// The degenerate histogram returned when no value matches.
    #[must_use]
    pub fn empty(field: &str) -> Self {
        Self {
            field: field.to_string(),
            bins: vec![0.0, 1.0],
            counts: vec![0],
            total: 0,
            run_ids_per_bin: vec![Vec::new()],
        }
    }
}

// ============================================================================
// SECTION: Bin Layout
// ============================================================================

/// Equal-width bin layout over `[min, min + width * bin_count]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinLayout {
    /// Lower edge of the first bin.
    pub min: f64,
    /// Width of every bin.
    pub width: f64,
    /// Number of bins.
    pub bin_count: u32,
}

impl BinLayout {
    /// Lays out `bin_count` bins over the observed range.
    ///
    /// A zero-width range uses width 1.0.
    #[must_use]
    pub fn new(min: f64, max: f64, bin_count: u32) -> Self {
        let bin_count = bin_count.max(1);
        let span = max - min;
        let width = if span > 0.0 { span / f64::from(bin_count) } else { 1.0 };
        Self { min, width, bin_count }
    }

    /// Upper edge of the last bin.
    #[must_use]
    pub fn upper(&self) -> f64 {
        self.min + self.width * f64::from(self.bin_count)
    }

    /// Returns the `bin_count + 1` bin edges.
    #[must_use]
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.bin_count).map(|index| self.min + f64::from(index) * self.width).collect()
    }

    /// Returns the zero-based bin of `value`, clamped into `[0, bin_count - 1]`.
    #[must_use]
    pub fn bucket(&self, value: f64) -> usize {
        let last = usize::try_from(self.bin_count.saturating_sub(1)).unwrap_or(usize::MAX);
        let offset = ((value - self.min) / self.width).floor();
        if offset.is_nan() || offset <= 0.0 {
            return 0;
        }
        // Saturating float-to-int conversion; clamped below.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "Clamped to the bin range.")]
        let index = offset as usize;
        index.min(last)
    }

    /// Clamps a one-based SQL `width_bucket` index into a zero-based bin.
    #[must_use]
    pub fn clamp_sql_bucket(&self, bucket: i64) -> usize {
        let last = i64::from(self.bin_count) - 1;
        let index = (bucket - 1).clamp(0, last.max(0));
        usize::try_from(index).unwrap_or(0)
    }
}
