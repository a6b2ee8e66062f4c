// crates/run-atlas-core/src/runtime/stats.rs
// ============================================================================
// Module: Summary Statistics
// Description: Error bar models, t-table lookup, and percentile math.
// Purpose: Shared statistics for SQL-computed and in-memory aggregates.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Error bounds are derived post hoc from a center value, the sample standard
//! deviation, and the sample size. Bounds are absent for fewer than two
//! values. Percentiles use linear interpolation between closest ranks, the
//! same definition as a continuous percentile aggregate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::aggregate::AggFn;
use crate::core::aggregate::ErrorBarType;

// ============================================================================
// SECTION: T-Table
// ============================================================================

/// Two-sided 95% t critical values by degrees of freedom.
const T_TABLE_95: [(u64, f64); 14] = [
    (1, 12.71),
    (2, 4.30),
    (3, 3.18),
    (4, 2.78),
    (5, 2.57),
    (6, 2.45),
    (7, 2.36),
    (8, 2.31),
    (9, 2.26),
    (10, 2.23),
    (15, 2.13),
    (20, 2.09),
    (25, 2.06),
    (30, 2.04),
];

/// Large-sample normal critical value.
pub const Z_95: f64 = 1.96;

/// Returns the 95% t value for `df` degrees of freedom.
///
/// Missing entries use the nearest higher tabulated df; beyond 30 the normal
/// value 1.96 is used.
#[must_use]
pub fn t_value_95(df: u64) -> f64 {
    T_TABLE_95.iter().find(|(entry, _)| *entry >= df).map_or(Z_95, |(_, value)| *value)
}

/// Returns the critical value used for a 95% interval over `n` samples.
#[must_use]
pub fn ci95_multiplier(n: u64) -> f64 {
    if n > 30 { Z_95 } else { t_value_95(n.saturating_sub(1)) }
}

// ============================================================================
// SECTION: Error Bounds
// ============================================================================

/// Returns `(low, high)` error bounds around `center`.
///
/// `std` is the sample standard deviation. Bounds are `None` when `n < 2`,
/// when no error bars are requested, or when `std` is unavailable.
#[must_use]
pub fn error_bounds(kind: ErrorBarType, center: f64, std: Option<f64>, n: u64) -> (Option<f64>, Option<f64>) {
    if n < 2 {
        return (None, None);
    }
    let Some(std) = std.filter(|value| value.is_finite()) else {
        return (None, None);
    };
    let root_n = count_as_f64(n).sqrt();
    let margin = match kind {
        ErrorBarType::None => return (None, None),
        ErrorBarType::Std => std,
        ErrorBarType::Sem => std / root_n,
        ErrorBarType::Ci95 => ci95_multiplier(n) * std / root_n,
    };
    (Some(center - margin), Some(center + margin))
}

/// Converts a sample count to `f64`.
#[allow(clippy::cast_precision_loss, reason = "Sample counts stay far below 2^52.")]
fn count_as_f64(n: u64) -> f64 {
    n as f64
}

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Summary of a set of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Number of values.
    pub n: u64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation (`n - 1`), absent for fewer than two values.
    pub std: Option<f64>,
    /// Minimum.
    pub min: f64,
    /// Maximum.
    pub max: f64,
    /// Sum.
    pub sum: f64,
    /// 25th percentile.
    pub q1: f64,
    /// 50th percentile.
    pub median: f64,
    /// 75th percentile.
    pub q3: f64,
}

impl Summary {
    /// Summarizes values. Returns `None` for an empty slice.
    #[must_use]
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = u64::try_from(sorted.len()).unwrap_or(u64::MAX);
        let count = count_as_f64(n);
        let sum: f64 = sorted.iter().sum();
        let mean = sum / count;
        let std = (n >= 2).then(|| {
            let squares: f64 = sorted.iter().map(|value| (value - mean).powi(2)).sum();
            (squares / (count - 1.0)).sqrt()
        });
        Some(Self {
            n,
            mean,
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            sum,
            q1: percentile(&sorted, 0.25),
            median: percentile(&sorted, 0.5),
            q3: percentile(&sorted, 0.75),
        })
    }

    /// Returns the value of an aggregation function over this summary.
    #[must_use]
    pub fn aggregate(&self, agg_fn: AggFn) -> f64 {
        aggregate_value(agg_fn, self.n, self.mean, self.median, self.min, self.max, self.sum)
    }
}

/// Selects the aggregated value for `agg_fn` from precomputed statistics.
#[must_use]
pub fn aggregate_value(agg_fn: AggFn, n: u64, mean: f64, median: f64, min: f64, max: f64, sum: f64) -> f64 {
    match agg_fn {
        AggFn::Mean => mean,
        AggFn::Median => median,
        AggFn::Min => min,
        AggFn::Max => max,
        AggFn::Count => count_as_f64(n),
        AggFn::Sum => sum,
    }
}

/// Continuous percentile of sorted values by linear interpolation.
///
/// `fraction` is clamped into `[0, 1]`. Returns `NaN` for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return f64::NAN;
    };
    let rank = fraction.clamp(0.0, 1.0) * index_as_f64(last);
    let lower = rank.floor();
    let weight = rank - lower;
    let lower_index = float_to_index(lower).min(last);
    let upper_index = (lower_index + 1).min(last);
    let low = sorted[lower_index];
    let high = sorted[upper_index];
    low + (high - low) * weight
}

/// Converts a slice index to `f64`.
#[allow(clippy::cast_precision_loss, reason = "Slice indices stay far below 2^52.")]
fn index_as_f64(index: usize) -> f64 {
    index as f64
}

/// Converts a non-negative whole float back into an index.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Input is a non-negative whole number bounded by a slice length."
)]
fn float_to_index(value: f64) -> usize {
    value as usize
}

// ============================================================================
// SECTION: Tests
// ============================================================================
