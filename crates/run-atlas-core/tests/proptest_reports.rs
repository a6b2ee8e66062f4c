// crates/run-atlas-core/tests/proptest_reports.rs
// ============================================================================
// Module: Report Property-Based Tests
// Description: Property tests for histogram and aggregate invariants.
// Purpose: Check bin layout and grouping invariants across wide inputs.
// ============================================================================

//! Property-based tests for report invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use proptest::prelude::*;
use run_atlas_core::AggregateRequest;
use run_atlas_core::HistogramRequest;
use run_atlas_core::RunResponse;
use run_atlas_core::core::histogram::BinLayout;
use run_atlas_core::runtime::fallback::aggregate_runs;
use run_atlas_core::runtime::fallback::histogram_runs;
use serde_json::json;

use crate::common::RunBuilder;

/// Builds one run per value with a `metrics.v` metric and a `params.g` group.
fn runs_for(values: &[f64]) -> Vec<RunResponse> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            RunBuilder::new(&format!("run-{index:04}"), "exp")
                .param("g", json!(index % 3))
                .metric("v", json!(value))
                .build()
        })
        .collect()
}

proptest! {
    #[test]
    fn histogram_counts_cover_every_value(
        values in prop::collection::vec(-1.0e6_f64 .. 1.0e6, 1 .. 60),
        bin_count in 1_u32 ..= 200,
    ) {
        let runs = runs_for(&values);
        let response = histogram_runs(&runs, &HistogramRequest::new("metrics.v", bin_count));
        prop_assert_eq!(response.bins.len(), usize::try_from(bin_count).unwrap() + 1);
        prop_assert_eq!(response.counts.len(), usize::try_from(bin_count).unwrap());
        prop_assert_eq!(response.counts.iter().sum::<u64>(), response.total);
        prop_assert_eq!(response.total, u64::try_from(values.len()).unwrap());
        prop_assert!(response.bins.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn bucket_index_stays_in_range(
        min in -1.0e3_f64 .. 1.0e3,
        span in 0.0_f64 .. 1.0e3,
        bin_count in 1_u32 ..= 200,
        probe in -1.0e4_f64 .. 1.0e4,
        sql_bucket in -10_i64 .. 300,
    ) {
        let layout = BinLayout::new(min, min + span, bin_count);
        let last = usize::try_from(bin_count).unwrap() - 1;
        prop_assert!(layout.bucket(probe) <= last);
        prop_assert!(layout.clamp_sql_bucket(sql_bucket) <= last);
    }

    #[test]
    fn aggregate_point_sizes_sum_to_numeric_runs(
        values in prop::collection::vec(-1.0e3_f64 .. 1.0e3, 0 .. 40),
    ) {
        let runs = runs_for(&values);
        let mut request = AggregateRequest::new("params.g", "metrics.v");
        request.group_by = vec!["params.g".to_string()];
        let response = aggregate_runs(&runs, &request);
        let total: u64 = response.series.iter().flat_map(|series| &series.points).map(|point| point.n).sum();
        prop_assert_eq!(total, u64::try_from(values.len()).unwrap());
        for series in &response.series {
            for point in &series.points {
                prop_assert!(point.y_min <= point.y_median + 1e-9 && point.y_median <= point.y_max + 1e-9);
            }
        }
    }
}
