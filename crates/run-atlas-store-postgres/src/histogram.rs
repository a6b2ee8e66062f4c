// crates/run-atlas-store-postgres/src/histogram.rs
// ============================================================================
// Module: Histogram Engine
// Description: Equal-width histograms via a stats query and width_bucket.
// Purpose: Bin numeric fields without materializing runs in the process.
// Dependencies: postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! The first statement reads min, max and count of the numeric field. The
//! layout is fixed from those; the second statement assigns each value with
//! `width_bucket` over `[min, upper]`. Postgres returns `bin_count + 1` for
//! values equal to the upper edge, so buckets are clamped into range and
//! merged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use run_atlas_core::FieldRef;
use run_atlas_core::HistogramRequest;
use run_atlas_core::HistogramResponse;
use run_atlas_core::core::aggregate::MAX_SAMPLE_RUN_IDS;
use run_atlas_core::core::histogram::BinLayout;
use tracing::debug;

use crate::error::PostgresStoreError;
use crate::filter::CompileContext;
use crate::filter::compile_filter_spec;
use crate::filter::numeric_expr;
use crate::filter::runs_from;
use crate::params::SqlParam;
use crate::params::SqlParams;
use crate::scope::Scope;
use crate::scope::ScopeError;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Stats and bucket statements of one histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStatements {
    /// Values CTE shared by both statements.
    values_cte: String,
    /// Parameters of the values CTE.
    pub params: SqlParams,
}

impl HistogramStatements {
    /// Statement returning `(min, max, count)`.
    #[must_use]
    pub fn stats_sql(&self) -> String {
        format!("{} SELECT MIN(v)::float8, MAX(v)::float8, COUNT(*)::bigint FROM vals", self.values_cte)
    }

    /// Statement returning `(bucket, count, run ids)`; the layout is bound
    /// after the filter parameters. The bin count is bound as a bigint and
    /// narrowed in SQL, since the driver only encodes `i64` as `int8`.
    #[must_use]
    pub fn bucket_sql(&self) -> String {
        let first = self.params.next_index();
        format!(
            "{} SELECT width_bucket(v, ${first}::float8, ${}::float8, ${}::bigint::int)::bigint AS bucket, COUNT(*)::bigint, \
             (array_agg(run_id ORDER BY run_id))[1:{MAX_SAMPLE_RUN_IDS}] FROM vals GROUP BY bucket",
            self.values_cte,
            first + 1,
            first + 2
        )
    }

    /// Filter parameters followed by the layout placeholders of [`Self::bucket_sql`].
    #[must_use]
    pub fn bucket_params(&self, layout: &BinLayout) -> SqlParams {
        let mut bound = self.params.clone();
        bound.extend(vec![
            SqlParam::Float(layout.min),
            SqlParam::Float(layout.upper()),
            SqlParam::Int(i64::from(layout.bin_count)),
        ]);
        bound
    }
}

/// Compiles the statements of a histogram.
///
/// Returns `Ok(None)` when the field cannot be read.
///
/// # Errors
///
/// Returns [`ScopeError::Empty`] for an empty scope.
pub fn build_histogram(scope: &Scope, request: &HistogramRequest) -> Result<Option<HistogramStatements>, ScopeError> {
    let ctx = CompileContext::for_fields([request.field.as_str()], request.filter.as_ref());
    let Some(value) = numeric_expr(&FieldRef::parse(&request.field), ctx) else {
        return Ok(None);
    };
    let from = runs_from(scope, ctx)?;
    let mut params = SqlParams::new();
    let mut clause = compile_filter_spec(request.filter.as_ref(), ctx, &mut params);
    clause.push(format!("{value} IS NOT NULL"));
    Ok(Some(HistogramStatements {
        values_cte: format!(
            "WITH vals AS (SELECT {value} AS v, r.run_id::text AS run_id FROM {from} {})",
            clause.render()
        ),
        params,
    }))
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Computes an equal-width histogram in the database.
///
/// # Errors
///
/// Returns [`PostgresStoreError::Invalid`] when the bin count is outside
/// `1..=max_bins`, or another [`PostgresStoreError`] when a statement fails.
pub fn histogram(
    client: &mut Client,
    scope: &Scope,
    request: &HistogramRequest,
    max_bins: u32,
) -> Result<HistogramResponse, PostgresStoreError> {
    if !request.has_valid_bin_count(max_bins) {
        return Err(PostgresStoreError::Invalid(format!("bin_count must be between 1 and {max_bins}")));
    }
    if scope.is_empty() {
        return Ok(HistogramResponse::empty(&request.field));
    }
    let Some(statements) = build_histogram(scope, request)? else {
        return Ok(HistogramResponse::empty(&request.field));
    };
    let stats = client.query_one(&statements.stats_sql(), &statements.params.refs())?;
    let (Some(min), Some(max)) = (stats.try_get::<_, Option<f64>>(0)?, stats.try_get::<_, Option<f64>>(1)?) else {
        return Ok(HistogramResponse::empty(&request.field));
    };
    let total: i64 = stats.try_get(2)?;
    let layout = BinLayout::new(min, max, request.bin_count);

    let bound = statements.bucket_params(&layout);
    let bins = layout.edges();
    let mut counts = vec![0_u64; bins.len() - 1];
    let mut run_ids_per_bin: Vec<Vec<String>> = vec![Vec::new(); counts.len()];
    for row in client.query(&statements.bucket_sql(), &bound.refs())? {
        let bucket: Option<i64> = row.try_get(0)?;
        let index = layout.clamp_sql_bucket(bucket.unwrap_or(1));
        let count: i64 = row.try_get(1)?;
        counts[index] += u64::try_from(count).unwrap_or_default();
        let run_ids: Option<Vec<String>> = row.try_get(2)?;
        run_ids_per_bin[index].extend(run_ids.unwrap_or_default());
    }
    for run_ids in &mut run_ids_per_bin {
        run_ids.sort();
        run_ids.truncate(MAX_SAMPLE_RUN_IDS);
    }
    debug!(field = %request.field, total, bins = counts.len(), "histogram computed");
    Ok(HistogramResponse {
        field: request.field.clone(),
        bins,
        counts,
        total: u64::try_from(total).unwrap_or_default(),
        run_ids_per_bin,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
