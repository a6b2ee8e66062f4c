// crates/run-atlas-store-postgres/src/aggregate.rs
// ============================================================================
// Module: Aggregation Engine
// Description: Grouped statistics computed in one SQL statement.
// Purpose: Serve plot series without moving runs out of the database.
// Dependencies: postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! A CTE projects the group values, the x value as text, the y value as a
//! guarded number and the run id. The outer query groups by (groups, x) and
//! returns every statistic a point needs, so the agg function and the error
//! bar model are applied on the Rust side without a second round trip.
//! Rows with a null x or a non-numeric y are excluded before grouping; a
//! missing group value renders as the empty string.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use postgres::Client;
use postgres::Row;
use run_atlas_core::AggregateRequest;
use run_atlas_core::AggregateResponse;
use run_atlas_core::DataPoint;
use run_atlas_core::FieldRef;
use run_atlas_core::Series;
use run_atlas_core::XValue;
use run_atlas_core::core::aggregate::MAX_SAMPLE_RUN_IDS;
use run_atlas_core::core::aggregate::group_key;
use run_atlas_core::runtime::stats::aggregate_value;
use run_atlas_core::runtime::stats::error_bounds;
use tracing::debug;

use crate::error::PostgresStoreError;
use crate::filter::CompileContext;
use crate::filter::compile_filter_spec;
use crate::filter::numeric_expr;
use crate::filter::runs_from;
use crate::filter::text_expr;
use crate::params::SqlParams;
use crate::scope::Scope;
use crate::scope::ScopeError;

// ============================================================================
// SECTION: Statement
// ============================================================================

/// A compiled aggregation statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStatement {
    /// SQL text.
    pub sql: String,
    /// Bound parameters.
    pub params: SqlParams,
    /// Number of leading group columns in each row.
    pub group_columns: usize,
}

/// Compiles an aggregation request.
///
/// Returns `Ok(None)` when the x or y field cannot be read.
///
/// # Errors
///
/// Returns [`ScopeError::Empty`] for an empty scope.
pub fn build_aggregate(scope: &Scope, request: &AggregateRequest) -> Result<Option<AggregateStatement>, ScopeError> {
    let fields = request.group_by.iter().map(String::as_str).chain([request.x_field.as_str(), request.y_field.as_str()]);
    let ctx = CompileContext::for_fields(fields, request.filter.as_ref());
    let (Some(x), Some(y)) = (
        text_expr(&FieldRef::parse(&request.x_field), ctx),
        numeric_expr(&FieldRef::parse(&request.y_field), ctx),
    ) else {
        return Ok(None);
    };
    let from = runs_from(scope, ctx)?;
    let mut params = SqlParams::new();
    let filter = compile_filter_spec(request.filter.as_ref(), ctx, &mut params).render();

    let mut projected = Vec::with_capacity(request.group_by.len() + 3);
    let mut group_names = Vec::with_capacity(request.group_by.len());
    for (index, field) in request.group_by.iter().enumerate() {
        let expr = text_expr(&FieldRef::parse(field), ctx).unwrap_or_else(|| "NULL::text".to_string());
        projected.push(format!("COALESCE({expr}, '') AS g{index}"));
        group_names.push(format!("g{index}"));
    }
    projected.push(format!("{x} AS x"));
    projected.push(format!("{y} AS y"));
    projected.push("r.run_id::text AS run_id".to_string());

    let mut keys = group_names.clone();
    keys.push("x".to_string());
    let keys = keys.join(", ");
    let sql = format!(
        "WITH pts AS (SELECT {} FROM {from} {filter}) \
         SELECT {keys}, COUNT(*)::bigint, AVG(y)::float8, STDDEV_SAMP(y)::float8, MIN(y)::float8, MAX(y)::float8, \
         SUM(y)::float8, percentile_cont(0.25) WITHIN GROUP (ORDER BY y)::float8, \
         percentile_cont(0.5) WITHIN GROUP (ORDER BY y)::float8, \
         percentile_cont(0.75) WITHIN GROUP (ORDER BY y)::float8, \
         (array_agg(run_id ORDER BY run_id))[1:{MAX_SAMPLE_RUN_IDS}] \
         FROM pts WHERE x IS NOT NULL AND y IS NOT NULL GROUP BY {keys}",
        projected.join(", ")
    );
    Ok(Some(AggregateStatement {
        sql,
        params,
        group_columns: group_names.len(),
    }))
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Computes grouped statistics in the database.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn aggregate(
    client: &mut Client,
    scope: &Scope,
    request: &AggregateRequest,
) -> Result<AggregateResponse, PostgresStoreError> {
    if scope.is_empty() {
        return Ok(AggregateResponse::from_series(request, Vec::new()));
    }
    let Some(statement) = build_aggregate(scope, request)? else {
        debug!(x = %request.x_field, y = %request.y_field, "aggregate fields unreadable");
        return Ok(AggregateResponse::from_series(request, Vec::new()));
    };
    let rows = client.query(&statement.sql, &statement.params.refs())?;
    let mut groups: BTreeMap<String, Vec<DataPoint>> = BTreeMap::new();
    for row in &rows {
        let (name, point) = point_from_row(row, statement.group_columns, request)?;
        groups.entry(name).or_default().push(point);
    }
    debug!(rows = rows.len(), series = groups.len(), "aggregate computed");
    let series = groups.into_iter().map(|(name, points)| Series { name, points }).collect();
    Ok(AggregateResponse::from_series(request, series))
}

/// Decodes one grouped row into its series name and point.
fn point_from_row(
    row: &Row,
    group_columns: usize,
    request: &AggregateRequest,
) -> Result<(String, DataPoint), PostgresStoreError> {
    let mut parts = Vec::with_capacity(group_columns);
    for index in 0..group_columns {
        parts.push(row.try_get::<_, Option<String>>(index)?.unwrap_or_default());
    }
    let base = group_columns;
    let x: String = row.try_get(base)?;
    let count: i64 = row.try_get(base + 1)?;
    let n = u64::try_from(count).unwrap_or_default();
    let mean: f64 = row.try_get(base + 2)?;
    let std: Option<f64> = row.try_get(base + 3)?;
    let min: f64 = row.try_get(base + 4)?;
    let max: f64 = row.try_get(base + 5)?;
    let sum: f64 = row.try_get(base + 6)?;
    let q1: f64 = row.try_get(base + 7)?;
    let median: f64 = row.try_get(base + 8)?;
    let q3: f64 = row.try_get(base + 9)?;
    let run_ids: Option<Vec<String>> = row.try_get(base + 10)?;
    let y = aggregate_value(request.agg_fn, n, mean, median, min, max, sum);
    let (y_low, y_high) = error_bounds(request.error_bars, y, std, n);
    Ok((
        group_key(&parts),
        DataPoint {
            x: XValue::from_text(&x),
            y,
            y_low,
            y_high,
            n,
            run_ids: run_ids.unwrap_or_default(),
            y_min: min,
            y_q1: q1,
            y_median: median,
            y_q3: q3,
            y_max: max,
        },
    ))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
