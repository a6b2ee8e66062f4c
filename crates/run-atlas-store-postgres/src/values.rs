// crates/run-atlas-store-postgres/src/values.rs
// ============================================================================
// Module: Field Values
// Description: Raw per-field value extraction with seeded sampling.
// Purpose: Feed client-side plots without server-side binning or grouping.
// Dependencies: postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! The match count decides whether rows are sampled. Sampling seeds the
//! session generator with `setseed` and orders by `random()` on the same
//! connection, so a fixed seed over unchanged data returns the same rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use run_atlas_core::FieldRef;
use run_atlas_core::FieldValuesRequest;
use run_atlas_core::FieldValuesResponse;
use run_atlas_core::core::values::plot_value;
use tracing::debug;

use crate::error::PostgresStoreError;
use crate::filter::CompileContext;
use crate::filter::compile_filter_spec;
use crate::filter::runs_from;
use crate::filter::text_expr;
use crate::params::SqlParams;
use crate::scope::Scope;
use crate::scope::ScopeError;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Count and row statements of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesStatements {
    /// `COUNT(*)` over the filtered runs.
    pub count_sql: String,
    /// Rows in run id order.
    pub rows_sql: String,
    /// Rows in seeded random order, at most `max_points`.
    pub sample_sql: String,
    /// Parameters shared by every statement.
    pub params: SqlParams,
}

/// Compiles the statements of an extraction.
///
/// Unreadable fields project `NULL`.
///
/// # Errors
///
/// Returns [`ScopeError::Empty`] for an empty scope.
pub fn build_values(scope: &Scope, request: &FieldValuesRequest) -> Result<ValuesStatements, ScopeError> {
    let ctx = CompileContext::for_fields(request.fields.iter().map(String::as_str), request.filter.as_ref());
    let from = runs_from(scope, ctx)?;
    let mut params = SqlParams::new();
    let filter = compile_filter_spec(request.filter.as_ref(), ctx, &mut params).render();
    let mut columns = vec!["r.run_id::text".to_string()];
    columns.extend(
        request
            .fields
            .iter()
            .map(|field| text_expr(&FieldRef::parse(field), ctx).unwrap_or_else(|| "NULL::text".to_string())),
    );
    let select = format!("SELECT {} FROM {from} {filter}", columns.join(", "));
    Ok(ValuesStatements {
        count_sql: format!("SELECT COUNT(*) FROM {from} {filter}"),
        rows_sql: format!("{select} ORDER BY r.run_id"),
        sample_sql: format!("{select} ORDER BY random() LIMIT {}", request.max_points),
        params,
    })
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Extracts raw field values, sampling when the match count is large.
///
/// # Errors
///
/// Returns [`PostgresStoreError::Invalid`] for out-of-range requests, or
/// another [`PostgresStoreError`] when a statement fails.
pub fn field_values(
    client: &mut Client,
    scope: &Scope,
    request: &FieldValuesRequest,
) -> Result<FieldValuesResponse, PostgresStoreError> {
    if let Some(violation) = request.violation() {
        return Err(PostgresStoreError::Invalid(violation));
    }
    let mut response = request.empty_response();
    if scope.is_empty() {
        return Ok(response);
    }
    let statements = build_values(scope, request)?;
    let params = statements.params.refs();
    let total: i64 = client.query_one(&statements.count_sql, &params)?.try_get(0)?;
    let total = u64::try_from(total).unwrap_or_default();
    let sampled = total > u64::from(request.max_points);
    let rows = if sampled {
        client.execute("SELECT setseed($1::float8)", &[&request.normalized_seed()])?;
        client.query(&statements.sample_sql, &params)?
    } else {
        client.query(&statements.rows_sql, &params)?
    };

    let mut run_ids = Vec::with_capacity(rows.len());
    let mut columns: Vec<Vec<serde_json::Value>> = vec![Vec::with_capacity(rows.len()); request.fields.len()];
    for row in &rows {
        run_ids.push(row.try_get::<_, String>(0)?);
        for (index, column) in columns.iter_mut().enumerate() {
            let text: Option<String> = row.try_get(index + 1)?;
            column.push(plot_value(text.as_deref()));
        }
    }
    for (field, column) in request.fields.iter().zip(columns) {
        response.fields.insert(field.clone(), column);
    }
    if request.include_run_ids {
        response.run_ids = Some(run_ids);
    }
    response.total = total;
    response.returned = u64::try_from(rows.len()).unwrap_or(u64::MAX);
    response.sampled = sampled;
    debug!(total, returned = response.returned, sampled, "field values extracted");
    Ok(response)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
