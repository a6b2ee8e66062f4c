// crates/run-atlas-store-postgres/src/runs.rs
// ============================================================================
// Module: Run Query Engine
// Description: Filtered, sorted, offset-paginated run listings and lookups.
// Purpose: Serve run pages with exact totals and deterministic ordering.
// Dependencies: postgres, run-atlas-core, serde_json, time, tracing
// ============================================================================

//! ## Overview
//! A listing runs two statements over the same `FROM`/`WHERE`: a `COUNT(*)`
//! for the total and a page query with a slim projection that leaves
//! artifacts out. The runs table is always left-joined with the derived
//! table. Ordering is the requested sort key with `NULLS LAST`, then
//! `r.run_id` in the same direction, so pages concatenate without gaps or
//! repeats while the data is unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use postgres::Row;
use run_atlas_core::ArtifactInfo;
use run_atlas_core::ExperimentId;
use run_atlas_core::FieldRef;
use run_atlas_core::ProvenanceInfo;
use run_atlas_core::RecordColumn;
use run_atlas_core::RecordFields;
use run_atlas_core::RunId;
use run_atlas_core::RunPage;
use run_atlas_core::RunQuery;
use run_atlas_core::RunResponse;
use run_atlas_core::RunStatus;
use run_atlas_core::core::field::text_value;
use run_atlas_core::core::run::parse_timestamp;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::PostgresStoreError;
use crate::filter::CompileContext;
use crate::filter::compile_filter_spec;
use crate::filter::runs_from;
use crate::filter::sort_exprs;
use crate::params::SqlParams;
use crate::scope::Scope;
use crate::scope::ScopeError;
use crate::scope::quote_ident;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Slim projection shared by every listing; see [`slim_run`].
const RUN_COLUMNS: &str = "r.run_id::text, r.experiment_id::text, r.status::text, \
                           (to_jsonb(r.started_at) #>> '{}'), (to_jsonb(r.finished_at) #>> '{}'), \
                           r.duration_ms::bigint, r.context_fingerprint::text, r.params_fingerprint::text, \
                           r.seed_fingerprint::text, r.record_json->'params_resolved', r.record_json->'metrics', \
                           r.record_json->'tags', r.record_json->'error', r.record_json->'provenance', \
                           r.record_json->'warnings', r.record_json->>'notes', d.derived_json::jsonb";

/// Count and page statements of one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListStatements {
    /// `COUNT(*)` over the filtered runs.
    pub count_sql: String,
    /// Page of the filtered runs.
    pub page_sql: String,
    /// Parameters shared by both statements.
    pub params: SqlParams,
    /// Effective page size.
    pub limit: u32,
}

/// Renders the `ORDER BY` clause of a listing.
#[must_use]
pub fn order_by(query: &RunQuery, ctx: CompileContext) -> String {
    let direction = query.sort_order.as_sql();
    let field = query.sort_field.as_deref().map_or(FieldRef::Column(RecordColumn::StartedAt), FieldRef::parse);
    let mut keys: Vec<String> = sort_exprs(&field, ctx)
        .unwrap_or_default()
        .into_iter()
        .map(|expr| format!("{expr} {direction} NULLS LAST"))
        .collect();
    keys.push(format!("r.run_id {direction}"));
    format!("ORDER BY {}", keys.join(", "))
}

/// Builds the statements of a listing.
///
/// # Errors
///
/// Returns [`ScopeError::Empty`] for an empty scope.
pub fn build_list(scope: &Scope, query: &RunQuery, max_page_size: u32) -> Result<ListStatements, ScopeError> {
    let ctx = CompileContext::with_derived();
    let from = runs_from(scope, ctx)?;
    let mut params = SqlParams::new();
    let filter = compile_filter_spec(query.filter.as_ref(), ctx, &mut params).render();
    let limit = query.effective_limit(max_page_size);
    Ok(ListStatements {
        count_sql: format!("SELECT COUNT(*) FROM {from} {filter}"),
        page_sql: format!(
            "SELECT {RUN_COLUMNS} FROM {from} {filter} {} LIMIT {limit} OFFSET {}",
            order_by(query, ctx),
            query.offset
        ),
        params,
        limit,
    })
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Lists one page of runs with the total match count.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when a statement fails or a row is corrupt.
pub fn query_runs(
    client: &mut Client,
    scope: &Scope,
    query: &RunQuery,
    max_page_size: u32,
) -> Result<RunPage, PostgresStoreError> {
    let limit = query.effective_limit(max_page_size);
    if scope.is_empty() {
        return Ok(RunPage {
            runs: Vec::new(),
            total: 0,
            limit,
            offset: query.offset,
        });
    }
    let statements = build_list(scope, query, max_page_size)?;
    let params = statements.params.refs();
    let total: i64 = client.query_one(&statements.count_sql, &params)?.try_get(0)?;
    let rows = client.query(&statements.page_sql, &params)?;
    let runs = rows.iter().map(slim_run).collect::<Result<Vec<_>, _>>()?;
    debug!(namespaces = scope.namespaces().len(), total, returned = runs.len(), "run page queried");
    Ok(RunPage {
        runs,
        total: u64::try_from(total).unwrap_or_default(),
        limit: statements.limit,
        offset: query.offset,
    })
}

/// Physical columns that take precedence over the same keys in `record_json`.
const DOCUMENT_COLUMNS: [&str; 8] = [
    "run_id",
    "experiment_id",
    "status",
    "started_at",
    "finished_at",
    "context_fingerprint",
    "params_fingerprint",
    "seed_fingerprint",
];

/// Fetches one run with its full payload from a namespace.
///
/// Physical columns win over the stored document, so a run reads the same
/// here as in a listing.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails or the row is
/// corrupt.
pub fn get_run(client: &mut Client, namespace: &str, run_id: &RunId) -> Result<Option<RunResponse>, PostgresStoreError> {
    let schema = quote_ident(namespace);
    let sql = format!(
        "SELECT r.record_json::jsonb, d.derived_json::jsonb, r.duration_ms::bigint, r.run_id::text, \
         r.experiment_id::text, r.status::text, (to_jsonb(r.started_at) #>> '{{}}'), \
         (to_jsonb(r.finished_at) #>> '{{}}'), r.context_fingerprint::text, r.params_fingerprint::text, \
         r.seed_fingerprint::text FROM {schema}.\"runs\" r LEFT JOIN {schema}.\"derived\" d \
         ON d.run_id = r.run_id WHERE r.run_id = $1"
    );
    let Some(row) = client.query_opt(&sql, &[&run_id.as_str()])? else {
        return Ok(None);
    };
    let derived: Option<Value> = row.try_get(1)?;
    let mut columns = Vec::with_capacity(DOCUMENT_COLUMNS.len());
    for offset in 0..DOCUMENT_COLUMNS.len() {
        columns.push(row.try_get::<_, Option<String>>(offset + 3)?);
    }
    let document = overlay_columns(object_of(row.try_get(0)?), row.try_get(2)?, &columns);
    run_from_document(run_id, &Value::Object(document), derived).map(Some)
}

/// Writes non-null physical column values over the stored document.
///
/// `columns` follows the order of [`DOCUMENT_COLUMNS`].
#[must_use]
pub fn overlay_columns(
    mut document: Map<String, Value>,
    duration_ms: Option<i64>,
    columns: &[Option<String>],
) -> Map<String, Value> {
    if let Some(duration_ms) = duration_ms {
        document.insert("duration_ms".to_string(), Value::from(duration_ms));
    }
    for (key, value) in DOCUMENT_COLUMNS.iter().zip(columns) {
        if let Some(text) = value {
            document.insert((*key).to_string(), Value::String(text.clone()));
        }
    }
    document
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Returns the object inside `value`, or an empty map.
fn object_of(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Text elements of a JSON array.
fn text_list(value: Option<&Value>) -> Vec<String> {
    value.and_then(Value::as_array).map(|items| items.iter().map(text_value).collect()).unwrap_or_default()
}

/// Parses a run status label; absent means success.
fn status_of(run_id: &str, label: Option<&str>) -> Result<RunStatus, PostgresStoreError> {
    match label {
        None => Ok(RunStatus::Success),
        Some(label) => RunStatus::parse(label)
            .ok_or_else(|| PostgresStoreError::Corrupt(format!("run {run_id} has unknown status {label}"))),
    }
}

/// Decodes a row of the slim projection.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when a column has the wrong type or the
/// status is unknown.
pub fn slim_run(row: &Row) -> Result<RunResponse, PostgresStoreError> {
    let run_id: String = row.try_get(0)?;
    let status_label: Option<String> = row.try_get(2)?;
    let status = status_of(&run_id, status_label.as_deref())?;
    let started_at: Option<String> = row.try_get(3)?;
    let finished_at: Option<String> = row.try_get(4)?;
    let tags: Option<Value> = row.try_get(11)?;
    let error: Option<Value> = row.try_get(12)?;
    let provenance: Option<Value> = row.try_get(13)?;
    let warnings: Option<Value> = row.try_get(14)?;
    let mut record = RecordFields {
        run_id: RunId::new(run_id),
        experiment_id: ExperimentId::new(row.try_get::<_, Option<String>>(1)?.unwrap_or_default()),
        status,
        context_fingerprint: row.try_get::<_, Option<String>>(6)?.unwrap_or_default(),
        params_fingerprint: row.try_get::<_, Option<String>>(7)?.unwrap_or_default(),
        seed_fingerprint: row.try_get::<_, Option<String>>(8)?.unwrap_or_default(),
        started_at: started_at.as_deref().and_then(parse_timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH),
        finished_at: finished_at.as_deref().and_then(parse_timestamp),
        duration_ms: row.try_get(5)?,
        provenance: ProvenanceInfo::from_json(provenance.as_ref()),
        error: error.filter(|value| !value.is_null()),
        tags: text_list(tags.as_ref()),
        warnings: warnings.and_then(|value| value.as_array().cloned()).unwrap_or_default(),
        notes: row.try_get(15)?,
    };
    record.enforce_running_invariant();
    Ok(RunResponse {
        record,
        params: object_of(row.try_get(9)?),
        metrics: object_of(row.try_get(10)?),
        derived_metrics: object_of(row.try_get(16)?),
        artifacts: Vec::new(),
    })
}

/// Decodes a full stored run document.
///
/// # Errors
///
/// Returns [`PostgresStoreError::Corrupt`] when the status is unknown.
pub fn run_from_document(
    run_id: &RunId,
    document: &Value,
    derived: Option<Value>,
) -> Result<RunResponse, PostgresStoreError> {
    let text = |key: &str| document.get(key).and_then(Value::as_str);
    let status = status_of(run_id.as_str(), text("status"))?;
    let mut record = RecordFields {
        run_id: text("run_id").map_or_else(|| run_id.clone(), RunId::new),
        experiment_id: ExperimentId::new(text("experiment_id").unwrap_or_default()),
        status,
        context_fingerprint: text("context_fingerprint").unwrap_or_default().to_string(),
        params_fingerprint: text("params_fingerprint").unwrap_or_default().to_string(),
        seed_fingerprint: text("seed_fingerprint").unwrap_or_default().to_string(),
        started_at: text("started_at").and_then(parse_timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH),
        finished_at: text("finished_at").and_then(parse_timestamp),
        duration_ms: document.get("duration_ms").and_then(Value::as_i64),
        provenance: ProvenanceInfo::from_json(document.get("provenance")),
        error: document.get("error").filter(|value| !value.is_null()).cloned(),
        tags: text_list(document.get("tags")),
        warnings: document.get("warnings").and_then(Value::as_array).cloned().unwrap_or_default(),
        notes: text("notes").map(str::to_string),
    };
    record.enforce_running_invariant();
    Ok(RunResponse {
        record,
        params: object_of(document.get("params_resolved").cloned()),
        metrics: object_of(document.get("metrics").cloned()),
        derived_metrics: object_of(derived),
        artifacts: document
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(ArtifactInfo::from_json).collect())
            .unwrap_or_default(),
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use run_atlas_core::FieldFilter;
    use run_atlas_core::FilterOp;
    use run_atlas_core::FilterSpec;
    use run_atlas_core::RunId;
    use run_atlas_core::RunQuery;
    use run_atlas_core::RunStatus;
    use run_atlas_core::SortOrder;
    use serde_json::json;
    use time::macros::datetime;

    use super::build_list;
    use super::order_by;
    use super::overlay_columns;
    use super::run_from_document;
    use crate::filter::CompileContext;
    use crate::scope::Scope;

    #[test]
    fn default_order_is_newest_first_with_run_id_tiebreak() {
        let clause = order_by(&RunQuery::default(), CompileContext::with_derived());
        assert_eq!(clause, "ORDER BY r.\"started_at\" DESC NULLS LAST, r.run_id DESC");
    }

    #[test]
    fn payload_sort_orders_numbers_then_text() {
        let query = RunQuery::default().sorted_by("metrics.loss", SortOrder::Asc);
        let clause = order_by(&query, CompileContext::with_derived());
        assert!(clause.contains("::float8 END) ASC NULLS LAST, (r.record_json->'metrics'->>'loss') ASC NULLS LAST"));
        assert!(clause.ends_with("r.run_id ASC"));
    }

    #[test]
    fn unsupported_sort_falls_back_to_run_id() {
        let query = RunQuery::default().sorted_by("bogus", SortOrder::Asc);
        assert_eq!(order_by(&query, CompileContext::with_derived()), "ORDER BY r.run_id ASC");
    }

    #[test]
    fn listing_shares_from_and_where_between_count_and_page() {
        let scope = Scope::new(vec!["lab".to_string()]);
        let filter = FilterSpec::for_experiment("expA")
            .with_field_filter(FieldFilter::new("derived.auc", FilterOp::Gt, json!(0.5)));
        let statements = build_list(&scope, &RunQuery::page(Some(filter), 5_000, 20), 1000).unwrap();
        assert_eq!(statements.limit, 1000);
        let tail = statements.count_sql.trim_start_matches("SELECT COUNT(*) ");
        assert!(statements.page_sql.contains(tail));
        assert!(statements.page_sql.contains("LEFT JOIN \"lab\".\"derived\" d ON d.run_id = r.run_id"));
        assert!(statements.page_sql.ends_with("LIMIT 1000 OFFSET 20"));
        assert_eq!(statements.params.len(), 2);
    }

    #[test]
    fn documents_decode_with_running_invariant() {
        let document = json!({
            "run_id": "r1",
            "experiment_id": "expA",
            "status": "running",
            "started_at": "2025-01-01T00:00:00",
            "finished_at": "2025-01-01T00:01:00+00:00",
            "duration_ms": 60000,
            "tags": ["vision"],
            "params_resolved": {"lr": 0.1},
            "artifacts": [{"artifact_id": "a1", "name": "model", "kind": "file", "format": "pt",
                           "metadata": {"_internal": 1, "epochs": 3}}]
        });
        let run = run_from_document(&RunId::new("r1"), &document, Some(json!({"auc": 0.9}))).unwrap();
        assert_eq!(run.record.status, RunStatus::Running);
        assert_eq!(run.record.started_at, datetime!(2025-01-01 00:00:00 UTC));
        assert_eq!(run.record.finished_at, None);
        assert_eq!(run.record.duration_ms, None);
        assert_eq!(run.record.tags, vec!["vision"]);
        assert_eq!(run.params["lr"], json!(0.1));
        assert_eq!(run.derived_metrics["auc"], json!(0.9));
        assert_eq!(run.artifacts.len(), 1);
        assert!(!run.artifacts[0].metadata.contains_key("_internal"));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let result = run_from_document(&RunId::new("r1"), &json!({"status": "exploded"}), None);
        assert!(result.is_err());
        let missing = run_from_document(&RunId::new("r1"), &json!({}), None).unwrap();
        assert_eq!(missing.record.status, RunStatus::Success);
        assert_eq!(missing.record.run_id.as_str(), "r1");
    }

    #[test]
    fn physical_columns_win_over_the_document() {
        let document = json!({"experiment_id": "stale", "metrics": {"score": 20}}).as_object().cloned().unwrap();
        let columns = [
            Some("live-a-1".to_string()),
            Some("expA".to_string()),
            Some("failed".to_string()),
            Some("2025-03-01T00:01:00+00:00".to_string()),
            None,
            Some("ctx0001".to_string()),
            None,
            Some("seed-live-a-1".to_string()),
        ];
        let merged = overlay_columns(document, Some(30_000), &columns);
        let run = run_from_document(&RunId::new("live-a-1"), &serde_json::Value::Object(merged), None).unwrap();
        assert_eq!(run.record.experiment_id.as_str(), "expA");
        assert_eq!(run.record.status, RunStatus::Failed);
        assert_eq!(run.record.started_at, datetime!(2025-03-01 00:01:00 UTC));
        assert_eq!(run.record.finished_at, None);
        assert_eq!(run.record.duration_ms, Some(30_000));
        assert_eq!(run.record.context_fingerprint, "ctx0001");
        assert_eq!(run.record.params_fingerprint, "");
        assert_eq!(run.metrics["score"], json!(20));
    }
}
