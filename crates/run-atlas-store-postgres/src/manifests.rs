// crates/run-atlas-store-postgres/src/manifests.rs
// ============================================================================
// Module: Manifests and Results
// Description: Experiment manifest versions and per-run structured results.
// Purpose: Read the optional manifest and result tables of a namespace.
// Dependencies: postgres, run-atlas-core, serde_json, time
// ============================================================================

//! ## Overview
//! Both tables are optional. Callers pass the single namespace owning the
//! experiment or run only when that namespace holds the table; otherwise the
//! listing is empty and lookups answer `None`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use run_atlas_core::ExperimentId;
use run_atlas_core::ManifestInfo;
use run_atlas_core::ManifestResponse;
use run_atlas_core::ResultEntry;
use run_atlas_core::RunId;
use run_atlas_core::core::run::parse_timestamp;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::PostgresStoreError;
use crate::scope::quote_ident;

// ============================================================================
// SECTION: Manifests
// ============================================================================

/// Lists manifest versions of an experiment, newest submission first.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn list_manifests(
    client: &mut Client,
    namespace: &str,
    experiment_id: &ExperimentId,
) -> Result<Vec<ManifestInfo>, PostgresStoreError> {
    let sql = format!(
        "SELECT experiment_id::text, \"timestamp\"::text, (to_jsonb(submitted_at) #>> '{{}}'), total_runs::bigint \
         FROM {}.\"experiment_manifests\" WHERE experiment_id = $1 ORDER BY submitted_at DESC",
        quote_ident(namespace)
    );
    let mut versions = Vec::new();
    for row in client.query(&sql, &[&experiment_id.as_str()])? {
        let owner: Option<String> = row.try_get(0)?;
        let timestamp: Option<String> = row.try_get(1)?;
        let submitted_at: Option<String> = row.try_get(2)?;
        let total_runs: Option<i64> = row.try_get(3)?;
        versions.push(ManifestInfo {
            experiment_id: owner.map_or_else(|| experiment_id.clone(), ExperimentId::new),
            timestamp: timestamp.unwrap_or_default(),
            submitted_at: submitted_at.as_deref().and_then(parse_timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH),
            total_runs: total_runs.and_then(|total| u64::try_from(total).ok()).unwrap_or_default(),
        });
    }
    Ok(versions)
}

/// Fetches one manifest version, or the latest submission.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn get_manifest(
    client: &mut Client,
    namespace: &str,
    experiment_id: &ExperimentId,
    timestamp: Option<&str>,
) -> Result<Option<ManifestResponse>, PostgresStoreError> {
    let table = format!("{}.\"experiment_manifests\"", quote_ident(namespace));
    let row = match timestamp {
        Some(timestamp) => client.query_opt(
            &format!("SELECT manifest_json::jsonb FROM {table} WHERE experiment_id = $1 AND \"timestamp\"::text = $2"),
            &[&experiment_id.as_str(), &timestamp],
        )?,
        None => client.query_opt(
            &format!(
                "SELECT manifest_json::jsonb FROM {table} WHERE experiment_id = $1 ORDER BY submitted_at DESC LIMIT 1"
            ),
            &[&experiment_id.as_str()],
        )?,
    };
    let Some(row) = row else {
        return Ok(None);
    };
    let document: Option<Value> = row.try_get(0)?;
    Ok(Some(ManifestResponse::from_document(experiment_id, &document.unwrap_or(Value::Null))))
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Lists result names captured by a run.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn list_results(client: &mut Client, namespace: &str, run_id: &RunId) -> Result<Vec<String>, PostgresStoreError> {
    let sql = format!("SELECT name::text FROM {}.\"results\" WHERE run_id = $1 ORDER BY name", quote_ident(namespace));
    client
        .query(&sql, &[&run_id.as_str()])?
        .iter()
        .map(|row| row.try_get(0).map_err(PostgresStoreError::from))
        .collect()
}

/// Fetches one structured result of a run.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn get_result(
    client: &mut Client,
    namespace: &str,
    run_id: &RunId,
    name: &str,
) -> Result<Option<ResultEntry>, PostgresStoreError> {
    let sql = format!(
        "SELECT data::jsonb, dtype::text, to_jsonb(shape), metadata::jsonb FROM {}.\"results\" \
         WHERE run_id = $1 AND name = $2",
        quote_ident(namespace)
    );
    let Some(row) = client.query_opt(&sql, &[&run_id.as_str(), &name])? else {
        return Ok(None);
    };
    let data: Option<Value> = row.try_get(0)?;
    let shape: Option<Value> = row.try_get(2)?;
    let metadata: Option<Value> = row.try_get(3)?;
    Ok(Some(ResultEntry {
        name: name.to_string(),
        data: data.unwrap_or(Value::Null),
        dtype: row.try_get(1)?,
        shape: shape_of(shape.as_ref()),
        metadata: match metadata {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        },
    }))
}

/// Reads an array shape; anything but a list of integers is absent.
fn shape_of(value: Option<&Value>) -> Option<Vec<i64>> {
    value?.as_array()?.iter().map(Value::as_i64).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
