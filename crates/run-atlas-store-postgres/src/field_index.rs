// crates/run-atlas-store-postgres/src/field_index.rs
// ============================================================================
// Module: Field Index Builder
// Description: Field metadata from the field catalog or payload sampling.
// Purpose: Describe which fields exist, their types, and their value ranges.
// Dependencies: postgres, run-atlas-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! Writers may maintain a `field_catalog` table per namespace. When it exists
//! and yields anything, its rows are merged across namespaces. Otherwise the
//! most recent payloads of each namespace are sampled and their fields
//! summarized. Either way `run_count` is a direct count over the runs table.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use postgres::Client;
use run_atlas_core::FieldIndex;
use run_atlas_core::FieldInfo;
use run_atlas_core::FieldNamespace;
use run_atlas_core::FieldType;
use run_atlas_core::core::field::FieldStats;
use run_atlas_core::core::field::MAX_FIELD_VALUES;
use run_atlas_core::core::field::finish_stats;
use run_atlas_core::core::field::observe_object;
use run_atlas_core::core::field::text_value;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::error::PostgresStoreError;
use crate::resolver::NamespaceResolver;
use crate::scope::Scope;
use crate::scope::quote_ident;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Builds the field index for the runs of `scope`, optionally one experiment.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when a statement fails.
pub fn build_field_index(
    client: &mut Client,
    resolver: &NamespaceResolver,
    scope: &Scope,
    experiment_id: Option<&str>,
    sample: u32,
) -> Result<FieldIndex, PostgresStoreError> {
    if scope.is_empty() {
        return Ok(FieldIndex::empty());
    }
    let catalogued = scope.restricted_to(&resolver.namespaces_with_table(client, "field_catalog")?);
    let mut index = read_catalog(client, &catalogued)?;
    if index.has_no_payload_fields() && index.derived_fields.is_empty() && index.record_fields.is_empty() {
        warn!(namespaces = scope.namespaces().len(), "field catalog empty or missing, sampling payloads");
        let with_derived = scope.restricted_to(&resolver.namespaces_with_table(client, "derived")?);
        index = introspect(client, scope, &with_derived, experiment_id, sample)?;
    }
    index.run_count = count_runs(client, scope, experiment_id)?;
    debug!(run_count = index.run_count, "field index built");
    Ok(index)
}

/// Counts runs across the scope.
fn count_runs(client: &mut Client, scope: &Scope, experiment_id: Option<&str>) -> Result<u64, PostgresStoreError> {
    let mut total: u64 = 0;
    for namespace in scope.namespaces() {
        let table = format!("{}.\"runs\"", quote_ident(namespace));
        let count: i64 = match experiment_id {
            Some(experiment_id) => client
                .query_one(&format!("SELECT COUNT(*) FROM {table} WHERE experiment_id = $1"), &[&experiment_id])?
                .try_get(0)?,
            None => client.query_one(&format!("SELECT COUNT(*) FROM {table}"), &[])?.try_get(0)?,
        };
        total = total.saturating_add(u64::try_from(count).unwrap_or_default());
    }
    Ok(total)
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Reads and merges `field_catalog` rows of every namespace in `scope`.
fn read_catalog(client: &mut Client, scope: &Scope) -> Result<FieldIndex, PostgresStoreError> {
    let mut index = FieldIndex::empty();
    for namespace in scope.namespaces() {
        let sql = format!(
            "SELECT namespace::text, field_name::text, field_type::text, \"count\"::bigint, to_jsonb(\"values\"), \
             min_value::float8, max_value::float8 FROM {}.\"field_catalog\"",
            quote_ident(namespace)
        );
        for row in client.query(&sql, &[])? {
            let label: Option<String> = row.try_get(0)?;
            let Some(field_namespace) = label.as_deref().and_then(FieldNamespace::parse) else {
                continue;
            };
            let Some(name) = row.try_get::<_, Option<String>>(1)? else {
                continue;
            };
            let field_type: Option<String> = row.try_get(2)?;
            let count: Option<i64> = row.try_get(3)?;
            let values: Option<Value> = row.try_get(4)?;
            let info = FieldInfo {
                field_type: FieldType::from_label(field_type.as_deref()),
                count: count.and_then(|count| u64::try_from(count).ok()).unwrap_or_default(),
                values: values.as_ref().and_then(Value::as_array).map(|items| items.iter().map(text_value).collect()),
                min_value: row.try_get(5)?,
                max_value: row.try_get(6)?,
            };
            merge_field(index.fields_mut(field_namespace), name, info);
        }
    }
    Ok(index)
}

/// Merges one catalog entry into a field map.
///
/// Counts add, ranges widen, and value sets union up to the distinct-value cap.
/// The first type seen is kept.
pub fn merge_field(fields: &mut BTreeMap<String, FieldInfo>, name: String, info: FieldInfo) {
    let Some(existing) = fields.get_mut(&name) else {
        fields.insert(name, info);
        return;
    };
    existing.count = existing.count.saturating_add(info.count);
    existing.min_value = widen(existing.min_value, info.min_value, f64::min);
    existing.max_value = widen(existing.max_value, info.max_value, f64::max);
    existing.values = match (existing.values.take(), info.values) {
        (Some(left), Some(right)) => {
            let merged: BTreeSet<String> = left.into_iter().chain(right).collect();
            Some(merged.into_iter().take(MAX_FIELD_VALUES).collect())
        }
        (left, right) => left.or(right),
    };
}

/// Combines two optional bounds.
fn widen(left: Option<f64>, right: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (left, right) {
        (Some(left), Some(right)) => Some(pick(left, right)),
        (left, right) => left.or(right),
    }
}

// ============================================================================
// SECTION: Introspection
// ============================================================================

/// Samples recent payloads and derived records.
fn introspect(
    client: &mut Client,
    scope: &Scope,
    with_derived: &Scope,
    experiment_id: Option<&str>,
    sample: u32,
) -> Result<FieldIndex, PostgresStoreError> {
    let mut params: BTreeMap<String, FieldStats> = BTreeMap::new();
    let mut metrics: BTreeMap<String, FieldStats> = BTreeMap::new();
    let mut derived: BTreeMap<String, FieldStats> = BTreeMap::new();
    let filter = if experiment_id.is_some() { "WHERE r.experiment_id = $1" } else { "" };
    for namespace in scope.namespaces() {
        let schema = quote_ident(namespace);
        let sql = format!(
            "SELECT r.record_json::jsonb FROM {schema}.\"runs\" r {filter} ORDER BY r.started_at DESC LIMIT {sample}"
        );
        for row in query_optional(client, &sql, experiment_id)? {
            let Some(document) = row.try_get::<_, Option<Value>>(0)? else {
                continue;
            };
            if let Some(section) = document.get("params_resolved").and_then(Value::as_object) {
                observe_object(&mut params, section);
            }
            if let Some(section) = document.get("metrics").and_then(Value::as_object) {
                observe_object(&mut metrics, section);
            }
        }
        if !with_derived.namespaces().contains(namespace) {
            continue;
        }
        let sql = format!(
            "SELECT d.derived_json::jsonb FROM {schema}.\"derived\" d JOIN {schema}.\"runs\" r ON d.run_id = r.run_id \
             {filter} LIMIT {sample}"
        );
        for row in query_optional(client, &sql, experiment_id)? {
            if let Some(Value::Object(section)) = row.try_get::<_, Option<Value>>(0)? {
                observe_object(&mut derived, &section);
            }
        }
    }
    let mut index = FieldIndex::empty();
    *index.fields_mut(FieldNamespace::Params) = finish_stats(params);
    *index.fields_mut(FieldNamespace::Metrics) = finish_stats(metrics);
    *index.fields_mut(FieldNamespace::Derived) = finish_stats(derived);
    Ok(index)
}

/// Runs `sql` with the experiment id bound as `$1` when present.
fn query_optional(
    client: &mut Client,
    sql: &str,
    experiment_id: Option<&str>,
) -> Result<Vec<postgres::Row>, PostgresStoreError> {
    Ok(match experiment_id {
        Some(experiment_id) => client.query(sql, &[&experiment_id])?,
        None => client.query(sql, &[])?,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
