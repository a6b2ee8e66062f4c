// crates/run-atlas-store-postgres/src/search.rs
// ============================================================================
// Module: Search Dispatcher
// Description: Categorized substring search with one query per category.
// Purpose: Back the navigation search box with indexed ILIKE queries.
// Dependencies: postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! Categories are dispatched in a fixed order: experiments, field names,
//! runs, fingerprints, manifest tags and run tags. Experiments are matched
//! against the cached experiment listing; every other category is a single
//! statement over all namespaces holding the relevant table. Fingerprint and
//! manifest tag totals are approximate: one more than the hit count once the
//! limit is reached. Empty groups are dropped and a blank query returns no
//! groups at all.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use run_atlas_core::ExperimentInfo;
use run_atlas_core::SearchGroup;
use run_atlas_core::SearchHit;
use run_atlas_core::SearchRequest;
use run_atlas_core::SearchResponse;
use run_atlas_core::core::search::EntityType;
use run_atlas_core::core::search::SearchCategory;
use run_atlas_core::core::search::matches_query;
use tracing::debug;

use crate::error::PostgresStoreError;
use crate::filter::like_pattern;
use crate::resolver::NamespaceResolver;
use crate::scope::Scope;

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Runs every search category.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when a statement fails.
pub fn search(
    client: &mut Client,
    resolver: &NamespaceResolver,
    scope: &Scope,
    experiments: &[ExperimentInfo],
    request: &SearchRequest,
) -> Result<SearchResponse, PostgresStoreError> {
    let Some(q) = request.query() else {
        return Ok(SearchResponse::from_groups(&request.q, Vec::new()));
    };
    let limit = request.limit.max(1);
    let pattern = like_pattern(q);
    let mut groups = vec![search_experiments(experiments, q, limit)];
    if !scope.is_empty() {
        let catalogued = scope.restricted_to(&resolver.namespaces_with_table(client, "field_catalog")?);
        let manifested = scope.restricted_to(&resolver.namespaces_with_table(client, "experiment_manifests")?);
        groups.push(search_field_names(client, &catalogued, &pattern, limit)?);
        groups.push(search_run_ids(client, scope, &pattern, limit)?);
        groups.push(search_fingerprints(client, scope, &pattern, limit)?);
        groups.push(search_manifest_tags(client, &manifested, &pattern, limit)?);
        groups.push(search_run_tags(client, scope, &pattern, limit)?);
    }
    let response = SearchResponse::from_groups(q, groups);
    debug!(query = q, groups = response.groups.len(), "search dispatched");
    Ok(response)
}

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Matches experiment identifiers from the experiment listing.
#[must_use]
pub fn search_experiments(experiments: &[ExperimentInfo], q: &str, limit: u32) -> SearchGroup {
    let matched: Vec<&ExperimentInfo> =
        experiments.iter().filter(|info| matches_query(q, info.experiment_id.as_str())).collect();
    let hits = matched
        .iter()
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .map(|info| SearchHit::experiment(info.experiment_id.as_str(), format!("{} runs", info.run_count)))
        .collect();
    SearchGroup::new(SearchCategory::Experiments, hits, u64::try_from(matched.len()).unwrap_or(u64::MAX))
}

/// Hit for a cataloged field; catalog rows are not tied to one experiment.
#[must_use]
pub fn field_name_hit(namespace: &str, field_name: &str, count: i64) -> SearchHit {
    SearchHit {
        label: field_name.to_string(),
        sublabel: Some(format!("{namespace} · {count} runs")),
        entity_type: EntityType::Experiment,
        entity_id: String::new(),
        field: Some(format!("{namespace}.{field_name}")),
        value: None,
    }
}

/// Matches field names in the field catalogs, most common first.
fn search_field_names(
    client: &mut Client,
    scope: &Scope,
    pattern: &str,
    limit: u32,
) -> Result<SearchGroup, PostgresStoreError> {
    if scope.is_empty() {
        return Ok(SearchGroup::new(SearchCategory::FieldNames, Vec::new(), 0));
    }
    let table = scope.table("field_catalog", Some("fc"))?;
    let rows = client.query(
        &format!(
            "SELECT fc.namespace::text, fc.field_name::text, COALESCE(fc.count, 0)::bigint FROM {table} \
             WHERE fc.field_name ILIKE $1 ORDER BY fc.count DESC NULLS LAST LIMIT {limit}"
        ),
        &[&pattern],
    )?;
    let mut hits = Vec::with_capacity(rows.len());
    for row in rows {
        let namespace: Option<String> = row.try_get(0)?;
        let field_name: Option<String> = row.try_get(1)?;
        hits.push(field_name_hit(&namespace.unwrap_or_default(), &field_name.unwrap_or_default(), row.try_get(2)?));
    }
    let total: i64 = client
        .query_one(&format!("SELECT COUNT(*) FROM {table} WHERE fc.field_name ILIKE $1"), &[&pattern])?
        .try_get(0)?;
    Ok(SearchGroup::new(SearchCategory::FieldNames, hits, u64::try_from(total).unwrap_or_default()))
}

/// Reads `(run_id, experiment_id)` rows into run hits.
fn run_hits(rows: &[postgres::Row]) -> Result<Vec<SearchHit>, PostgresStoreError> {
    rows.iter()
        .map(|row| {
            let run_id: String = row.try_get(0)?;
            let experiment_id: Option<String> = row.try_get(1)?;
            Ok(SearchHit::run(&run_id, &experiment_id.unwrap_or_default()))
        })
        .collect()
}

/// Matches run identifiers with an exact total.
fn search_run_ids(
    client: &mut Client,
    scope: &Scope,
    pattern: &str,
    limit: u32,
) -> Result<SearchGroup, PostgresStoreError> {
    let table = scope.table("runs", Some("r"))?;
    let total: i64 =
        client.query_one(&format!("SELECT COUNT(*) FROM {table} WHERE r.run_id ILIKE $1"), &[&pattern])?.try_get(0)?;
    let rows = client.query(
        &format!(
            "SELECT r.run_id::text, r.experiment_id::text FROM {table} WHERE r.run_id ILIKE $1 \
             ORDER BY r.started_at DESC LIMIT {limit}"
        ),
        &[&pattern],
    )?;
    Ok(SearchGroup::new(SearchCategory::Runs, run_hits(&rows)?, u64::try_from(total).unwrap_or_default()))
}

/// Matches any of the three fingerprints.
fn search_fingerprints(
    client: &mut Client,
    scope: &Scope,
    pattern: &str,
    limit: u32,
) -> Result<SearchGroup, PostgresStoreError> {
    let table = scope.table("runs", Some("r"))?;
    let rows = client.query(
        &format!(
            "SELECT r.run_id::text, r.experiment_id::text FROM {table} WHERE r.seed_fingerprint ILIKE $1 \
             OR r.params_fingerprint ILIKE $1 OR r.context_fingerprint ILIKE $1 \
             ORDER BY r.started_at DESC LIMIT {limit}"
        ),
        &[&pattern],
    )?;
    Ok(SearchGroup::approximate(SearchCategory::Fingerprints, run_hits(&rows)?, limit))
}

/// Array at `expr`, or an empty array when the value is missing or not an array.
#[must_use]
pub fn json_array_or_empty(expr: &str) -> String {
    format!("(CASE WHEN jsonb_typeof({expr}) = 'array' THEN {expr} ELSE '[]'::jsonb END)")
}

/// Manifest tag statement; `$1` is the pattern.
#[must_use]
pub fn manifest_tags_sql(table: &str, limit: u32) -> String {
    let tags = json_array_or_empty("m.manifest_json::jsonb->'tags'");
    format!(
        "SELECT DISTINCT ON (m.experiment_id) m.experiment_id::text, t.tag FROM {table}, \
         LATERAL jsonb_array_elements_text({tags}) AS t(tag) \
         WHERE t.tag ILIKE $1 ORDER BY m.experiment_id LIMIT {limit}"
    )
}

/// Predicate matching runs with a tag like `$1`.
#[must_use]
pub fn run_tags_match() -> String {
    let tags = json_array_or_empty("r.record_json::jsonb->'tags'");
    format!("EXISTS (SELECT 1 FROM jsonb_array_elements_text({tags}) AS t(tag) WHERE t.tag ILIKE $1)")
}

/// Matches manifest tags, one hit per experiment.
fn search_manifest_tags(
    client: &mut Client,
    scope: &Scope,
    pattern: &str,
    limit: u32,
) -> Result<SearchGroup, PostgresStoreError> {
    if scope.is_empty() {
        return Ok(SearchGroup::new(SearchCategory::Tags, Vec::new(), 0));
    }
    let table = scope.table("experiment_manifests", Some("m"))?;
    let rows = client.query(&manifest_tags_sql(&table, limit), &[&pattern])?;
    let mut hits = Vec::with_capacity(rows.len());
    for row in rows {
        let experiment_id: String = row.try_get(0)?;
        let tag: String = row.try_get(1)?;
        hits.push(SearchHit::experiment(&experiment_id, format!("tag: {tag}")));
    }
    Ok(SearchGroup::approximate(SearchCategory::Tags, hits, limit))
}

/// Matches run record tags with an exact distinct-run total.
fn search_run_tags(
    client: &mut Client,
    scope: &Scope,
    pattern: &str,
    limit: u32,
) -> Result<SearchGroup, PostgresStoreError> {
    let table = scope.table("runs", Some("r"))?;
    let matches = run_tags_match();
    let rows = client.query(
        &format!(
            "SELECT r.run_id::text, r.experiment_id::text FROM {table} WHERE {matches} \
             ORDER BY r.started_at DESC LIMIT {limit}"
        ),
        &[&pattern],
    )?;
    let total: i64 = client
        .query_one(&format!("SELECT COUNT(DISTINCT r.run_id) FROM {table} WHERE {matches}"), &[&pattern])?
        .try_get(0)?;
    Ok(SearchGroup::new(SearchCategory::RunTags, run_hits(&rows)?, u64::try_from(total).unwrap_or_default()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
