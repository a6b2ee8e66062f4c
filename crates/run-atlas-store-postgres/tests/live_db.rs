// crates/run-atlas-store-postgres/tests/live_db.rs
// ============================================================================
// Module: Live Database Tests
// Description: End-to-end store behavior against a real Postgres server.
// Purpose: Verify routing, pushdown, and caching over two seeded namespaces.
// Dependencies: postgres, run-atlas-core, run-atlas-store-postgres
// ============================================================================

//! Runs only with the `live-db` feature and `RUN_ATLAS_TEST_DATABASE_URL`
//! pointing at a disposable database. Three schemas are recreated on each run.

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

use std::collections::BTreeSet;

use postgres::Client;
use postgres::NoTls;
use run_atlas_core::AggregateRequest;
use run_atlas_core::ExperimentId;
use run_atlas_core::FieldFilter;
use run_atlas_core::FilterOp;
use run_atlas_core::FieldValuesRequest;
use run_atlas_core::FilterSpec;
use run_atlas_core::HistogramRequest;
use run_atlas_core::RunId;
use run_atlas_core::RunQuery;
use run_atlas_core::RunStatus;
use run_atlas_core::RunStore;
use run_atlas_core::SearchRequest;
use run_atlas_core::SortOrder;
use run_atlas_core::SqlPushdown;
use run_atlas_core::XValue;
use run_atlas_store_postgres::PostgresRunStore;
use run_atlas_store_postgres::PostgresStoreConfig;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Environment variable naming the disposable test database.
const DATABASE_URL_ENV: &str = "RUN_ATLAS_TEST_DATABASE_URL";
/// Namespace holding the small scored experiment.
const SCHEMA_A: &str = "atlas_live_a";
/// Namespace holding the paginated experiment.
const SCHEMA_B: &str = "atlas_live_b";
/// Namespace holding runs with malformed payloads.
const SCHEMA_C: &str = "atlas_live_c";
/// Experiment in [`SCHEMA_A`].
const EXPERIMENT_A: &str = "live_exp_scores";
/// Experiment in [`SCHEMA_B`].
const EXPERIMENT_B: &str = "live_exp_sweep";
/// Experiment in [`SCHEMA_C`].
const EXPERIMENT_C: &str = "live_exp_malformed";
/// Runs seeded into [`SCHEMA_B`].
const SWEEP_RUNS: u64 = 25;

// ============================================================================
// SECTION: Fixture
// ============================================================================

fn database_url() -> Option<String> {
    std::env::var(DATABASE_URL_ENV).ok().filter(|url| !url.trim().is_empty())
}

fn create_schema(client: &mut Client, schema: &str, with_catalog: bool, with_manifests: bool) -> TestResult {
    let mut ddl = format!(
        "DROP SCHEMA IF EXISTS {schema} CASCADE;
         CREATE SCHEMA {schema};
         CREATE TABLE {schema}.runs (
             run_id text PRIMARY KEY,
             experiment_id text NOT NULL,
             status text,
             context_fingerprint text,
             params_fingerprint text,
             seed_fingerprint text,
             started_at timestamptz,
             finished_at timestamptz,
             duration_ms bigint,
             record_json jsonb NOT NULL
         );
         CREATE TABLE {schema}.derived (run_id text PRIMARY KEY, derived_json jsonb);"
    );
    if with_catalog {
        ddl.push_str(&format!(
            "CREATE TABLE {schema}.field_catalog (
                 namespace text, field_name text, field_type text, count bigint,
                 \"values\" jsonb, min_value double precision, max_value double precision
             );"
        ));
    }
    if with_manifests {
        ddl.push_str(&format!(
            "CREATE TABLE {schema}.experiment_manifests (
                 experiment_id text, \"timestamp\" text, submitted_at timestamptz,
                 total_runs integer, manifest_json jsonb
             );"
        ));
    }
    client.batch_execute(&ddl)?;
    Ok(())
}

#[allow(clippy::too_many_arguments, reason = "Fixture rows spell out every column.")]
fn insert_run(
    client: &mut Client,
    schema: &str,
    run_id: &str,
    experiment_id: &str,
    status: &str,
    started_at: &str,
    record: &serde_json::Value,
    derived: Option<&serde_json::Value>,
) -> TestResult {
    let sql = format!(
        "INSERT INTO {schema}.runs (run_id, experiment_id, status, context_fingerprint, params_fingerprint, \
         seed_fingerprint, started_at, finished_at, duration_ms, record_json) \
         VALUES ($1, $2, $3, 'ctx0001', 'par0002', $4, $5::text::timestamptz, \
         $5::text::timestamptz + interval '30 seconds', 30000, $6::text::jsonb)"
    );
    let seed = format!("seed-{run_id}");
    let record = record.to_string();
    client.execute(&sql, &[&run_id, &experiment_id, &status, &seed, &started_at, &record])?;
    if let Some(derived) = derived {
        let derived = derived.to_string();
        client.execute(
            &format!("INSERT INTO {schema}.derived (run_id, derived_json) VALUES ($1, $2::text::jsonb)"),
            &[&run_id, &derived],
        )?;
    }
    Ok(())
}

fn seed(client: &mut Client) -> TestResult {
    create_schema(client, SCHEMA_A, true, true)?;
    create_schema(client, SCHEMA_B, false, false)?;

    for (index, score) in [10, 20, 30].into_iter().enumerate() {
        let run_id = format!("live-a-{index}");
        let started_at = format!("2025-03-01T00:0{index}:00Z");
        let record = serde_json::json!({
            "run_id": run_id,
            "experiment_id": EXPERIMENT_A,
            "status": "success",
            "started_at": started_at,
            "params_resolved": {"optimizer": "adam", "dim": 8},
            "metrics": {"score": score},
            "tags": ["baseline"],
        });
        let derived = serde_json::json!({"auc": f64::from(score) / 100.0});
        insert_run(client, SCHEMA_A, &run_id, EXPERIMENT_A, "success", &started_at, &record, Some(&derived))?;
    }
    client.batch_execute(&format!(
        "INSERT INTO {SCHEMA_A}.field_catalog VALUES
             ('metrics', 'score', 'numeric', 3, NULL, 10, 30),
             ('params', 'optimizer', 'string', 3, '[\"adam\"]', NULL, NULL),
             ('derived', 'auc', 'numeric', 3, NULL, 0.1, 0.3);
         INSERT INTO {SCHEMA_A}.experiment_manifests VALUES
             ('{EXPERIMENT_A}', '2025-03-01T00:00:00Z', '2025-03-01T00:00:00Z', 3,
              '{{\"tags\": [\"baseline-sweep\"], \"runs\": []}}');"
    ))?;

    for index in 0 .. SWEEP_RUNS {
        let run_id = format!("live-b-{index:02}");
        // Pairs of runs share a start time so ordering must fall back to run id.
        let started_at = format!("2025-04-01T00:{:02}:00Z", index / 2);
        let status = if index % 3 == 0 { "failed" } else { "success" };
        let loss = 1.0 / (1.0 + f64::from(u32::try_from(index)?));
        let record = serde_json::json!({
            "run_id": run_id,
            "experiment_id": EXPERIMENT_B,
            "status": status,
            "started_at": started_at,
            "params_resolved": {"lr": 0.01, "layers": index % 4},
            "metrics": {"loss": loss},
            "tags": if index % 5 == 0 { vec!["nightly"] } else { Vec::new() },
        });
        insert_run(client, SCHEMA_B, &run_id, EXPERIMENT_B, status, &started_at, &record, None)?;
    }

    // Identity and status live only in the physical columns here.
    create_schema(client, SCHEMA_C, false, true)?;
    let overflowing = serde_json::json!({"metrics": {"score": "1e400"}, "tags": null});
    insert_run(client, SCHEMA_C, "live-c-0", EXPERIMENT_C, "failed", "2025-05-01T00:00:00Z", &overflowing, None)?;
    let scalar_tags = serde_json::json!({"metrics": {"score": 50}, "tags": "edge"});
    insert_run(client, SCHEMA_C, "live-c-1", EXPERIMENT_C, "success", "2025-05-01T00:01:00Z", &scalar_tags, None)?;
    client.batch_execute(&format!(
        "INSERT INTO {SCHEMA_C}.experiment_manifests VALUES
             ('{EXPERIMENT_C}', '2025-05-01T00:00:00Z', '2025-05-01T00:00:00Z', 2, '{{\"tags\": null}}');"
    ))?;
    Ok(())
}

fn open_store(url: &str) -> Result<PostgresRunStore, Box<dyn std::error::Error>> {
    let config = PostgresStoreConfig {
        connection: url.to_string(),
        max_connections: 2,
        min_idle: 0,
        ..PostgresStoreConfig::default()
    };
    Ok(PostgresRunStore::new(&config)?)
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

fn check_pagination(store: &PostgresRunStore) -> TestResult {
    let filter = FilterSpec::for_experiment(EXPERIMENT_B);
    let mut seen = Vec::new();
    for offset in [0_u64, 10, 20] {
        let page = store.query_runs(&RunQuery::page(Some(filter.clone()), 10, offset))?;
        if page.total != SWEEP_RUNS {
            return Err(format!("expected total {SWEEP_RUNS}, got {}", page.total).into());
        }
        seen.extend(page.runs.into_iter().map(|run| run.record.run_id.to_string()));
    }
    let unique: BTreeSet<&String> = seen.iter().collect();
    if u64::try_from(seen.len())? != SWEEP_RUNS || u64::try_from(unique.len())? != SWEEP_RUNS {
        return Err(format!("pages overlapped or skipped runs: {seen:?}").into());
    }

    let again = store.query_runs(&RunQuery::page(Some(filter.clone()), 10, 0))?;
    let first: Vec<String> = again.runs.iter().map(|run| run.record.run_id.to_string()).collect();
    if first != seen[.. 10] {
        return Err("repeated page differs".into());
    }

    let ascending =
        store.query_runs(&RunQuery::page(Some(filter), 3, 0).sorted_by("metrics.loss", SortOrder::Asc))?;
    let ids: Vec<String> = ascending.runs.iter().map(|run| run.record.run_id.to_string()).collect();
    if ids != ["live-b-24", "live-b-23", "live-b-22"] {
        return Err(format!("unexpected loss ordering: {ids:?}").into());
    }
    Ok(())
}

fn check_lookup(store: &PostgresRunStore) -> TestResult {
    let run = store.get_run(&RunId::new("live-a-1"))?.ok_or("missing live-a-1")?;
    if run.record.experiment_id.as_str() != EXPERIMENT_A {
        return Err("wrong experiment on fetched run".into());
    }
    if run.metrics.get("score") != Some(&serde_json::json!(20)) {
        return Err(format!("unexpected metrics: {:?}", run.metrics).into());
    }
    if run.derived_metrics.get("auc") != Some(&serde_json::json!(0.2)) {
        return Err(format!("unexpected derived metrics: {:?}", run.derived_metrics).into());
    }
    if store.get_run(&RunId::new("live-missing"))?.is_some() {
        return Err("unknown run resolved".into());
    }

    let counts = store.status_counts(Some(&ExperimentId::new(EXPERIMENT_B)))?;
    if counts.failed != 9 || counts.success != 16 || counts.total != 25 {
        return Err(format!("unexpected status counts: {counts:?}").into());
    }
    Ok(())
}

fn check_aggregate_and_histogram(store: &PostgresRunStore) -> TestResult {
    let mut request = AggregateRequest::new("record.status", "metrics.score");
    request.filter = Some(FilterSpec::for_experiment(EXPERIMENT_A));
    let response = store.aggregate(&request)?;
    let [series] = response.series.as_slice() else {
        return Err(format!("expected one series, got {:?}", response.series).into());
    };
    let [point] = series.points.as_slice() else {
        return Err(format!("expected one point, got {:?}", series.points).into());
    };
    if series.name != "all" || point.x != XValue::Text("success".to_string()) || point.n != 3 {
        return Err(format!("unexpected aggregate: {series:?}").into());
    }
    if (point.y - 20.0).abs() > 1e-9 {
        return Err(format!("expected mean 20, got {}", point.y).into());
    }

    let mut histogram = HistogramRequest::new("metrics.score", 2);
    histogram.filter = Some(FilterSpec::for_experiment(EXPERIMENT_A));
    let response = store.histogram(&histogram)?;
    if response.bins != [10.0, 20.0, 30.0] || response.counts != [1, 2] || response.total != 3 {
        return Err(format!("unexpected histogram: {response:?}").into());
    }
    Ok(())
}

fn check_field_index(store: &PostgresRunStore) -> TestResult {
    let catalogued = store.field_index(Some(&FilterSpec::for_experiment(EXPERIMENT_A)))?;
    if !catalogued.metrics_fields.contains_key("score") || !catalogued.derived_fields.contains_key("auc") {
        return Err(format!("catalog fields missing: {catalogued:?}").into());
    }
    if catalogued.run_count != 3 {
        return Err(format!("expected run count 3, got {}", catalogued.run_count).into());
    }

    let introspected = store.field_index(Some(&FilterSpec::for_experiment(EXPERIMENT_B)))?;
    if !introspected.metrics_fields.contains_key("loss") || !introspected.params_fields.contains_key("layers") {
        return Err(format!("introspected fields missing: {introspected:?}").into());
    }
    if introspected.run_count != SWEEP_RUNS {
        return Err(format!("expected run count {SWEEP_RUNS}, got {}", introspected.run_count).into());
    }
    Ok(())
}

fn check_field_values(store: &PostgresRunStore) -> TestResult {
    let mut request = FieldValuesRequest::new(vec!["metrics.loss".to_string(), "params.layers".to_string()]);
    request.filter = Some(FilterSpec::for_experiment(EXPERIMENT_B));
    request.max_points = 5;
    request.seed = Some(7);
    let first = store.field_values(&request)?;
    let second = store.field_values(&request)?;
    if !first.sampled || first.total != SWEEP_RUNS || first.returned != 5 {
        return Err(format!("unexpected sampling: {first:?}").into());
    }
    if first.run_ids != second.run_ids {
        return Err("seeded samples differ".into());
    }

    request.max_points = 100;
    let full = store.field_values(&request)?;
    if full.sampled || full.returned != SWEEP_RUNS {
        return Err(format!("unexpected full extraction: {full:?}").into());
    }
    Ok(())
}

fn check_search_and_manifests(store: &PostgresRunStore) -> TestResult {
    let response = store.search(&SearchRequest::new("live_exp", 5))?;
    let experiments = response
        .groups
        .iter()
        .find(|group| group.category == "experiments")
        .ok_or("no experiment group")?;
    let ids: BTreeSet<&str> = experiments.hits.iter().map(|hit| hit.entity_id.as_str()).collect();
    if !ids.contains(EXPERIMENT_A) || !ids.contains(EXPERIMENT_B) {
        return Err(format!("experiments missing from search: {ids:?}").into());
    }

    let tags = store.search(&SearchRequest::new("nightly", 3))?;
    let run_tags = tags.groups.iter().find(|group| group.category == "run_tags").ok_or("no run tag group")?;
    if run_tags.hits.len() != 3 || run_tags.total != 5 {
        return Err(format!("unexpected run tag group: {run_tags:?}").into());
    }

    let nothing = store.search(&SearchRequest::new("zz-no-such-entity-zz", 5))?;
    if !nothing.groups.is_empty() {
        return Err(format!("expected no groups, got {:?}", nothing.groups).into());
    }

    let versions = store.list_manifests(&ExperimentId::new(EXPERIMENT_A))?;
    if versions.len() != 1 || versions[0].total_runs != 3 {
        return Err(format!("unexpected manifest versions: {versions:?}").into());
    }
    if store.get_manifest(&ExperimentId::new(EXPERIMENT_A), None)?.is_none() {
        return Err("latest manifest missing".into());
    }
    if !store.list_manifests(&ExperimentId::new(EXPERIMENT_B))?.is_empty() {
        return Err("namespace without manifests returned versions".into());
    }
    Ok(())
}

fn check_malformed_payloads(store: &PostgresRunStore) -> TestResult {
    let run = store.get_run(&RunId::new("live-c-0"))?.ok_or("missing live-c-0")?;
    if run.record.experiment_id.as_str() != EXPERIMENT_C || run.record.status != RunStatus::Failed {
        return Err(format!("physical columns not applied: {:?}", run.record).into());
    }
    if run.record.duration_ms != Some(30_000) || run.record.seed_fingerprint != "seed-live-c-0" {
        return Err(format!("column metadata missing: {:?}", run.record).into());
    }

    store.search(&SearchRequest::new("live", 5))?;
    let scalar = store.search(&SearchRequest::new("edge", 5))?;
    if scalar.groups.iter().any(|group| group.category == "run_tags") {
        return Err(format!("scalar tags matched: {:?}", scalar.groups).into());
    }

    let filter = FilterSpec::for_experiment(EXPERIMENT_C);
    let sorted =
        store.query_runs(&RunQuery::page(Some(filter.clone()), 10, 0).sorted_by("metrics.score", SortOrder::Asc))?;
    if sorted.total != 2 || sorted.runs.len() != 2 {
        return Err(format!("unexpected sorted page: {}", sorted.total).into());
    }
    let above = filter.clone().with_field_filter(FieldFilter::new("metrics.score", FilterOp::Gt, serde_json::json!(10)));
    let page = store.query_runs(&RunQuery::page(Some(above), 10, 0))?;
    let ids: Vec<String> = page.runs.iter().map(|run| run.record.run_id.to_string()).collect();
    if ids != ["live-c-1"] {
        return Err(format!("out-of-range literal compared as a number: {ids:?}").into());
    }

    let mut histogram = HistogramRequest::new("metrics.score", 2);
    histogram.filter = Some(filter);
    let response = store.histogram(&histogram)?;
    if response.total != 1 || response.counts != [1, 0] {
        return Err(format!("unexpected histogram over malformed values: {response:?}").into());
    }
    Ok(())
}

fn check_refresh(store: &PostgresRunStore) -> TestResult {
    let before = store.list_experiments()?;
    store.refresh()?;
    store.refresh()?;
    let after = store.list_experiments()?;
    if before != after {
        return Err("refresh changed the experiment listing".into());
    }
    let ids: BTreeSet<&str> = after.iter().map(|info| info.experiment_id.as_str()).collect();
    if !ids.contains(EXPERIMENT_A) || !ids.contains(EXPERIMENT_B) {
        return Err(format!("experiments missing after refresh: {ids:?}").into());
    }
    let page = store.query_runs(&RunQuery::page(Some(FilterSpec::for_experiment(EXPERIMENT_A)), 10, 0))?;
    if page.total != 3 {
        return Err(format!("routing changed after refresh: {}", page.total).into());
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn live_database_end_to_end() -> TestResult {
    let Some(url) = database_url() else {
        eprintln!("{DATABASE_URL_ENV} not set; skipping live database test");
        return Ok(());
    };
    let mut client = Client::connect(&url, NoTls)?;
    seed(&mut client)?;
    let store = open_store(&url)?;

    check_pagination(&store)?;
    check_lookup(&store)?;
    check_aggregate_and_histogram(&store)?;
    check_field_index(&store)?;
    check_field_values(&store)?;
    check_search_and_manifests(&store)?;
    check_malformed_payloads(&store)?;
    check_refresh(&store)?;

    client.batch_execute(&format!(
        "DROP SCHEMA {SCHEMA_A} CASCADE; DROP SCHEMA {SCHEMA_B} CASCADE; DROP SCHEMA {SCHEMA_C} CASCADE;"
    ))?;
    Ok(())
}
