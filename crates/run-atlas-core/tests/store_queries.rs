//! In-memory store query tests for run-atlas core.
// crates/run-atlas-core/tests/store_queries.rs
// ============================================================================
// Module: Store Query Tests
// Description: Paging, filter semantics, listings, manifests, and results.
// Purpose: Validate the run store contract against the in-memory store.
// ============================================================================

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

use run_atlas_core::ExperimentId;
use run_atlas_core::FieldFilter;
use run_atlas_core::FieldNamespace;
use run_atlas_core::FieldRef;
use run_atlas_core::FieldType;
use run_atlas_core::FilterOp;
use run_atlas_core::FilterSpec;
use run_atlas_core::InMemoryRunStore;
use run_atlas_core::ManifestInfo;
use run_atlas_core::ManifestResponse;
use run_atlas_core::RecordColumn;
use run_atlas_core::ResultEntry;
use run_atlas_core::RunId;
use run_atlas_core::RunQuery;
use run_atlas_core::RunStatus;
use run_atlas_core::RunStore;
use run_atlas_core::SortOrder;
use run_atlas_core::core::field::PayloadSection;
use serde_json::json;
use time::Duration;

use crate::common::BASE_TIME;
use crate::common::RunBuilder;

/// Returns run ids of a filtered query, in store order.
fn ids(store: &InMemoryRunStore, filter: FilterSpec) -> Vec<String> {
    let page = store.query_runs(&RunQuery::page(Some(filter), 100, 0)).unwrap();
    page.runs.into_iter().map(|run| run.record.run_id.to_string()).collect()
}

/// Store with three runs over two experiments.
fn mixed_store() -> InMemoryRunStore {
    let store = InMemoryRunStore::new();
    store
        .insert_run(
            RunBuilder::new("r1", "expA")
                .started_minute(1)
                .param("optimizer", json!("adam"))
                .metric("score", json!(-80))
                .tag("baseline")
                .build(),
        )
        .unwrap();
    store
        .insert_run(
            RunBuilder::new("r2", "expA")
                .started_minute(2)
                .status(RunStatus::Failed)
                .param("optimizer", json!("sgd"))
                .metric("score", json!(12.5))
                .build(),
        )
        .unwrap();
    store
        .insert_run(
            RunBuilder::new("r3", "expB")
                .started_minute(3)
                .status(RunStatus::Running)
                .param("optimizer", json!("AdamW"))
                .metric("score", json!("40"))
                .derived("final_loss", json!(0.1))
                .build(),
        )
        .unwrap();
    store
}

#[test]
fn field_paths_resolve_by_namespace() {
    assert_eq!(FieldRef::parse("record.status"), FieldRef::Column(RecordColumn::Status));
    assert_eq!(FieldRef::parse("record.tags"), FieldRef::RecordKey("tags".to_string()));
    assert_eq!(
        FieldRef::parse("metrics.val.loss"),
        FieldRef::Payload {
            section: PayloadSection::Metrics,
            key: "val.loss".to_string(),
        }
    );
    assert_eq!(FieldRef::parse("derived.final_loss"), FieldRef::Derived("final_loss".to_string()));
    assert_eq!(FieldRef::parse("bogus.key"), FieldRef::Unsupported);
    assert_eq!(FieldRef::parse("metrics"), FieldRef::Unsupported);
    assert_eq!(FieldRef::parse("metrics."), FieldRef::Unsupported);
}

#[test]
fn default_sort_is_newest_first() {
    let store = mixed_store();
    let page = store.query_runs(&RunQuery::default()).unwrap();
    let order: Vec<&str> = page.runs.iter().map(|run| run.record.run_id.as_str()).collect();
    assert_eq!(order, vec!["r3", "r2", "r1"]);
    assert_eq!(page.total, 3);
}

#[test]
fn sort_by_metric_puts_missing_values_last() {
    let store = mixed_store();
    store.insert_run(RunBuilder::new("r4", "expB").build()).unwrap();
    let query = RunQuery::default().sorted_by("metrics.score", SortOrder::Asc);
    let page = store.query_runs(&query).unwrap();
    let order: Vec<&str> = page.runs.iter().map(|run| run.record.run_id.as_str()).collect();
    assert_eq!(order, vec!["r1", "r2", "r3", "r4"]);
    let query = RunQuery::default().sorted_by("metrics.score", SortOrder::Desc);
    let page = store.query_runs(&query).unwrap();
    assert_eq!(page.runs.last().unwrap().record.run_id.as_str(), "r4");
}

#[test]
fn pages_concatenate_to_full_listing() {
    let store = InMemoryRunStore::new();
    for index in 0..7 {
        store.insert_run(RunBuilder::new(&format!("run-{index}"), "exp").build()).unwrap();
    }
    let full = store.query_runs(&RunQuery::page(None, 6, 0)).unwrap();
    let first = store.query_runs(&RunQuery::page(None, 3, 0)).unwrap();
    let second = store.query_runs(&RunQuery::page(None, 3, 3)).unwrap();
    let mut stitched = first.runs.clone();
    stitched.extend(second.runs.clone());
    assert_eq!(stitched, full.runs);
    assert_eq!(first.total, 7);

    let mut seen = 0_u64;
    let mut offset = 0_u64;
    loop {
        let page = store.query_runs(&RunQuery::page(None, 2, offset)).unwrap();
        if page.runs.is_empty() {
            break;
        }
        seen += u64::try_from(page.runs.len()).unwrap();
        offset += 2;
    }
    assert_eq!(seen, 7);
}

#[test]
fn page_limit_is_clamped() {
    let store = mixed_store();
    let page = store.query_runs(&RunQuery::page(None, 5_000, 0)).unwrap();
    assert_eq!(page.limit, 1000);
    let beyond = store.query_runs(&RunQuery::page(None, 10, 50)).unwrap();
    assert!(beyond.runs.is_empty());
    assert_eq!(beyond.total, 3);
}

#[test]
fn numeric_equality_coerces_payload_values() {
    let store = mixed_store();
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new("metrics.score", FilterOp::Eq, -80.0));
    assert_eq!(ids(&store, filter), vec!["r1"]);
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new("metrics.score", FilterOp::Ge, 12.5));
    assert_eq!(ids(&store, filter), vec!["r3", "r2"]);
}

#[test]
fn contains_and_in_filters() {
    let store = mixed_store();
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new("params.optimizer", FilterOp::Contains, "adam"));
    assert_eq!(ids(&store, filter), vec!["r3", "r1"]);
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new(
        "params.optimizer",
        FilterOp::In,
        json!(["sgd", "AdamW"]),
    ));
    assert_eq!(ids(&store, filter), vec!["r3", "r2"]);
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new("record.tags", FilterOp::Contains, "base"));
    assert_eq!(ids(&store, filter), vec!["r1"]);
}

#[test]
fn inapplicable_filters_are_no_ops() {
    let store = mixed_store();
    let unknown = FilterSpec::default().with_field_filter(FieldFilter::new("bogus.key", FilterOp::Eq, 1));
    assert_eq!(ids(&store, unknown).len(), 3);
    let ordering_on_payload_key =
        FilterSpec::default().with_field_filter(FieldFilter::new("record.notes", FilterOp::Gt, "a"));
    assert_eq!(ids(&store, ordering_on_payload_key).len(), 3);
}

#[test]
fn record_filters_combine() {
    let store = mixed_store();
    let filter = FilterSpec {
        experiment_id: Some(ExperimentId::new("expA")),
        status: Some(vec![RunStatus::Success, RunStatus::Running]),
        ..FilterSpec::default()
    };
    assert_eq!(ids(&store, filter), vec!["r1"]);
    let filter = FilterSpec {
        started_after: Some(BASE_TIME + Duration::minutes(2)),
        ..FilterSpec::default()
    };
    assert_eq!(ids(&store, filter), vec!["r3", "r2"]);
}

#[test]
fn running_runs_have_no_completion_fields() {
    let store = mixed_store();
    let run = store.get_run(&RunId::new("r3")).unwrap().unwrap();
    assert_eq!(run.record.finished_at, None);
    assert_eq!(run.record.duration_ms, None);
    assert!(store.get_run(&RunId::new("missing")).unwrap().is_none());
}

#[test]
fn field_index_reports_types_and_ranges() {
    let store = mixed_store();
    let index = store.field_index(None).unwrap();
    assert_eq!(index.run_count, 3);
    let score = &index.fields(FieldNamespace::Metrics)["score"];
    assert_eq!(score.count, 3);
    assert_eq!(score.field_type, FieldType::Numeric);
    let optimizer = &index.fields(FieldNamespace::Params)["optimizer"];
    assert_eq!(optimizer.field_type, FieldType::String);
    assert!(index.fields(FieldNamespace::Derived).contains_key("final_loss"));

    let scoped = store.field_index(Some(&FilterSpec::for_experiment("expA"))).unwrap();
    assert_eq!(scoped.run_count, 2);
    assert!(scoped.fields(FieldNamespace::Derived).is_empty());
}

#[test]
fn experiments_and_status_counts() {
    let store = mixed_store();
    let experiments = store.list_experiments().unwrap();
    let order: Vec<&str> = experiments.iter().map(|info| info.experiment_id.as_str()).collect();
    assert_eq!(order, vec!["expB", "expA"]);
    assert_eq!(experiments[1].run_count, 2);

    let counts = store.status_counts(None).unwrap();
    assert_eq!((counts.success, counts.failed, counts.running, counts.total), (1, 1, 1, 3));
    let scoped = store.status_counts(Some(&ExperimentId::new("expA"))).unwrap();
    assert_eq!((scoped.success, scoped.failed, scoped.total), (1, 1, 2));
}

#[test]
fn manifests_list_newest_first() {
    let store = InMemoryRunStore::new();
    let experiment = ExperimentId::new("expA");
    for (offset, name) in [(0, "first"), (5, "second")] {
        let info = ManifestInfo {
            experiment_id: experiment.clone(),
            timestamp: format!("v{offset}"),
            submitted_at: BASE_TIME + Duration::minutes(offset),
            total_runs: 4,
        };
        let manifest = ManifestResponse::from_document(&experiment, &json!({"name": name, "tags": ["vision"]}));
        store.insert_manifest(info, manifest).unwrap();
    }
    let listing = store.list_manifests(&experiment).unwrap();
    assert_eq!(listing.iter().map(|info| info.timestamp.as_str()).collect::<Vec<_>>(), vec!["v5", "v0"]);
    let latest = store.get_manifest(&experiment, None).unwrap().unwrap();
    assert_eq!(latest.name.as_deref(), Some("second"));
    assert_eq!(latest.tags, vec!["vision"]);
    let pinned = store.get_manifest(&experiment, Some("v0")).unwrap().unwrap();
    assert_eq!(pinned.name.as_deref(), Some("first"));
    assert!(store.get_manifest(&experiment, Some("v9")).unwrap().is_none());
    assert!(store.list_manifests(&ExperimentId::new("other")).unwrap().is_empty());
}

#[test]
fn results_are_scoped_to_runs() {
    let store = mixed_store();
    let run_id = RunId::new("r1");
    let entry = ResultEntry {
        name: "confusion".to_string(),
        data: json!([[1, 0], [0, 1]]),
        dtype: Some("int64".to_string()),
        shape: Some(vec![2, 2]),
        metadata: serde_json::Map::new(),
    };
    store.insert_result(&run_id, entry.clone()).unwrap();
    assert_eq!(store.list_results(&run_id).unwrap(), vec!["confusion"]);
    assert_eq!(store.get_result(&run_id, "confusion").unwrap(), Some(entry));
    assert!(store.list_results(&RunId::new("r2")).unwrap().is_empty());
}
