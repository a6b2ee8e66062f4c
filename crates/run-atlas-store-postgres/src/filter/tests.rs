// crates/run-atlas-store-postgres/src/filter/tests.rs
// ============================================================================
// Module: Filter Compiler Unit Tests
// Description: SQL text and parameter binding for compiled predicates.
// Purpose: Pin the compiled SQL for each field kind and operator.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

use run_atlas_core::ExperimentId;
use run_atlas_core::FieldFilter;
use run_atlas_core::FieldRef;
use run_atlas_core::FilterOp;
use run_atlas_core::FilterSpec;
use run_atlas_core::RunStatus;
use serde_json::json;
use time::macros::datetime;

use super::CompileContext;
use super::NUMERIC_PATTERN;
use super::compile;
use super::compile_filter_spec;
use super::like_pattern;
use super::numeric_expr;
use super::runs_from;
use super::sort_exprs;
use super::text_expr;
use crate::params::SqlParam;
use crate::params::SqlParams;
use crate::scope::Scope;

fn compile_runs(field: &str, op: FilterOp, value: serde_json::Value) -> Option<super::Predicate> {
    compile(&FieldFilter::new(field, op, value), CompileContext::runs_only(), 1)
}

#[test]
fn text_column_equality_binds_text() {
    let predicate = compile_runs("record.status", FilterOp::Eq, json!("failed")).unwrap();
    assert_eq!(predicate.sql, "r.\"status\" = $1::text");
    assert_eq!(predicate.params, vec![SqlParam::Text("failed".to_string())]);
}

#[test]
fn timestamp_column_binds_parsed_timestamp() {
    let predicate = compile_runs("record.started_at", FilterOp::Ge, json!("2025-01-01T00:00:00Z")).unwrap();
    assert_eq!(predicate.sql, "r.\"started_at\" >= $1::timestamptz");
    assert_eq!(predicate.params, vec![SqlParam::Timestamp(datetime!(2025-01-01 00:00:00 UTC))]);
    assert!(compile_runs("record.started_at", FilterOp::Ge, json!("yesterday")).is_none());
}

#[test]
fn integer_column_compares_as_float() {
    let predicate = compile_runs("record.duration_ms", FilterOp::Lt, json!(500)).unwrap();
    assert_eq!(predicate.sql, "r.\"duration_ms\" < $1::float8");
    assert_eq!(predicate.params, vec![SqlParam::Float(500.0)]);
}

#[test]
fn numeric_payload_equality_casts_to_numeric() {
    let predicate = compile_runs("metrics.score", FilterOp::Eq, json!(-80.0)).unwrap();
    assert!(predicate.sql.starts_with("(CASE WHEN (r.record_json->'metrics'->>'score') ~ "));
    assert!(predicate.sql.ends_with("::numeric END) = ($1::float8)::numeric"));
    assert_eq!(predicate.params, vec![SqlParam::Float(-80.0)]);
}

#[test]
fn ordering_on_payload_casts_to_float() {
    let predicate = compile_runs("params.lr", FilterOp::Gt, json!(0.01)).unwrap();
    assert!(predicate.sql.contains("((r.record_json->'params_resolved'->>'lr'))::float8 END) > $1::float8"));
    let textual = compile_runs("params.optimizer", FilterOp::Lt, json!("m")).unwrap();
    assert_eq!(textual.sql, "(r.record_json->'params_resolved'->>'optimizer') < $1::text");
}

#[test]
fn contains_uses_escaped_ilike_pattern() {
    let predicate = compile_runs("params.optimizer", FilterOp::Contains, json!("50%_off")).unwrap();
    assert_eq!(predicate.sql, "(r.record_json->'params_resolved'->>'optimizer') ILIKE $1::text");
    assert_eq!(predicate.params, vec![SqlParam::Text("%50\\%\\_off%".to_string())]);
    assert_eq!(like_pattern("adam"), "%adam%");
}

#[test]
fn in_binds_one_parameter_per_element() {
    let predicate = compile(
        &FieldFilter::new("params.optimizer", FilterOp::In, json!(["adam", "sgd", "rmsprop"])),
        CompileContext::runs_only(),
        4,
    )
    .unwrap();
    assert_eq!(predicate.sql, "(r.record_json->'params_resolved'->>'optimizer') IN ($4::text, $5::text, $6::text)");
    assert_eq!(predicate.params.len(), 3);
    let empty = compile_runs("params.optimizer", FilterOp::In, json!([])).unwrap();
    assert_eq!(empty.sql, "FALSE");
    assert!(empty.params.is_empty());
}

#[test]
fn record_keys_compare_json_text_and_skip_ordering() {
    let predicate = compile_runs("record.tags", FilterOp::Contains, json!("vision")).unwrap();
    assert_eq!(predicate.sql, "(r.record_json->>'tags') ILIKE $1::text");
    assert!(compile_runs("record.notes", FilterOp::Gt, json!("a")).is_none());
}

#[test]
fn derived_filter_needs_the_join() {
    let filter = FieldFilter::new("derived.x", FilterOp::Gt, json!(5));
    assert!(compile(&filter, CompileContext::runs_only(), 1).is_none());
    let predicate = compile(&filter, CompileContext::with_derived(), 1).unwrap();
    assert!(predicate.sql.contains("(d.derived_json->>'x')"));
}

#[test]
fn unknown_namespaces_compile_to_nothing() {
    assert!(compile_runs("bogus.key", FilterOp::Eq, json!(1)).is_none());
    assert!(compile_runs("metrics", FilterOp::Eq, json!(1)).is_none());
}

#[test]
fn json_keys_are_escaped_literals() {
    let predicate = compile_runs("params.it's", FilterOp::Eq, json!("x")).unwrap();
    assert_eq!(predicate.sql, "(r.record_json->'params_resolved'->>'it''s') = $1::text");
}

#[test]
fn filter_spec_numbers_placeholders_in_order() {
    let spec = FilterSpec {
        experiment_id: Some(ExperimentId::new("expA")),
        status: Some(vec![RunStatus::Success, RunStatus::Running]),
        started_after: Some(datetime!(2025-01-01 00:00:00 UTC)),
        ..FilterSpec::default()
    }
    .with_field_filter(FieldFilter::new("metrics.loss", FilterOp::Le, json!(0.5)))
    .with_field_filter(FieldFilter::new("bogus.key", FilterOp::Eq, json!(1)));
    let mut params = SqlParams::new();
    let clause = compile_filter_spec(Some(&spec), CompileContext::runs_only(), &mut params);
    let rendered = clause.render();
    assert!(rendered.starts_with("WHERE r.\"experiment_id\" = $1::text AND r.\"status\" IN ($2::text, $3::text)"));
    assert!(rendered.contains("r.\"started_at\" >= $4::timestamptz"));
    assert!(rendered.ends_with("::float8 END) <= $5::float8"));
    assert_eq!(params.len(), 5);
}

#[test]
fn absent_filter_renders_nothing() {
    let mut params = SqlParams::new();
    let clause = compile_filter_spec(None, CompileContext::runs_only(), &mut params);
    assert!(clause.is_empty());
    assert_eq!(clause.render(), "");
    assert_eq!(clause.condition(), "TRUE");
    assert!(params.is_empty());
}

#[test]
fn context_joins_derived_only_when_needed() {
    assert!(!CompileContext::for_fields(["params.lr", "metrics.loss"], None).has_derived());
    assert!(CompileContext::for_fields(["derived.auc"], None).has_derived());
    let spec = FilterSpec::default().with_field_filter(FieldFilter::new("derived.auc", FilterOp::Gt, json!(0.5)));
    assert!(CompileContext::for_fields(["params.lr"], Some(&spec)).has_derived());
    let scope = Scope::new(vec!["lab".to_string()]);
    assert_eq!(runs_from(&scope, CompileContext::runs_only()).unwrap(), "\"lab\".\"runs\" r");
    assert_eq!(
        runs_from(&scope, CompileContext::with_derived()).unwrap(),
        "\"lab\".\"runs\" r LEFT JOIN \"lab\".\"derived\" d ON d.run_id = r.run_id"
    );
}

#[test]
fn field_expressions_by_kind() {
    let ctx = CompileContext::runs_only();
    assert_eq!(text_expr(&FieldRef::parse("record.started_at"), ctx).unwrap(), "(to_jsonb(r.\"started_at\") #>> '{}')");
    assert_eq!(numeric_expr(&FieldRef::parse("record.duration_ms"), ctx).unwrap(), "r.\"duration_ms\"::float8");
    assert_eq!(sort_exprs(&FieldRef::parse("record.started_at"), ctx).unwrap(), vec!["r.\"started_at\"".to_string()]);
    assert_eq!(sort_exprs(&FieldRef::parse("metrics.loss"), ctx).unwrap().len(), 2);
    assert!(text_expr(&FieldRef::parse("derived.auc"), ctx).is_none());
}

#[test]
fn numeric_guard_bounds_literal_size() {
    assert!(NUMERIC_PATTERN.ends_with(r"([eE][-+]?\d{1,2})?\s*$"));
    assert!(!NUMERIC_PATTERN.contains(r"\d+"));
    assert!(!NUMERIC_PATTERN.contains(r"\d*"));
    let predicate = compile_runs("metrics.score", FilterOp::Gt, json!(5)).unwrap();
    assert!(predicate.sql.contains(r"\d{1,200}"));
}
