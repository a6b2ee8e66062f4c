// crates/run-atlas-core/src/core/mod.rs
// ============================================================================
// Module: Run Atlas Core Types
// Description: Backend-agnostic models for runs, filters, fields, and reports.
// Purpose: Provide the shared data model and wire format for every backend.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Core types are pure data. They carry no storage logic beyond small helpers
//! shared by the SQL engine and the in-memory fallbacks.

pub mod aggregate;
pub mod field;
pub mod filter;
pub mod histogram;
pub mod identifiers;
pub mod manifest;
pub mod run;
pub mod search;
pub mod values;

pub use aggregate::AggFn;
pub use aggregate::AggregateRequest;
pub use aggregate::AggregateResponse;
pub use aggregate::DataPoint;
pub use aggregate::ErrorBarType;
pub use aggregate::Series;
pub use aggregate::XValue;
pub use field::FieldIndex;
pub use field::FieldInfo;
pub use field::FieldNamespace;
pub use field::FieldRef;
pub use field::FieldType;
pub use field::RecordColumn;
pub use filter::FieldFilter;
pub use filter::FilterOp;
pub use filter::FilterSpec;
pub use filter::RunQuery;
pub use filter::SortOrder;
pub use histogram::HistogramRequest;
pub use histogram::HistogramResponse;
pub use identifiers::ExperimentId;
pub use identifiers::RunId;
pub use manifest::ManifestInfo;
pub use manifest::ManifestResponse;
pub use manifest::OperationInfo;
pub use run::ArtifactInfo;
pub use run::ExperimentInfo;
pub use run::ProvenanceInfo;
pub use run::RecordFields;
pub use run::RunPage;
pub use run::RunResponse;
pub use run::RunStatus;
pub use run::StatusCounts;
pub use search::SearchGroup;
pub use search::SearchHit;
pub use search::SearchRequest;
pub use search::SearchResponse;
pub use values::FieldValuesRequest;
pub use values::FieldValuesResponse;
pub use values::ResultEntry;
