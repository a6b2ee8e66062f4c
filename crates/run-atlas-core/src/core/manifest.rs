// crates/run-atlas-core/src/core/manifest.rs
// ============================================================================
// Module: Experiment Manifests
// Description: Submission manifests forming an experiment's version history.
// Purpose: Map stored manifest documents into typed responses.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A manifest is written once per submission of an experiment and is
//! versioned by a timestamp string such as `20260127_103000`. Newer
//! submissions sort first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::core::identifiers::ExperimentId;
use crate::core::run::parse_timestamp;

// ============================================================================
// SECTION: Manifest Types
// ============================================================================

/// Manifest metadata used for version listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    /// Owning experiment.
    pub experiment_id: ExperimentId,
    /// Version timestamp label.
    pub timestamp: String,
    /// Submission time.
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    /// Number of runs in the submission.
    pub total_runs: u64,
}

/// Operation reference recorded in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Import reference of the operation.
    #[serde(default)]
    pub r#ref: Option<String>,
    /// Operation name.
    #[serde(default)]
    pub name: Option<String>,
    /// Hash of the operation source.
    #[serde(default)]
    pub code_hash: Option<String>,
}

/// Full experiment manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestResponse {
    /// Owning experiment.
    pub experiment_id: ExperimentId,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Experiment version label.
    #[serde(default)]
    pub version: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Experiment tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Operation reference.
    #[serde(default)]
    pub operation: Option<OperationInfo>,
    /// Submitted parameter space.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Seed plan.
    #[serde(default)]
    pub seeds: Map<String, Value>,
    /// Context fingerprint at submission.
    #[serde(default)]
    pub context_fingerprint: Option<String>,
    /// Metadata (falls back to runtime hints).
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Number of runs in the submission.
    #[serde(default)]
    pub total_runs: u64,
    /// Submitted run identifiers.
    #[serde(default)]
    pub run_ids: Option<Vec<String>>,
    /// Submission time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub submitted_at: Option<OffsetDateTime>,
}

impl ManifestResponse {
    /// Builds a manifest response from a stored manifest document.
    ///
    /// Fields of the wrong shape are treated as absent. The document's own
    /// `experiment_id` wins over the requested one.
    #[must_use]
    pub fn from_document(experiment_id: &ExperimentId, document: &Value) -> Self {
        let text = |key: &str| document.get(key).and_then(Value::as_str).map(str::to_string);
        let object = |key: &str| document.get(key).and_then(Value::as_object).cloned();
        let operation = document
            .get("operation")
            .and_then(Value::as_object)
            .filter(|map| !map.is_empty())
            .map(|map| OperationInfo {
                r#ref: map.get("ref").and_then(Value::as_str).map(str::to_string),
                name: map.get("name").and_then(Value::as_str).map(str::to_string),
                code_hash: map.get("code_hash").and_then(Value::as_str).map(str::to_string),
            });
        let tags = document
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let run_ids = document
            .get("run_ids")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect());
        Self {
            experiment_id: text("experiment_id").map_or_else(|| experiment_id.clone(), ExperimentId::new),
            name: text("name"),
            version: text("version"),
            description: text("description"),
            tags,
            operation,
            params: object("params").unwrap_or_default(),
            seeds: object("seeds").unwrap_or_default(),
            context_fingerprint: text("context_fingerprint"),
            metadata: object("metadata").or_else(|| object("runtime_hints")),
            total_runs: document.get("total_runs").and_then(Value::as_u64).unwrap_or(0),
            run_ids,
            submitted_at: document.get("submitted_at").and_then(Value::as_str).and_then(parse_timestamp),
        }
    }
}
