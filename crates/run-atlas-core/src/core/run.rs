// crates/run-atlas-core/src/core/run.rs
// ============================================================================
// Module: Run Records
// Description: Typed views over experiment run records.
// Purpose: Map stored run rows into response records with namespaced fields.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A run is one executed trial: fixed record columns plus a semi-structured
//! payload holding resolved parameters, captured metrics, tags, warnings,
//! provenance, and artifact descriptors. Derived metrics live in a side table
//! and are merged in when present.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::format_description::well_known::Iso8601;
use time::format_description::well_known::Rfc3339;

use crate::core::identifiers::ExperimentId;
use crate::core::identifiers::RunId;

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Parses a stored timestamp string.
///
/// RFC 3339 is tried first; ISO 8601 values without an offset are read as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(text, &Iso8601::DEFAULT))
        .ok()
        .or_else(|| PrimitiveDateTime::parse(text, &Iso8601::DEFAULT).ok().map(PrimitiveDateTime::assume_utc))
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Run completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run completed successfully.
    Success,
    /// Run raised an error.
    Failed,
    /// Run was cancelled before completion.
    Cancelled,
    /// Run is still executing.
    Running,
}

impl RunStatus {
    /// All statuses in their canonical order.
    pub const ALL: [Self; 4] = [Self::Success, Self::Failed, Self::Cancelled, Self::Running];

    /// Returns the stored label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Running => "running",
        }
    }

    /// Parses a stored status label. Unknown labels map to `None`.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }
}

// ============================================================================
// SECTION: Record Fields
// ============================================================================

/// Code and environment provenance captured with a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceInfo {
    /// Hash of the operation source.
    #[serde(default)]
    pub code_hash: Option<String>,
    /// Interpreter version of the executor.
    #[serde(default)]
    pub python_version: Option<String>,
    /// Writer library version.
    #[serde(default)]
    pub metalab_version: Option<String>,
    /// Executor identifier.
    #[serde(default)]
    pub executor_id: Option<String>,
    /// Host that executed the run.
    #[serde(default)]
    pub host: Option<String>,
    /// Free-form extra provenance.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ProvenanceInfo {
    /// Builds provenance from a JSON object, ignoring fields of the wrong type.
    #[must_use]
    pub fn from_json(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            code_hash: text("code_hash"),
            python_version: text("python_version"),
            metalab_version: text("metalab_version"),
            executor_id: text("executor_id"),
            host: text("host"),
            extra: map.get("extra").and_then(Value::as_object).cloned().unwrap_or_default(),
        }
    }
}

/// Core run record fields (the `record.*` namespace).
///
/// # Invariants
/// - `finished_at` and `duration_ms` are `None` while `status` is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    /// Globally unique run identifier.
    pub run_id: RunId,
    /// Owning experiment.
    pub experiment_id: ExperimentId,
    /// Completion status.
    pub status: RunStatus,
    /// Fingerprint of the execution context.
    pub context_fingerprint: String,
    /// Fingerprint of the resolved parameters.
    pub params_fingerprint: String,
    /// Fingerprint of the seed bundle.
    pub seed_fingerprint: String,
    /// Start timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Finish timestamp, absent while running.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    /// Duration in milliseconds, absent while running.
    #[serde(default)]
    pub duration_ms: Option<i64>,
    /// Provenance block.
    #[serde(default)]
    pub provenance: ProvenanceInfo,
    /// Error payload for failed runs.
    #[serde(default)]
    pub error: Option<Value>,
    /// Run tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Warnings captured during execution.
    #[serde(default)]
    pub warnings: Vec<Value>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordFields {
    /// Clears completion fields when the run is still executing.
    pub fn enforce_running_invariant(&mut self) {
        if self.status == RunStatus::Running {
            self.finished_at = None;
            self.duration_ms = None;
        }
    }
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// Artifact descriptor attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Artifact identifier.
    pub artifact_id: String,
    /// Artifact name, unique per run.
    pub name: String,
    /// Artifact kind label.
    pub kind: String,
    /// Artifact file format.
    pub format: String,
    /// Optional content hash.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Optional size in bytes.
    #[serde(default)]
    pub size_bytes: Option<i64>,
    /// Public metadata (keys starting with `_` are dropped).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ArtifactInfo {
    /// Builds an artifact descriptor from a stored JSON object.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let metadata = value
            .get("metadata")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(key, _)| !key.starts_with('_'))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            artifact_id: text("artifact_id"),
            name: text("name"),
            kind: text("kind"),
            format: text("format"),
            content_hash: value.get("content_hash").and_then(Value::as_str).map(str::to_string),
            size_bytes: value.get("size_bytes").and_then(Value::as_i64),
            metadata,
        }
    }
}

// ============================================================================
// SECTION: Run Response
// ============================================================================

/// Complete run view with namespaced field maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    /// Record fields.
    pub record: RecordFields,
    /// Resolved parameters (inputs).
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Captured metrics (outputs).
    #[serde(default)]
    pub metrics: Map<String, Value>,
    /// Post-hoc derived metrics.
    #[serde(default)]
    pub derived_metrics: Map<String, Value>,
    /// Artifact descriptors. Empty on list queries.
    #[serde(default)]
    pub artifacts: Vec<ArtifactInfo>,
}

/// Paginated list of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPage {
    /// Runs on this page.
    pub runs: Vec<RunResponse>,
    /// Total number of runs matching the filter before pagination.
    pub total: u64,
    /// Effective page size.
    pub limit: u32,
    /// Offset of the first run on this page.
    pub offset: u64,
}

// ============================================================================
// SECTION: Experiment Listing
// ============================================================================

/// Summary of one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    /// Experiment identifier.
    pub experiment_id: ExperimentId,
    /// Number of stored runs.
    pub run_count: u64,
    /// Start time of the most recent run.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub latest_run: Option<OffsetDateTime>,
}

/// Lightweight per-status run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Runs with status success.
    pub success: u64,
    /// Runs with status failed.
    pub failed: u64,
    /// Runs with status running.
    pub running: u64,
    /// Runs with status cancelled.
    pub cancelled: u64,
    /// All runs, including unknown statuses.
    pub total: u64,
}

impl StatusCounts {
    /// Adds `count` runs with the given stored status label.
    pub const fn add(&mut self, status: Option<RunStatus>, count: u64) {
        match status {
            Some(RunStatus::Success) => self.success += count,
            Some(RunStatus::Failed) => self.failed += count,
            Some(RunStatus::Running) => self.running += count,
            Some(RunStatus::Cancelled) => self.cancelled += count,
            None => {}
        }
        self.total += count;
    }
}
