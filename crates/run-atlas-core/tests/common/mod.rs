// crates/run-atlas-core/tests/common/mod.rs
// ============================================================================
// Module: Run Fixture Helpers
// Description: Builder for run responses used across integration suites.
// Purpose: Keep fixture construction terse and deterministic.
// ============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use run_atlas_core::ExperimentId;
use run_atlas_core::ProvenanceInfo;
use run_atlas_core::RecordFields;
use run_atlas_core::RunId;
use run_atlas_core::RunResponse;
use run_atlas_core::RunStatus;
use serde_json::Map;
use serde_json::Value;
use time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

/// Start time of the first fixture run.
pub const BASE_TIME: OffsetDateTime = datetime!(2025-01-01 00:00:00 UTC);

/// Fluent builder for a [`RunResponse`].
#[derive(Debug, Clone)]
pub struct RunBuilder {
    /// Run being built.
    run: RunResponse,
}

impl RunBuilder {
    /// Starts a successful run at [`BASE_TIME`].
    pub fn new(run_id: &str, experiment_id: &str) -> Self {
        Self {
            run: RunResponse {
                record: RecordFields {
                    run_id: RunId::new(run_id),
                    experiment_id: ExperimentId::new(experiment_id),
                    status: RunStatus::Success,
                    context_fingerprint: "c0ffee01".to_string(),
                    params_fingerprint: "b0a7d002".to_string(),
                    seed_fingerprint: "5eed0003".to_string(),
                    started_at: BASE_TIME,
                    finished_at: Some(BASE_TIME + Duration::seconds(30)),
                    duration_ms: Some(30_000),
                    provenance: ProvenanceInfo::default(),
                    error: None,
                    tags: Vec::new(),
                    warnings: Vec::new(),
                    notes: None,
                },
                params: Map::new(),
                metrics: Map::new(),
                derived_metrics: Map::new(),
                artifacts: Vec::new(),
            },
        }
    }

    /// Shifts the start time by whole minutes.
    pub fn started_minute(mut self, minutes: usize) -> Self {
        let minutes = i64::try_from(minutes).unwrap();
        self.run.record.started_at = BASE_TIME + Duration::minutes(minutes);
        self
    }

    /// Sets the run status.
    pub fn status(mut self, status: RunStatus) -> Self {
        self.run.record.status = status;
        self
    }

    /// Sets all three fingerprints.
    pub fn fingerprints(mut self, context: &str, params: &str, seed: &str) -> Self {
        self.run.record.context_fingerprint = context.to_string();
        self.run.record.params_fingerprint = params.to_string();
        self.run.record.seed_fingerprint = seed.to_string();
        self
    }

    /// Adds a run tag.
    pub fn tag(mut self, tag: &str) -> Self {
        self.run.record.tags.push(tag.to_string());
        self
    }

    /// Sets a resolved parameter.
    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.run.params.insert(key.to_string(), value);
        self
    }

    /// Sets a metric.
    pub fn metric(mut self, key: &str, value: Value) -> Self {
        self.run.metrics.insert(key.to_string(), value);
        self
    }

    /// Sets a derived metric.
    pub fn derived(mut self, key: &str, value: Value) -> Self {
        self.run.derived_metrics.insert(key.to_string(), value);
        self
    }

    /// Finishes the run.
    pub fn build(self) -> RunResponse {
        self.run
    }
}
