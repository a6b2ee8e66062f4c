// crates/run-atlas-core/src/interfaces/mod.rs
// ============================================================================
// Module: Run Atlas Interfaces
// Description: Backend-agnostic run store contracts and capability traits.
// Purpose: Define the surfaces every run store backend implements.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`RunStore`] is the read contract every backend implements. Backends that
//! can compute aggregates, histograms, search, and field values natively also
//! implement [`SqlPushdown`]; the capability is chosen once when a
//! [`crate::runtime::Backend`] is constructed.
//!
//! Absence is never an error: unknown runs, experiments, or manifests come
//! back as `None` or empty collections. Errors mean the backend failed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AggregateRequest;
use crate::core::AggregateResponse;
use crate::core::ExperimentId;
use crate::core::ExperimentInfo;
use crate::core::FieldIndex;
use crate::core::FieldValuesRequest;
use crate::core::FieldValuesResponse;
use crate::core::FilterSpec;
use crate::core::HistogramRequest;
use crate::core::HistogramResponse;
use crate::core::ManifestInfo;
use crate::core::ManifestResponse;
use crate::core::ResultEntry;
use crate::core::RunId;
use crate::core::RunPage;
use crate::core::RunQuery;
use crate::core::RunResponse;
use crate::core::SearchRequest;
use crate::core::SearchResponse;
use crate::core::StatusCounts;
use crate::runtime::cache::LockPoisoned;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Run store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failed (connection, pool, or statement execution).
    #[error("run store io error: {0}")]
    Io(String),
    /// Request was rejected before reaching the backend.
    #[error("run store invalid request: {0}")]
    Invalid(String),
    /// Stored data could not be decoded.
    #[error("run store corruption: {0}")]
    Corrupt(String),
}

impl From<LockPoisoned> for StoreError {
    fn from(err: LockPoisoned) -> Self {
        Self::Io(err.to_string())
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Read-only run store.
pub trait RunStore: Send + Sync {
    /// Lists one page of runs matching the query, with the total match count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn query_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError>;

    /// Fetches one run with its full payload, artifacts included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn get_run(&self, run_id: &RunId) -> Result<Option<RunResponse>, StoreError>;

    /// Returns the field index for the filter's experiment, or for all runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn field_index(&self, filter: Option<&FilterSpec>) -> Result<FieldIndex, StoreError>;

    /// Lists experiments with run counts, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>, StoreError>;

    /// Counts runs per status for one experiment, or for all runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn status_counts(&self, experiment_id: Option<&ExperimentId>) -> Result<StatusCounts, StoreError>;

    /// Lists manifest versions of an experiment, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_manifests(&self, experiment_id: &ExperimentId) -> Result<Vec<ManifestInfo>, StoreError>;

    /// Fetches one manifest version, or the latest when `timestamp` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn get_manifest(
        &self,
        experiment_id: &ExperimentId,
        timestamp: Option<&str>,
    ) -> Result<Option<ManifestResponse>, StoreError>;

    /// Lists structured result names captured by a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_results(&self, run_id: &RunId) -> Result<Vec<String>, StoreError>;

    /// Fetches one structured result of a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn get_result(&self, run_id: &RunId, name: &str) -> Result<Option<ResultEntry>, StoreError>;

    /// Clears caches and forces rediscovery on next use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when rediscovery fails.
    fn refresh(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: SQL Pushdown
// ============================================================================

/// Capability: compute reports inside the backend instead of in memory.
pub trait SqlPushdown: RunStore {
    /// Computes grouped statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn aggregate(&self, request: &AggregateRequest) -> Result<AggregateResponse, StoreError>;

    /// Computes an equal-width histogram.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the request is invalid or the backend fails.
    fn histogram(&self, request: &HistogramRequest) -> Result<HistogramResponse, StoreError>;

    /// Runs the categorized search.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError>;

    /// Extracts raw field values, sampling when the match count is large.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the request is invalid or the backend fails.
    fn field_values(&self, request: &FieldValuesRequest) -> Result<FieldValuesResponse, StoreError>;
}
