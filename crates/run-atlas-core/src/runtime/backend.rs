// crates/run-atlas-core/src/runtime/backend.rs
// ============================================================================
// Module: Backend Capability Dispatch
// Description: Store handle tagged with its report capability.
// Purpose: Choose pushdown or in-memory reports once, at construction.
// Dependencies: crate::interfaces, crate::runtime::fallback
// ============================================================================

//! ## Overview
//! [`Backend`] wraps a store and records whether it can compute reports
//! natively. Report calls dispatch on the variant; plain store calls pass
//! straight through, so a `Backend` is itself a [`RunStore`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

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
use crate::core::histogram::MAX_BIN_COUNT;
use crate::interfaces::RunStore;
use crate::interfaces::SqlPushdown;
use crate::interfaces::StoreError;
use crate::runtime::fallback;

// ============================================================================
// SECTION: Backend
// ============================================================================

/// Run store tagged with its report capability.
#[derive(Clone)]
pub enum Backend {
    /// Store without native reports; reports run in memory.
    Generic(Arc<dyn RunStore>),
    /// Store that computes reports natively.
    SqlNative(Arc<dyn SqlPushdown>),
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic(_) => f.write_str("Backend::Generic"),
            Self::SqlNative(_) => f.write_str("Backend::SqlNative"),
        }
    }
}

impl Backend {
    /// Wraps a store without native reports.
    #[must_use]
    pub fn generic(store: Arc<dyn RunStore>) -> Self {
        Self::Generic(store)
    }

    /// Wraps a store with native reports.
    #[must_use]
    pub fn sql_native(store: Arc<dyn SqlPushdown>) -> Self {
        Self::SqlNative(store)
    }

    /// Returns true when reports are computed by the backend.
    #[must_use]
    pub const fn has_pushdown(&self) -> bool {
        matches!(self, Self::SqlNative(_))
    }

    /// Computes grouped statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying store fails.
    pub fn aggregate(&self, request: &AggregateRequest) -> Result<AggregateResponse, StoreError> {
        match self {
            Self::Generic(store) => fallback::aggregate(store.as_ref(), request),
            Self::SqlNative(store) => store.aggregate(request),
        }
    }

    /// Computes an equal-width histogram.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the request is invalid or the store fails.
    pub fn histogram(&self, request: &HistogramRequest) -> Result<HistogramResponse, StoreError> {
        match self {
            Self::Generic(store) => fallback::histogram(store.as_ref(), request, MAX_BIN_COUNT),
            Self::SqlNative(store) => store.histogram(request),
        }
    }

    /// Runs the categorized search.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying store fails.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        match self {
            Self::Generic(store) => fallback::search(store.as_ref(), request),
            Self::SqlNative(store) => store.search(request),
        }
    }

    /// Extracts raw field values.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the request is invalid or the store fails.
    pub fn field_values(&self, request: &FieldValuesRequest) -> Result<FieldValuesResponse, StoreError> {
        match self {
            Self::Generic(store) => fallback::field_values(store.as_ref(), request),
            Self::SqlNative(store) => store.field_values(request),
        }
    }
}

/// Forwards a [`RunStore`] call to whichever store the backend wraps.
macro_rules! forward {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {
        match $self {
            Backend::Generic(store) => store.$method($($arg),*),
            Backend::SqlNative(store) => store.$method($($arg),*),
        }
    };
}

impl RunStore for Backend {
    fn query_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError> {
        forward!(self, query_runs(query))
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<RunResponse>, StoreError> {
        forward!(self, get_run(run_id))
    }

    fn field_index(&self, filter: Option<&FilterSpec>) -> Result<FieldIndex, StoreError> {
        forward!(self, field_index(filter))
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>, StoreError> {
        forward!(self, list_experiments())
    }

    fn status_counts(&self, experiment_id: Option<&ExperimentId>) -> Result<StatusCounts, StoreError> {
        forward!(self, status_counts(experiment_id))
    }

    fn list_manifests(&self, experiment_id: &ExperimentId) -> Result<Vec<ManifestInfo>, StoreError> {
        forward!(self, list_manifests(experiment_id))
    }

    fn get_manifest(
        &self,
        experiment_id: &ExperimentId,
        timestamp: Option<&str>,
    ) -> Result<Option<ManifestResponse>, StoreError> {
        forward!(self, get_manifest(experiment_id, timestamp))
    }

    fn list_results(&self, run_id: &RunId) -> Result<Vec<String>, StoreError> {
        forward!(self, list_results(run_id))
    }

    fn get_result(&self, run_id: &RunId, name: &str) -> Result<Option<ResultEntry>, StoreError> {
        forward!(self, get_result(run_id, name))
    }

    fn refresh(&self) -> Result<(), StoreError> {
        forward!(self, refresh())
    }
}
