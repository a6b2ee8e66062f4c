// crates/run-atlas-core/src/runtime/store.rs
// ============================================================================
// Module: Run Atlas In-Memory Store
// Description: Simple in-memory run store for tests and demos.
// Purpose: Provide a deterministic store implementation without a database.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryRunStore`] implements [`RunStore`] over maps guarded by a mutex.
//! It evaluates filters with the same permissive rules as the SQL engine:
//! unknown namespaces and ordering on non-column record keys are no-ops. It
//! has no native reports, so it is wrapped as [`crate::runtime::Backend::Generic`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde_json::Value;

use crate::core::ExperimentId;
use crate::core::ExperimentInfo;
use crate::core::FieldFilter;
use crate::core::FieldIndex;
use crate::core::FieldNamespace;
use crate::core::FieldRef;
use crate::core::FilterOp;
use crate::core::FilterSpec;
use crate::core::ManifestInfo;
use crate::core::ManifestResponse;
use crate::core::RecordColumn;
use crate::core::ResultEntry;
use crate::core::RunId;
use crate::core::RunPage;
use crate::core::RunQuery;
use crate::core::RunResponse;
use crate::core::SortOrder;
use crate::core::StatusCounts;
use crate::core::field::FieldStats;
use crate::core::field::finish_stats;
use crate::core::field::numeric_value;
use crate::core::field::observe_object;
use crate::core::field::text_value;
use crate::core::filter::MAX_PAGE_SIZE;
use crate::core::run::parse_timestamp;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Stored manifest version.
#[derive(Debug, Clone)]
struct StoredManifest {
    /// Listing metadata.
    info: ManifestInfo,
    /// Full manifest.
    manifest: ManifestResponse,
}

/// Store contents.
#[derive(Debug, Default)]
struct Contents {
    /// Runs keyed by run id.
    runs: BTreeMap<RunId, RunResponse>,
    /// Manifest versions per experiment.
    manifests: BTreeMap<ExperimentId, Vec<StoredManifest>>,
    /// Structured results keyed by run id and name.
    results: BTreeMap<(RunId, String), ResultEntry>,
}

/// In-memory run store for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    /// Store contents protected by a mutex.
    contents: Arc<Mutex<Contents>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store contents.
    fn lock(&self) -> Result<MutexGuard<'_, Contents>, StoreError> {
        self.contents.lock().map_err(|_| StoreError::Io("in-memory run store mutex poisoned".to_string()))
    }

    /// Inserts or replaces a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn insert_run(&self, mut run: RunResponse) -> Result<(), StoreError> {
        run.record.enforce_running_invariant();
        self.lock()?.runs.insert(run.record.run_id.clone(), run);
        Ok(())
    }

    /// Adds a manifest version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn insert_manifest(&self, info: ManifestInfo, manifest: ManifestResponse) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let versions = guard.manifests.entry(info.experiment_id.clone()).or_default();
        versions.retain(|stored| stored.info.timestamp != info.timestamp);
        versions.push(StoredManifest { info, manifest });
        versions.sort_by(|left, right| right.info.submitted_at.cmp(&left.info.submitted_at));
        drop(guard);
        Ok(())
    }

    /// Inserts or replaces a structured result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn insert_result(&self, run_id: &RunId, entry: ResultEntry) -> Result<(), StoreError> {
        self.lock()?.results.insert((run_id.clone(), entry.name.clone()), entry);
        Ok(())
    }

    /// Returns clones of every run matching `filter`.
    fn matching_runs(&self, filter: Option<&FilterSpec>) -> Result<Vec<RunResponse>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.runs.values().filter(|run| filter.is_none_or(|filter| matches_filter(run, filter))).cloned().collect())
    }
}

impl RunStore for InMemoryRunStore {
    fn query_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError> {
        let mut runs = self.matching_runs(query.filter.as_ref())?;
        let sort = query.sort_field.as_deref().map_or(FieldRef::Column(RecordColumn::StartedAt), FieldRef::parse);
        runs.sort_by(|left, right| {
            let ordering = compare_sort_values(sort.value_of(left).as_ref(), sort.value_of(right).as_ref(), query.sort_order);
            ordering.then_with(|| match query.sort_order {
                SortOrder::Asc => left.record.run_id.cmp(&right.record.run_id),
                SortOrder::Desc => right.record.run_id.cmp(&left.record.run_id),
            })
        });
        let total = u64::try_from(runs.len()).unwrap_or(u64::MAX);
        let limit = query.effective_limit(MAX_PAGE_SIZE);
        let page = runs
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|mut run| {
                run.artifacts.clear();
                run
            })
            .collect();
        Ok(RunPage {
            runs: page,
            total,
            limit,
            offset: query.offset,
        })
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<RunResponse>, StoreError> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    fn field_index(&self, filter: Option<&FilterSpec>) -> Result<FieldIndex, StoreError> {
        let scope = filter.and_then(|filter| filter.experiment_id.clone()).map(FilterSpec::for_experiment);
        let runs = self.matching_runs(scope.as_ref())?;
        let mut params: BTreeMap<String, FieldStats> = BTreeMap::new();
        let mut metrics: BTreeMap<String, FieldStats> = BTreeMap::new();
        let mut derived: BTreeMap<String, FieldStats> = BTreeMap::new();
        for run in &runs {
            observe_object(&mut params, &run.params);
            observe_object(&mut metrics, &run.metrics);
            observe_object(&mut derived, &run.derived_metrics);
        }
        let mut index = FieldIndex::empty();
        index.run_count = u64::try_from(runs.len()).unwrap_or(u64::MAX);
        *index.fields_mut(FieldNamespace::Params) = finish_stats(params);
        *index.fields_mut(FieldNamespace::Metrics) = finish_stats(metrics);
        *index.fields_mut(FieldNamespace::Derived) = finish_stats(derived);
        Ok(index)
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>, StoreError> {
        let guard = self.lock()?;
        let mut experiments: BTreeMap<&ExperimentId, ExperimentInfo> = BTreeMap::new();
        for run in guard.runs.values() {
            let entry = experiments.entry(&run.record.experiment_id).or_insert_with(|| ExperimentInfo {
                experiment_id: run.record.experiment_id.clone(),
                run_count: 0,
                latest_run: None,
            });
            entry.run_count += 1;
            entry.latest_run = entry.latest_run.max(Some(run.record.started_at));
        }
        let mut listing: Vec<ExperimentInfo> = experiments.into_values().collect();
        drop(guard);
        listing.sort_by(|left, right| match (left.latest_run, right.latest_run) {
            (Some(left), Some(right)) => right.cmp(&left),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        Ok(listing)
    }

    fn status_counts(&self, experiment_id: Option<&ExperimentId>) -> Result<StatusCounts, StoreError> {
        let guard = self.lock()?;
        let mut counts = StatusCounts::default();
        for run in guard.runs.values() {
            if experiment_id.is_none_or(|id| *id == run.record.experiment_id) {
                counts.add(Some(run.record.status), 1);
            }
        }
        drop(guard);
        Ok(counts)
    }

    fn list_manifests(&self, experiment_id: &ExperimentId) -> Result<Vec<ManifestInfo>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .manifests
            .get(experiment_id)
            .map(|versions| versions.iter().map(|stored| stored.info.clone()).collect())
            .unwrap_or_default())
    }

    fn get_manifest(
        &self,
        experiment_id: &ExperimentId,
        timestamp: Option<&str>,
    ) -> Result<Option<ManifestResponse>, StoreError> {
        let guard = self.lock()?;
        let Some(versions) = guard.manifests.get(experiment_id) else {
            return Ok(None);
        };
        let found = match timestamp {
            Some(timestamp) => versions.iter().find(|stored| stored.info.timestamp == timestamp),
            None => versions.first(),
        };
        Ok(found.map(|stored| stored.manifest.clone()))
    }

    fn list_results(&self, run_id: &RunId) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.results.keys().filter(|(owner, _)| owner == run_id).map(|(_, name)| name.clone()).collect())
    }

    fn get_result(&self, run_id: &RunId, name: &str) -> Result<Option<ResultEntry>, StoreError> {
        Ok(self.lock()?.results.get(&(run_id.clone(), name.to_string())).cloned())
    }

    fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Filter Evaluation
// ============================================================================

/// Returns true when `run` satisfies every constraint of `filter`.
fn matches_filter(run: &RunResponse, filter: &FilterSpec) -> bool {
    let record = &run.record;
    if filter.experiment_id.as_ref().is_some_and(|id| *id != record.experiment_id) {
        return false;
    }
    if filter.status.as_ref().is_some_and(|statuses| !statuses.is_empty() && !statuses.contains(&record.status)) {
        return false;
    }
    if filter.started_after.is_some_and(|after| record.started_at < after) {
        return false;
    }
    if filter.started_before.is_some_and(|before| record.started_at > before) {
        return false;
    }
    filter.field_filters.iter().all(|field_filter| matches_field(run, field_filter))
}

/// Evaluates one field filter. Filters that cannot apply are no-ops.
fn matches_field(run: &RunResponse, filter: &FieldFilter) -> bool {
    let field = FieldRef::parse(&filter.field);
    match &field {
        FieldRef::Unsupported => return true,
        FieldRef::RecordKey(_) if filter.op.is_ordering() => return true,
        _ => {}
    }
    let Some(actual) = field.value_of(run) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => values_equal(&actual, &filter.value),
        FilterOp::Ne => !values_equal(&actual, &filter.value),
        FilterOp::Lt => compare_values(&actual, &filter.value).is_some_and(Ordering::is_lt),
        FilterOp::Le => compare_values(&actual, &filter.value).is_some_and(Ordering::is_le),
        FilterOp::Gt => compare_values(&actual, &filter.value).is_some_and(Ordering::is_gt),
        FilterOp::Ge => compare_values(&actual, &filter.value).is_some_and(Ordering::is_ge),
        FilterOp::Contains => {
            text_value(&actual).to_lowercase().contains(&text_value(&filter.value).to_lowercase())
        }
        FilterOp::In => match &filter.value {
            Value::Array(items) => items.iter().any(|item| values_equal(&actual, item)),
            single => values_equal(&actual, single),
        },
    }
}

/// Equality with numeric coercion when the expected value is a number.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    if expected.is_number()
        && let (Some(left), Some(right)) = (numeric_value(actual), numeric_value(expected))
    {
        return (left - right).abs() <= f64::EPSILON * left.abs().max(right.abs()).max(1.0);
    }
    text_value(actual) == text_value(expected)
}

/// Ordering comparison: numeric, then timestamp, then text.
fn compare_values(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (numeric_value(actual), numeric_value(expected)) {
        return left.partial_cmp(&right);
    }
    let (left, right) = (text_value(actual), text_value(expected));
    if let (Some(left), Some(right)) = (parse_timestamp(&left), parse_timestamp(&right)) {
        return Some(left.cmp(&right));
    }
    Some(left.cmp(&right))
}

/// Sort comparison where absent values sort after present ones in either order.
fn compare_sort_values(left: Option<&Value>, right: Option<&Value>, order: SortOrder) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => {
            let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
