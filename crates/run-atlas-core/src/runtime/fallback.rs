// crates/run-atlas-core/src/runtime/fallback.rs
// ============================================================================
// Module: Generic Report Fallbacks
// Description: In-memory aggregate, histogram, search, and field values.
// Purpose: Serve reports from backends without native pushdown.
// Dependencies: crate::core, crate::interfaces, crate::runtime::stats, tracing
// ============================================================================

//! ## Overview
//! Fallbacks page through [`RunStore::query_runs`] to materialize matching
//! runs (bounded at [`MAX_FALLBACK_RUNS`]) and compute reports in memory with
//! the same semantics as the SQL engine: null x and non-numeric y are
//! excluded, series are sorted by name and points by x, and histogram buckets
//! are clamped into range.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::core::AggregateRequest;
use crate::core::AggregateResponse;
use crate::core::DataPoint;
use crate::core::ExperimentInfo;
use crate::core::FieldFilter;
use crate::core::FieldNamespace;
use crate::core::FieldRef;
use crate::core::FieldValuesRequest;
use crate::core::FieldValuesResponse;
use crate::core::FilterOp;
use crate::core::FilterSpec;
use crate::core::HistogramRequest;
use crate::core::HistogramResponse;
use crate::core::RunQuery;
use crate::core::RunResponse;
use crate::core::SearchGroup;
use crate::core::SearchHit;
use crate::core::SearchRequest;
use crate::core::SearchResponse;
use crate::core::Series;
use crate::core::XValue;
use crate::core::aggregate::MAX_SAMPLE_RUN_IDS;
use crate::core::aggregate::group_key;
use crate::core::field::numeric_value;
use crate::core::field::text_value;
use crate::core::filter::MAX_PAGE_SIZE;
use crate::core::histogram::BinLayout;
use crate::core::search::SearchCategory;
use crate::core::search::matches_query;
use crate::core::values::plot_value;
use crate::interfaces::RunStore;
use crate::interfaces::StoreError;
use crate::runtime::stats::Summary;
use crate::runtime::stats::error_bounds;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Largest number of runs materialized by a fallback report.
pub const MAX_FALLBACK_RUNS: u64 = 100_000;

// ============================================================================
// SECTION: Run Collection
// ============================================================================

/// Collects every run matching `filter`, up to [`MAX_FALLBACK_RUNS`].
///
/// # Errors
///
/// Returns [`StoreError`] when a page query fails.
pub fn collect_runs(store: &dyn RunStore, filter: Option<&FilterSpec>) -> Result<Vec<RunResponse>, StoreError> {
    let mut runs = Vec::new();
    let mut offset = 0_u64;
    loop {
        let page = store.query_runs(&RunQuery::page(filter.cloned(), MAX_PAGE_SIZE, offset))?;
        if page.runs.is_empty() {
            break;
        }
        offset += u64::try_from(page.runs.len()).unwrap_or(u64::MAX);
        runs.extend(page.runs);
        if offset >= page.total || offset >= MAX_FALLBACK_RUNS {
            break;
        }
    }
    runs.truncate(usize::try_from(MAX_FALLBACK_RUNS).unwrap_or(usize::MAX));
    debug!(runs = runs.len(), "collected runs for in-memory report");
    Ok(runs)
}

// ============================================================================
// SECTION: Aggregate
// ============================================================================

/// Values collected for one x coordinate.
#[derive(Debug, Default)]
struct PointValues {
    /// Y values.
    ys: Vec<f64>,
    /// Contributing run ids.
    run_ids: Vec<String>,
}

/// Computes grouped statistics in memory.
///
/// # Errors
///
/// Returns [`StoreError`] when collecting runs fails.
pub fn aggregate(store: &dyn RunStore, request: &AggregateRequest) -> Result<AggregateResponse, StoreError> {
    let runs = collect_runs(store, request.filter.as_ref())?;
    Ok(aggregate_runs(&runs, request))
}

/// Computes grouped statistics over already materialized runs.
#[must_use]
pub fn aggregate_runs(runs: &[RunResponse], request: &AggregateRequest) -> AggregateResponse {
    let x_ref = FieldRef::parse(&request.x_field);
    let y_ref = FieldRef::parse(&request.y_field);
    let group_refs: Vec<FieldRef> = request.group_by.iter().map(|field| FieldRef::parse(field)).collect();

    let mut groups: BTreeMap<String, BTreeMap<String, PointValues>> = BTreeMap::new();
    for run in runs {
        let Some(x) = x_ref.value_of(run) else {
            continue;
        };
        let Some(y) = y_ref.value_of(run).as_ref().and_then(numeric_value) else {
            continue;
        };
        let parts: Vec<String> =
            group_refs.iter().map(|field| field.value_of(run).map(|value| text_value(&value)).unwrap_or_default()).collect();
        let point = groups.entry(group_key(&parts)).or_default().entry(text_value(&x)).or_default();
        point.ys.push(y);
        point.run_ids.push(run.record.run_id.to_string());
    }

    let series = groups
        .into_iter()
        .map(|(name, points)| Series {
            name,
            points: points.into_iter().filter_map(|(x, values)| build_point(&x, values, request)).collect(),
        })
        .filter(|series| !series.points.is_empty())
        .collect();
    AggregateResponse::from_series(request, series)
}

/// Builds one data point from the values collected for `x`.
fn build_point(x: &str, mut values: PointValues, request: &AggregateRequest) -> Option<DataPoint> {
    let summary = Summary::of(&values.ys)?;
    let y = summary.aggregate(request.agg_fn);
    let (y_low, y_high) = error_bounds(request.error_bars, y, summary.std, summary.n);
    values.run_ids.sort();
    values.run_ids.truncate(MAX_SAMPLE_RUN_IDS);
    Some(DataPoint {
        x: XValue::from_text(x),
        y,
        y_low,
        y_high,
        n: summary.n,
        run_ids: values.run_ids,
        y_min: summary.min,
        y_q1: summary.q1,
        y_median: summary.median,
        y_q3: summary.q3,
        y_max: summary.max,
    })
}

// ============================================================================
// SECTION: Histogram
// ============================================================================

/// Computes an equal-width histogram in memory.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] when the bin count is outside
/// `1..=max_bins`, or the collection error when paging fails.
pub fn histogram(store: &dyn RunStore, request: &HistogramRequest, max_bins: u32) -> Result<HistogramResponse, StoreError> {
    if !request.has_valid_bin_count(max_bins) {
        return Err(StoreError::Invalid(format!("bin_count must be between 1 and {max_bins}")));
    }
    let runs = collect_runs(store, request.filter.as_ref())?;
    Ok(histogram_runs(&runs, request))
}

/// Bins already materialized runs.
#[must_use]
pub fn histogram_runs(runs: &[RunResponse], request: &HistogramRequest) -> HistogramResponse {
    let field = FieldRef::parse(&request.field);
    let values: Vec<(f64, &str)> = runs
        .iter()
        .filter_map(|run| {
            let value = field.value_of(run)?;
            Some((numeric_value(&value)?, run.record.run_id.as_str()))
        })
        .collect();
    let Some(min) = values.iter().map(|(value, _)| *value).min_by(f64::total_cmp) else {
        return HistogramResponse::empty(&request.field);
    };
    let max = values.iter().map(|(value, _)| *value).max_by(f64::total_cmp).unwrap_or(min);
    let layout = BinLayout::new(min, max, request.bin_count);
    let bins = layout.edges();
    let mut counts = vec![0_u64; bins.len() - 1];
    let mut run_ids_per_bin = vec![Vec::new(); counts.len()];
    for (value, run_id) in &values {
        let bucket = layout.bucket(*value);
        counts[bucket] += 1;
        run_ids_per_bin[bucket].push((*run_id).to_string());
    }
    for run_ids in &mut run_ids_per_bin {
        run_ids.sort();
        run_ids.truncate(MAX_SAMPLE_RUN_IDS);
    }
    HistogramResponse {
        field: request.field.clone(),
        bins,
        counts,
        total: u64::try_from(values.len()).unwrap_or(u64::MAX),
        run_ids_per_bin,
    }
}

// ============================================================================
// SECTION: Search
// ============================================================================

/// Runs the categorized search by reusing store primitives.
///
/// # Errors
///
/// Returns [`StoreError`] when a store primitive fails.
pub fn search(store: &dyn RunStore, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
    let Some(q) = request.query() else {
        return Ok(SearchResponse::from_groups(&request.q, Vec::new()));
    };
    let limit = request.limit.max(1);
    let experiments = store.list_experiments()?;
    let groups = vec![
        search_experiments(&experiments, q, limit),
        search_field_names(store, &experiments, q, limit, FieldNamespace::Params)?,
        search_field_names(store, &experiments, q, limit, FieldNamespace::Metrics)?,
        search_field_names(store, &experiments, q, limit, FieldNamespace::Derived)?,
        search_runs(store, "record.run_id", SearchCategory::Runs, q, limit)?,
        search_fingerprints(store, q, limit)?,
        search_experiment_tags(store, &experiments, q, limit)?,
        search_runs(store, "record.tags", SearchCategory::RunTags, q, limit)?,
    ];
    Ok(SearchResponse::from_groups(q, groups))
}

/// Converts a hit counter into a total.
fn to_total(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// Returns the limit as a collection length.
fn limit_len(limit: u32) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Matches experiment identifiers.
fn search_experiments(experiments: &[ExperimentInfo], q: &str, limit: u32) -> SearchGroup {
    let matched: Vec<&ExperimentInfo> =
        experiments.iter().filter(|info| matches_query(q, info.experiment_id.as_str())).collect();
    let hits = matched
        .iter()
        .take(limit_len(limit))
        .map(|info| SearchHit::experiment(info.experiment_id.as_str(), format!("{} runs", info.run_count)))
        .collect();
    SearchGroup::new(SearchCategory::Experiments, hits, to_total(matched.len()))
}

/// Finds experiments defining a field of `namespace` whose name matches.
fn search_field_names(
    store: &dyn RunStore,
    experiments: &[ExperimentInfo],
    q: &str,
    limit: u32,
    namespace: FieldNamespace,
) -> Result<SearchGroup, StoreError> {
    let category = match namespace {
        FieldNamespace::Params => SearchCategory::ParamNames,
        FieldNamespace::Metrics => SearchCategory::MetricNames,
        FieldNamespace::Record | FieldNamespace::Derived => SearchCategory::DerivedNames,
    };
    let mut hits = Vec::new();
    let mut total = 0_usize;
    for info in experiments {
        let index = store.field_index(Some(&FilterSpec::for_experiment(info.experiment_id.clone())))?;
        let Some(field_name) = index.fields(namespace).keys().find(|name| matches_query(q, name)) else {
            continue;
        };
        total += 1;
        if hits.len() < limit_len(limit) {
            let mut hit =
                SearchHit::experiment(info.experiment_id.as_str(), format!("{field_name} · {} runs", info.run_count));
            hit.field = Some(format!("{}.{field_name}", namespace.as_str()));
            hits.push(hit);
        }
    }
    Ok(SearchGroup::new(category, hits, to_total(total)))
}

/// Matches runs through a `contains` filter on one record field.
fn search_runs(
    store: &dyn RunStore,
    field: &str,
    category: SearchCategory,
    q: &str,
    limit: u32,
) -> Result<SearchGroup, StoreError> {
    let filter = FilterSpec::default().with_field_filter(FieldFilter::new(field, FilterOp::Contains, q));
    let page = store.query_runs(&RunQuery::page(Some(filter), limit, 0))?;
    let hits = page
        .runs
        .iter()
        .map(|run| SearchHit::run(run.record.run_id.as_str(), run.record.experiment_id.as_str()))
        .collect();
    Ok(SearchGroup::new(category, hits, page.total))
}

/// Matches any of the three fingerprints, deduplicated by run id.
fn search_fingerprints(store: &dyn RunStore, q: &str, limit: u32) -> Result<SearchGroup, StoreError> {
    let mut seen = BTreeSet::new();
    let mut hits = Vec::new();
    for field in ["record.context_fingerprint", "record.params_fingerprint", "record.seed_fingerprint"] {
        if hits.len() >= limit_len(limit) {
            break;
        }
        let filter = FilterSpec::default().with_field_filter(FieldFilter::new(field, FilterOp::Contains, q));
        let page = store.query_runs(&RunQuery::page(Some(filter), limit.saturating_mul(2), 0))?;
        for run in page.runs {
            if !seen.insert(run.record.run_id.clone()) {
                continue;
            }
            hits.push(SearchHit::run(run.record.run_id.as_str(), run.record.experiment_id.as_str()));
            if hits.len() >= limit_len(limit) {
                break;
            }
        }
    }
    Ok(SearchGroup::approximate(SearchCategory::Fingerprints, hits, limit))
}

/// Matches tags of each experiment's latest manifest.
fn search_experiment_tags(
    store: &dyn RunStore,
    experiments: &[ExperimentInfo],
    q: &str,
    limit: u32,
) -> Result<SearchGroup, StoreError> {
    let mut hits = Vec::new();
    let mut total = 0_usize;
    for info in experiments {
        let Some(manifest) = store.get_manifest(&info.experiment_id, None)? else {
            continue;
        };
        let Some(tag) = manifest.tags.iter().find(|tag| matches_query(q, tag)) else {
            continue;
        };
        total += 1;
        if hits.len() < limit_len(limit) {
            hits.push(SearchHit::experiment(
                info.experiment_id.as_str(),
                format!("tag: {tag} · {} runs", info.run_count),
            ));
        }
    }
    Ok(SearchGroup::new(SearchCategory::Tags, hits, to_total(total)))
}

// ============================================================================
// SECTION: Field Values
// ============================================================================

/// Extracts raw field values in memory, sampling reproducibly when needed.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] for out-of-range requests, or the
/// collection error when paging fails.
pub fn field_values(store: &dyn RunStore, request: &FieldValuesRequest) -> Result<FieldValuesResponse, StoreError> {
    if let Some(violation) = request.violation() {
        return Err(StoreError::Invalid(violation));
    }
    let runs = collect_runs(store, request.filter.as_ref())?;
    Ok(field_values_runs(&runs, request))
}

/// Extracts raw field values from already materialized runs.
#[must_use]
pub fn field_values_runs(runs: &[RunResponse], request: &FieldValuesRequest) -> FieldValuesResponse {
    let total = runs.len();
    let max_points = usize::try_from(request.max_points).unwrap_or(usize::MAX);
    let sampled = total > max_points;
    let selected: Vec<&RunResponse> = if sampled {
        let seed = request.normalized_seed().to_bits();
        let mut keyed: Vec<(u64, usize)> =
            runs.iter().enumerate().map(|(index, run)| (sample_key(seed, run.record.run_id.as_str()), index)).collect();
        keyed.sort_unstable();
        keyed.truncate(max_points);
        let mut indices: Vec<usize> = keyed.into_iter().map(|(_, index)| index).collect();
        indices.sort_unstable();
        indices.into_iter().filter_map(|index| runs.get(index)).collect()
    } else {
        runs.iter().collect()
    };

    let mut response = request.empty_response();
    for path in &request.fields {
        let field = FieldRef::parse(path);
        let column: Vec<Value> = selected
            .iter()
            .map(|run| plot_value(field.value_of(run).map(|value| text_value(&value)).as_deref()))
            .collect();
        response.fields.insert(path.clone(), column);
    }
    if request.include_run_ids {
        response.run_ids = Some(selected.iter().map(|run| run.record.run_id.to_string()).collect());
    }
    response.total = to_total(total);
    response.returned = to_total(selected.len());
    response.sampled = sampled;
    response
}

/// Deterministic FNV-1a sampling key over a seed and run id.
fn sample_key(seed: u64, run_id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    seed.to_le_bytes()
        .iter()
        .chain(run_id.as_bytes())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}
