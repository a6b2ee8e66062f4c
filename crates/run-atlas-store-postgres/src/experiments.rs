// crates/run-atlas-store-postgres/src/experiments.rs
// ============================================================================
// Module: Experiment Listing
// Description: Experiment summaries and per-status run counts.
// Purpose: Serve the experiment list and status badges with grouped counts.
// Dependencies: postgres, run-atlas-core
// ============================================================================

//! ## Overview
//! Both queries group the runs table of a scope; neither touches payloads
//! beyond the start timestamp.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use run_atlas_core::ExperimentId;
use run_atlas_core::ExperimentInfo;
use run_atlas_core::RunStatus;
use run_atlas_core::StatusCounts;
use run_atlas_core::core::run::parse_timestamp;

use crate::error::PostgresStoreError;
use crate::scope::Scope;

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Lists experiments with run counts, most recently started first.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn list_experiments(client: &mut Client, scope: &Scope) -> Result<Vec<ExperimentInfo>, PostgresStoreError> {
    if scope.is_empty() {
        return Ok(Vec::new());
    }
    let table = scope.table("runs", Some("r"))?;
    let sql = format!(
        "SELECT r.experiment_id::text, COUNT(*)::bigint, MAX(r.record_json->>'started_at') AS latest FROM {table} \
         GROUP BY r.experiment_id ORDER BY latest DESC NULLS LAST, r.experiment_id"
    );
    let mut listing = Vec::new();
    for row in client.query(&sql, &[])? {
        let Some(experiment_id) = row.try_get::<_, Option<String>>(0)? else {
            continue;
        };
        let count: i64 = row.try_get(1)?;
        let latest: Option<String> = row.try_get(2)?;
        listing.push(ExperimentInfo {
            experiment_id: ExperimentId::new(experiment_id),
            run_count: u64::try_from(count).unwrap_or_default(),
            latest_run: latest.as_deref().and_then(parse_timestamp),
        });
    }
    Ok(listing)
}

/// Counts runs per status, optionally for one experiment.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the statement fails.
pub fn status_counts(
    client: &mut Client,
    scope: &Scope,
    experiment_id: Option<&ExperimentId>,
) -> Result<StatusCounts, PostgresStoreError> {
    let mut counts = StatusCounts::default();
    if scope.is_empty() {
        return Ok(counts);
    }
    let table = scope.table("runs", Some("r"))?;
    let rows = match experiment_id {
        Some(experiment_id) => client.query(
            &format!("SELECT r.status::text, COUNT(*)::bigint FROM {table} WHERE r.experiment_id = $1 GROUP BY r.status"),
            &[&experiment_id.as_str()],
        )?,
        None => client.query(&format!("SELECT r.status::text, COUNT(*)::bigint FROM {table} GROUP BY r.status"), &[])?,
    };
    for row in rows {
        let label: Option<String> = row.try_get(0)?;
        let count: i64 = row.try_get(1)?;
        counts.add(label.as_deref().and_then(RunStatus::parse), u64::try_from(count).unwrap_or_default());
    }
    Ok(counts)
}
