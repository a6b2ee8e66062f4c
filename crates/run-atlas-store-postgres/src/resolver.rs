// crates/run-atlas-store-postgres/src/resolver.rs
// ============================================================================
// Module: Namespace Resolver
// Description: Discovers namespaces holding runs and maps experiments to them.
// Purpose: Route experiment and run lookups to the right Postgres schema.
// Dependencies: postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! A namespace is any schema with a `runs` table. Discovery lists those
//! schemas from `information_schema` and reads the distinct experiment ids of
//! each. The resulting [`NamespaceMap`] is cached with a TTL; a lookup for an
//! unknown experiment forces one rediscovery before answering `None`.
//!
//! When an experiment id appears in more than one namespace, the namespace
//! that sorts last wins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use postgres::Client;
use run_atlas_core::TtlCache;
use run_atlas_core::runtime::LockPoisoned;
use tracing::debug;
use tracing::info;

use crate::error::PostgresStoreError;
use crate::scope::quote_ident;

// ============================================================================
// SECTION: Namespace Map
// ============================================================================

/// Experiment-to-namespace map produced by one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMap {
    /// Experiment id to namespace.
    tenants: BTreeMap<String, String>,
    /// Namespaces holding a `runs` table, sorted.
    namespaces: Vec<String>,
}

impl NamespaceMap {
    /// Builds a map from `(namespace, experiment ids)` discovery rows.
    #[must_use]
    pub fn from_discovery(mut rows: Vec<(String, Vec<String>)>) -> Self {
        rows.sort_by(|left, right| left.0.cmp(&right.0));
        rows.dedup_by(|left, right| left.0 == right.0);
        let mut tenants = BTreeMap::new();
        let mut namespaces = Vec::with_capacity(rows.len());
        for (namespace, experiments) in rows {
            for experiment_id in experiments {
                tenants.insert(experiment_id, namespace.clone());
            }
            namespaces.push(namespace);
        }
        Self { tenants, namespaces }
    }

    /// Namespace of an experiment.
    #[must_use]
    pub fn namespace_of(&self, experiment_id: &str) -> Option<&str> {
        self.tenants.get(experiment_id).map(String::as_str)
    }

    /// Every discovered namespace.
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Number of known experiments.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.tenants.len()
    }
}

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Cached namespace discovery.
#[derive(Debug)]
pub struct NamespaceResolver {
    /// Lifetime of a discovery pass.
    ttl: Duration,
    /// Current namespace map.
    map: TtlCache<(), NamespaceMap>,
    /// Namespaces physically holding a given optional table.
    tables: TtlCache<String, Vec<String>>,
}

impl NamespaceResolver {
    /// Creates a resolver whose discoveries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: TtlCache::new("namespace map"),
            tables: TtlCache::new("namespace tables"),
        }
    }

    /// Returns the cached map, discovering when stale.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery fails.
    pub fn current(&self, client: &mut Client) -> Result<NamespaceMap, PostgresStoreError> {
        self.map.get_or_compute((), self.ttl, || discover(client))
    }

    /// Discovers again, replacing the cached map.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery fails.
    pub fn rediscover(&self, client: &mut Client) -> Result<NamespaceMap, PostgresStoreError> {
        let map = discover(client)?;
        self.map.insert((), map.clone(), self.ttl)?;
        self.tables.invalidate(None)?;
        info!(
            namespaces = map.namespaces().len(),
            experiments = map.experiment_count(),
            "namespace discovery complete"
        );
        Ok(map)
    }

    /// Resolves an experiment to its namespace.
    ///
    /// A miss triggers one rediscovery; still missing yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery fails.
    pub fn resolve(&self, client: &mut Client, experiment_id: &str) -> Result<Option<String>, PostgresStoreError> {
        if let Some(namespace) = self.current(client)?.namespace_of(experiment_id) {
            return Ok(Some(namespace.to_string()));
        }
        debug!(experiment_id, "experiment not in namespace map, rediscovering");
        Ok(self.rediscover(client)?.namespace_of(experiment_id).map(str::to_string))
    }

    /// Every namespace holding runs.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery fails.
    pub fn all_namespaces(&self, client: &mut Client) -> Result<Vec<String>, PostgresStoreError> {
        Ok(self.current(client)?.namespaces().to_vec())
    }

    /// Discovered namespaces that also hold `table`.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery fails.
    pub fn namespaces_with_table(&self, client: &mut Client, table: &str) -> Result<Vec<String>, PostgresStoreError> {
        let known = self.all_namespaces(client)?;
        self.tables.get_or_compute(table.to_string(), self.ttl, || -> Result<Vec<String>, PostgresStoreError> {
            let rows = client.query(
                "SELECT DISTINCT table_schema::text FROM information_schema.tables WHERE table_name = $1 \
                 AND table_schema NOT IN ('pg_catalog', 'information_schema') ORDER BY 1",
                &[&table],
            )?;
            let mut present = Vec::with_capacity(rows.len());
            for row in rows {
                let namespace: String = row.try_get(0)?;
                if known.contains(&namespace) {
                    present.push(namespace);
                }
            }
            Ok(present)
        })
    }

    /// Finds the namespace holding a run.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when discovery or a probe fails.
    pub fn namespace_for_run(&self, client: &mut Client, run_id: &str) -> Result<Option<String>, PostgresStoreError> {
        for namespace in self.all_namespaces(client)? {
            let sql = format!("SELECT 1 FROM {}.\"runs\" WHERE run_id = $1 LIMIT 1", quote_ident(&namespace));
            if client.query_opt(&sql, &[&run_id])?.is_some() {
                return Ok(Some(namespace));
            }
        }
        Ok(None)
    }

    /// Drops every cached discovery.
    ///
    /// # Errors
    ///
    /// Returns [`LockPoisoned`] when a cache mutex is poisoned.
    pub fn invalidate(&self) -> Result<(), LockPoisoned> {
        self.map.invalidate(None)?;
        self.tables.invalidate(None)
    }
}

/// Runs one discovery pass.
fn discover(client: &mut Client) -> Result<NamespaceMap, PostgresStoreError> {
    let rows = client.query(
        "SELECT DISTINCT table_schema::text FROM information_schema.tables WHERE table_name = 'runs' \
         AND table_schema NOT IN ('pg_catalog', 'information_schema') ORDER BY 1",
        &[],
    )?;
    let mut discovered = Vec::with_capacity(rows.len());
    for row in rows {
        let namespace: String = row.try_get(0)?;
        let sql = format!("SELECT DISTINCT experiment_id::text FROM {}.\"runs\"", quote_ident(&namespace));
        let experiments = client
            .query(&sql, &[])?
            .iter()
            .map(|row| row.try_get::<_, Option<String>>(0))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        discovered.push((namespace, experiments));
    }
    Ok(NamespaceMap::from_discovery(discovered))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
