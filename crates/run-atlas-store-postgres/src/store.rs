// crates/run-atlas-store-postgres/src/store.rs
// ============================================================================
// Module: Postgres Run Store
// Description: Pooled, cached RunStore and SqlPushdown over Postgres.
// Purpose: Route every store operation to the right namespaces and engines.
// Dependencies: postgres, r2d2, r2d2_postgres, run-atlas-core, tracing
// ============================================================================

//! ## Overview
//! Each operation checks one connection out of the pool for its whole
//! duration and returns it on drop. Scopes come from the namespace resolver:
//! an experiment filter narrows to the experiment's namespace, otherwise
//! every namespace with a runs table is queried. Field indexes and the
//! experiment listing are cached with their own TTLs; [`RunStore::refresh`]
//! drops both and rediscovers namespaces.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use postgres::Client;
use postgres::NoTls;
use r2d2::Pool;
use r2d2::PooledConnection;
use r2d2_postgres::PostgresConnectionManager;
use run_atlas_core::AggregateRequest;
use run_atlas_core::AggregateResponse;
use run_atlas_core::Backend;
use run_atlas_core::ExperimentId;
use run_atlas_core::ExperimentInfo;
use run_atlas_core::FieldIndex;
use run_atlas_core::FieldValuesRequest;
use run_atlas_core::FieldValuesResponse;
use run_atlas_core::FilterSpec;
use run_atlas_core::HistogramRequest;
use run_atlas_core::HistogramResponse;
use run_atlas_core::ManifestInfo;
use run_atlas_core::ManifestResponse;
use run_atlas_core::ResultEntry;
use run_atlas_core::RunId;
use run_atlas_core::RunPage;
use run_atlas_core::RunQuery;
use run_atlas_core::RunResponse;
use run_atlas_core::RunStore;
use run_atlas_core::SearchRequest;
use run_atlas_core::SearchResponse;
use run_atlas_core::SqlPushdown;
use run_atlas_core::StatusCounts;
use run_atlas_core::StoreError;
use run_atlas_core::TtlCache;
use tracing::info;

use crate::aggregate;
use crate::config::ConnectionTarget;
use crate::config::PostgresStoreConfig;
use crate::error::PostgresStoreError;
use crate::experiments;
use crate::field_index;
use crate::histogram;
use crate::manifests;
use crate::resolver::NamespaceResolver;
use crate::runs;
use crate::scope::Scope;
use crate::search;
use crate::values;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Pooled Postgres connection.
type Connection = PooledConnection<PostgresConnectionManager<NoTls>>;

/// Read-only run store over a multi-namespace Postgres database.
pub struct PostgresRunStore {
    /// Connection pool, taken on drop.
    pool: Option<Pool<PostgresConnectionManager<NoTls>>>,
    /// Validated configuration.
    config: PostgresStoreConfig,
    /// Parsed connection target.
    target: ConnectionTarget,
    /// Namespace discovery.
    resolver: NamespaceResolver,
    /// Field indexes keyed by experiment id; `None` covers every namespace.
    field_indexes: TtlCache<Option<ExperimentId>, FieldIndex>,
    /// Experiment listing.
    experiments: TtlCache<(), Vec<ExperimentInfo>>,
}

impl std::fmt::Debug for PostgresRunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRunStore")
            .field("default_namespace", &self.target.default_namespace)
            .field("file_root", &self.target.file_root)
            .finish_non_exhaustive()
    }
}

impl Drop for PostgresRunStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let _ = std::thread::spawn(move || drop(pool));
        }
    }
}

impl PostgresRunStore {
    /// Connects, builds the pool, and runs the first namespace discovery.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] when the configuration is invalid, the
    /// pool cannot be built, or discovery fails.
    pub fn new(config: &PostgresStoreConfig) -> Result<Self, PostgresStoreError> {
        config.validate()?;
        let target = ConnectionTarget::parse(&config.connection)?;
        let mut pg_config = target.driver_url.parse::<postgres::Config>()?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        let options = format!("-c statement_timeout={}", config.statement_timeout_ms);
        pg_config.options(&options);
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .connection_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build(manager)?;
        let store = Self {
            pool: Some(pool),
            config: config.clone(),
            resolver: NamespaceResolver::new(config.namespace_map_ttl()),
            field_indexes: TtlCache::new("field index"),
            experiments: TtlCache::new("experiment listing"),
            target,
        };
        let mut conn = store.connection()?;
        let map = store.resolver.rediscover(&mut conn)?;
        drop(conn);
        info!(
            default_namespace = %store.target.default_namespace,
            file_root = ?store.target.file_root,
            namespaces = map.namespaces().len(),
            "postgres run store ready"
        );
        Ok(store)
    }

    /// Namespace named by the `schema` URL parameter.
    #[must_use]
    pub fn default_namespace(&self) -> &str {
        &self.target.default_namespace
    }

    /// Artifact root named by the `file_root` URL parameter.
    #[must_use]
    pub fn file_root(&self) -> Option<&str> {
        self.target.file_root.as_deref()
    }

    /// Checks a connection out of the pool.
    fn connection(&self) -> Result<Connection, PostgresStoreError> {
        Ok(self
            .pool
            .as_ref()
            .ok_or_else(|| PostgresStoreError::State("postgres store closed".to_string()))?
            .get()?)
    }

    // ------------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------------

    /// Namespaces holding runs of an experiment, or every namespace.
    fn scope_for(&self, client: &mut Client, experiment_id: Option<&ExperimentId>) -> Result<Scope, PostgresStoreError> {
        match experiment_id {
            Some(experiment_id) => Ok(self
                .resolver
                .resolve(client, experiment_id.as_str())?
                .map_or_else(Scope::empty, |namespace| Scope::new(vec![namespace]))),
            None => Ok(Scope::new(self.resolver.all_namespaces(client)?)),
        }
    }

    /// Scope selected by an optional filter.
    fn scope_for_filter(&self, client: &mut Client, filter: Option<&FilterSpec>) -> Result<Scope, PostgresStoreError> {
        self.scope_for(client, filter.and_then(|filter| filter.experiment_id.as_ref()))
    }

    /// Namespace owning an experiment when it also holds `table`.
    fn namespace_with_table(
        &self,
        client: &mut Client,
        experiment_id: &ExperimentId,
        table: &str,
    ) -> Result<Option<String>, PostgresStoreError> {
        let Some(namespace) = self.resolver.resolve(client, experiment_id.as_str())? else {
            return Ok(None);
        };
        let holders = self.resolver.namespaces_with_table(client, table)?;
        Ok(holders.contains(&namespace).then_some(namespace))
    }

    /// Namespace owning a run when it also holds the results table.
    fn results_namespace(&self, client: &mut Client, run_id: &RunId) -> Result<Option<String>, PostgresStoreError> {
        let Some(namespace) = self.resolver.namespace_for_run(client, run_id.as_str())? else {
            return Ok(None);
        };
        let holders = self.resolver.namespaces_with_table(client, "results")?;
        Ok(holders.contains(&namespace).then_some(namespace))
    }

    /// Cached experiment listing over every namespace.
    fn cached_experiments(&self, client: &mut Client) -> Result<Vec<ExperimentInfo>, PostgresStoreError> {
        let scope = Scope::new(self.resolver.all_namespaces(client)?);
        self.experiments.get_or_compute((), self.config.experiments_ttl(), || experiments::list_experiments(client, &scope))
    }
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

impl RunStore for PostgresRunStore {
    fn query_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError> {
        let mut conn = self.connection()?;
        let scope = self.scope_for(&mut conn, query.experiment_id())?;
        Ok(runs::query_runs(&mut conn, &scope, query, self.config.max_page_size)?)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<RunResponse>, StoreError> {
        let mut conn = self.connection()?;
        let Some(namespace) = self.resolver.namespace_for_run(&mut conn, run_id.as_str()).map_err(StoreError::from)?
        else {
            return Ok(None);
        };
        Ok(runs::get_run(&mut conn, &namespace, run_id)?)
    }

    fn field_index(&self, filter: Option<&FilterSpec>) -> Result<FieldIndex, StoreError> {
        let experiment_id = filter.and_then(|filter| filter.experiment_id.as_ref());
        let key = experiment_id.cloned();
        let mut conn = self.connection()?;
        let index = self.field_indexes.get_or_compute(key, self.config.field_index_ttl(), || -> Result<_, PostgresStoreError> {
            let scope = self.scope_for(&mut conn, experiment_id)?;
            field_index::build_field_index(
                &mut conn,
                &self.resolver,
                &scope,
                experiment_id.map(ExperimentId::as_str),
                self.config.introspection_sample,
            )
        })?;
        Ok(index)
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>, StoreError> {
        let mut conn = self.connection()?;
        Ok(self.cached_experiments(&mut conn)?)
    }

    fn status_counts(&self, experiment_id: Option<&ExperimentId>) -> Result<StatusCounts, StoreError> {
        let mut conn = self.connection()?;
        let scope = self.scope_for(&mut conn, experiment_id)?;
        Ok(experiments::status_counts(&mut conn, &scope, experiment_id)?)
    }

    fn list_manifests(&self, experiment_id: &ExperimentId) -> Result<Vec<ManifestInfo>, StoreError> {
        let mut conn = self.connection()?;
        let Some(namespace) = self.namespace_with_table(&mut conn, experiment_id, "experiment_manifests")? else {
            return Ok(Vec::new());
        };
        Ok(manifests::list_manifests(&mut conn, &namespace, experiment_id)?)
    }

    fn get_manifest(
        &self,
        experiment_id: &ExperimentId,
        timestamp: Option<&str>,
    ) -> Result<Option<ManifestResponse>, StoreError> {
        let mut conn = self.connection()?;
        let Some(namespace) = self.namespace_with_table(&mut conn, experiment_id, "experiment_manifests")? else {
            return Ok(None);
        };
        Ok(manifests::get_manifest(&mut conn, &namespace, experiment_id, timestamp)?)
    }

    fn list_results(&self, run_id: &RunId) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection()?;
        let Some(namespace) = self.results_namespace(&mut conn, run_id)? else {
            return Ok(Vec::new());
        };
        Ok(manifests::list_results(&mut conn, &namespace, run_id)?)
    }

    fn get_result(&self, run_id: &RunId, name: &str) -> Result<Option<ResultEntry>, StoreError> {
        let mut conn = self.connection()?;
        let Some(namespace) = self.results_namespace(&mut conn, run_id)? else {
            return Ok(None);
        };
        Ok(manifests::get_result(&mut conn, &namespace, run_id, name)?)
    }

    fn refresh(&self) -> Result<(), StoreError> {
        self.field_indexes.invalidate(None)?;
        self.experiments.invalidate(None)?;
        self.resolver.invalidate()?;
        let mut conn = self.connection()?;
        let map = self.resolver.rediscover(&mut conn)?;
        info!(namespaces = map.namespaces().len(), "postgres run store refreshed");
        Ok(())
    }
}

// ============================================================================
// SECTION: SQL Pushdown
// ============================================================================

impl SqlPushdown for PostgresRunStore {
    fn aggregate(&self, request: &AggregateRequest) -> Result<AggregateResponse, StoreError> {
        let mut conn = self.connection()?;
        let scope = self.scope_for_filter(&mut conn, request.filter.as_ref())?;
        Ok(aggregate::aggregate(&mut conn, &scope, request)?)
    }

    fn histogram(&self, request: &HistogramRequest) -> Result<HistogramResponse, StoreError> {
        let mut conn = self.connection()?;
        let scope = self.scope_for_filter(&mut conn, request.filter.as_ref())?;
        Ok(histogram::histogram(&mut conn, &scope, request, self.config.max_histogram_bins)?)
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError> {
        if request.query().is_none() {
            return Ok(SearchResponse::from_groups(&request.q, Vec::new()));
        }
        let mut conn = self.connection()?;
        let experiments = self.cached_experiments(&mut conn)?;
        let scope = self.scope_for(&mut conn, None)?;
        Ok(search::search(&mut conn, &self.resolver, &scope, &experiments, request)?)
    }

    fn field_values(&self, request: &FieldValuesRequest) -> Result<FieldValuesResponse, StoreError> {
        let mut conn = self.connection()?;
        let scope = self.scope_for_filter(&mut conn, request.filter.as_ref())?;
        Ok(values::field_values(&mut conn, &scope, request)?)
    }
}

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Connects a Postgres store and wraps it as a pushdown-capable backend.
///
/// # Errors
///
/// Returns [`PostgresStoreError`] when the store cannot be created.
pub fn postgres_backend(config: &PostgresStoreConfig) -> Result<Backend, PostgresStoreError> {
    Ok(Backend::sql_native(Arc::new(PostgresRunStore::new(config)?)))
}
