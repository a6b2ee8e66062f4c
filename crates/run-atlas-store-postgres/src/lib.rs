// crates/run-atlas-store-postgres/src/lib.rs
// ============================================================================
// Module: Run Atlas Postgres Store
// Description: Namespace-aware query, aggregation, and search engine.
// Purpose: Serve run queries and reports from multi-namespace Postgres.
// Dependencies: postgres, r2d2, r2d2_postgres, run-atlas-core, tracing, url
// ============================================================================

//! ## Overview
//! Experiments live in separate Postgres schemas (namespaces) inside one
//! database. The [`NamespaceResolver`] maps experiment ids to namespaces, a
//! [`Scope`] renders one namespace or a `UNION ALL` over several, and the
//! filter compiler turns [`run_atlas_core::FilterSpec`] values into
//! parameterized predicates. [`PostgresRunStore`] ties these together behind
//! [`run_atlas_core::RunStore`] and [`run_atlas_core::SqlPushdown`].
//!
//! Security posture: identifiers are always quoted and every user-supplied
//! value is bound as a statement parameter; JSON keys are emitted as escaped
//! string literals.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod aggregate;
pub mod config;
pub mod error;
pub mod experiments;
pub mod field_index;
pub mod filter;
pub mod histogram;
pub mod manifests;
pub mod params;
pub mod resolver;
pub mod runs;
pub mod scope;
pub mod search;
pub mod store;
pub mod values;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConnectionTarget;
pub use config::PostgresStoreConfig;
pub use config::is_postgres_url;
pub use error::PostgresStoreError;
pub use filter::CompileContext;
pub use filter::Predicate;
pub use params::SqlParam;
pub use params::SqlParams;
pub use resolver::NamespaceMap;
pub use resolver::NamespaceResolver;
pub use scope::Scope;
pub use scope::ScopeError;
pub use store::PostgresRunStore;
pub use store::postgres_backend;
