// crates/run-atlas-config/src/lib.rs
// ============================================================================
// Module: Run Atlas Config Library
// Description: Canonical configuration model and validation.
// Purpose: Single source of truth for run-atlas.toml semantics.
// Dependencies: run-atlas-core, run-atlas-store-postgres, serde, toml
// ============================================================================

//! ## Overview
//! `run-atlas-config` defines the configuration model for a Run Atlas host:
//! store connection and pool settings, cache lifetimes, and query limits. It
//! loads `run-atlas.toml` with fail-closed validation and converts the result
//! into a [`run_atlas_store_postgres::PostgresStoreConfig`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
