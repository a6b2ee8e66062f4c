// crates/run-atlas-core/src/runtime/mod.rs
// ============================================================================
// Module: Run Atlas Runtime
// Description: Caches, registries, statistics, and backend dispatch.
// Purpose: Shared runtime helpers used by every run store backend.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! Runtime modules hold the pieces that are not tied to a storage engine: the
//! TTL cache, the store registry, summary statistics, the capability-tagged
//! [`Backend`], in-memory report fallbacks, and the in-memory store.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod backend;
pub mod cache;
pub mod fallback;
pub mod registry;
pub mod stats;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use backend::Backend;
pub use cache::LockPoisoned;
pub use cache::TtlCache;
pub use registry::StoreRegistry;
pub use stats::Summary;
pub use store::InMemoryRunStore;
