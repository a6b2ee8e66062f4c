// crates/run-atlas-core/src/lib.rs
// ============================================================================
// Module: Run Atlas Core Library
// Description: Public API surface for the Run Atlas core.
// Purpose: Expose run models, store interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Run Atlas core is the backend-agnostic half of a read-only query layer over
//! machine-learning experiment runs. It defines the filter, aggregate,
//! histogram, and search wire formats, the [`RunStore`] contract, and the
//! in-memory fallbacks used by backends without native pushdown.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::RunStore;
pub use interfaces::SqlPushdown;
pub use interfaces::StoreError;
pub use runtime::Backend;
pub use runtime::InMemoryRunStore;
pub use runtime::LockPoisoned;
pub use runtime::StoreRegistry;
pub use runtime::Summary;
pub use runtime::TtlCache;
