// crates/run-atlas-store-postgres/src/error.rs
// ============================================================================
// Module: Postgres Store Errors
// Description: Error type for the Postgres engine and its mapping.
// Purpose: Keep driver, pool, and decode failures distinct until the seam.
// Dependencies: postgres, r2d2, run-atlas-core, thiserror
// ============================================================================

//! ## Overview
//! [`PostgresStoreError`] separates driver, pool, request, decode, and state
//! failures inside the engine. Driver errors keep the server's message and
//! SQLSTATE code. At the [`RunStore`](run_atlas_core::RunStore) seam every
//! variant collapses onto [`StoreError`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::error::Error as _;

use run_atlas_core::LockPoisoned;
use run_atlas_core::StoreError;
use thiserror::Error;

use crate::scope::ScopeError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Postgres store errors.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// Postgres error.
    #[error("postgres store error: {0}")]
    Postgres(String),
    /// Connection pool error.
    #[error("postgres pool error: {0}")]
    Pool(String),
    /// Invalid request or configuration.
    #[error("postgres store invalid data: {0}")]
    Invalid(String),
    /// Stored row could not be decoded.
    #[error("postgres store corrupt row: {0}")]
    Corrupt(String),
    /// Cache or resolver state is unusable.
    #[error("postgres store state error: {0}")]
    State(String),
}

impl From<postgres::Error> for PostgresStoreError {
    fn from(err: postgres::Error) -> Self {
        let summary = err.to_string();
        if let Some(db) = err.as_db_error() {
            return Self::Postgres(describe_db_error(&summary, db.message(), db.code().code(), db.detail()));
        }
        Self::Postgres(match err.source() {
            Some(source) => format!("{summary}: {source}"),
            None => summary,
        })
    }
}

/// Renders a server-side error with its SQLSTATE code and optional detail.
#[must_use]
pub fn describe_db_error(summary: &str, message: &str, code: &str, detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("{summary}: {message} [{code}] ({detail})"),
        None => format!("{summary}: {message} [{code}]"),
    }
}

impl From<r2d2::Error> for PostgresStoreError {
    fn from(err: r2d2::Error) -> Self {
        Self::Pool(err.to_string())
    }
}

impl From<LockPoisoned> for PostgresStoreError {
    fn from(err: LockPoisoned) -> Self {
        Self::State(err.to_string())
    }
}

impl From<ScopeError> for PostgresStoreError {
    fn from(err: ScopeError) -> Self {
        Self::State(err.to_string())
    }
}

impl From<PostgresStoreError> for StoreError {
    fn from(err: PostgresStoreError) -> Self {
        match err {
            PostgresStoreError::Postgres(_) | PostgresStoreError::Pool(_) | PostgresStoreError::State(_) => {
                Self::Io(err.to_string())
            }
            PostgresStoreError::Invalid(_) => Self::Invalid(err.to_string()),
            PostgresStoreError::Corrupt(_) => Self::Corrupt(err.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use run_atlas_core::StoreError;

    use super::PostgresStoreError;
    use super::describe_db_error;
    use crate::scope::ScopeError;

    #[test]
    fn errors_map_onto_store_error_kinds() {
        assert!(matches!(StoreError::from(PostgresStoreError::Pool("timeout".to_string())), StoreError::Io(_)));
        assert!(matches!(StoreError::from(PostgresStoreError::Invalid("bins".to_string())), StoreError::Invalid(_)));
        assert!(matches!(StoreError::from(PostgresStoreError::Corrupt("status".to_string())), StoreError::Corrupt(_)));
        assert!(matches!(StoreError::from(PostgresStoreError::from(ScopeError::Empty)), StoreError::Io(_)));
    }

    #[test]
    fn server_errors_keep_message_and_code() {
        let text = describe_db_error("db error", "cannot extract elements from a scalar", "22023", None);
        assert_eq!(text, "db error: cannot extract elements from a scalar [22023]");
        let detailed = describe_db_error("db error", "value out of range", "22003", Some("1e400"));
        assert!(detailed.ends_with("[22003] (1e400)"));
        let mapped = StoreError::from(PostgresStoreError::Postgres(text));
        assert!(mapped.to_string().contains("cannot extract elements from a scalar"));
    }
}
