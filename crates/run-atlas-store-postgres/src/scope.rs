// crates/run-atlas-store-postgres/src/scope.rs
// ============================================================================
// Module: Namespace Scope
// Description: Renders table references over one or many namespaces.
// Purpose: Let one query body run against a single schema or a fan-out.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! A scope with one namespace renders `"ns"."table"`; with several it renders
//! a `UNION ALL` subquery so callers write the same SQL either way. An empty
//! scope has no table to render: callers check [`Scope::is_empty`] and return
//! empty results without running SQL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Scope rendering errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// A table was requested from a scope without namespaces.
    #[error("scope has no namespaces")]
    Empty,
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Quotes an SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal, used only for JSON keys inside path operators.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// ============================================================================
// SECTION: Scope
// ============================================================================

/// Ordered set of namespaces a query runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Namespaces, deduplicated, in first-seen order.
    namespaces: Vec<String>,
}

impl Scope {
    /// Creates a scope, dropping duplicates.
    #[must_use]
    pub fn new(namespaces: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            if !unique.contains(&namespace) {
                unique.push(namespace);
            }
        }
        Self { namespaces: unique }
    }

    /// A scope over no namespaces.
    #[must_use]
    pub const fn empty() -> Self {
        Self { namespaces: Vec::new() }
    }

    /// Returns true when the scope has no namespaces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Namespaces in scope.
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Returns the namespace when exactly one is in scope.
    #[must_use]
    pub fn single_namespace(&self) -> Option<&str> {
        match self.namespaces.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Renders a table reference, aliased when `alias` is given.
    ///
    /// A fan-out is always aliased; without an explicit alias it is named
    /// `all_<table>`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Empty`] for an empty scope.
    pub fn table(&self, name: &str, alias: Option<&str>) -> Result<String, ScopeError> {
        match self.namespaces.as_slice() {
            [] => Err(ScopeError::Empty),
            [only] => {
                let table = format!("{}.{}", quote_ident(only), quote_ident(name));
                Ok(match alias {
                    Some(alias) => format!("{table} {alias}"),
                    None => table,
                })
            }
            many => {
                let union = many
                    .iter()
                    .map(|namespace| format!("SELECT * FROM {}.{}", quote_ident(namespace), quote_ident(name)))
                    .collect::<Vec<_>>()
                    .join(" UNION ALL ");
                let alias = alias.map_or_else(|| format!("all_{name}"), str::to_string);
                Ok(format!("({union}) AS {alias}"))
            }
        }
    }

    /// Keeps only namespaces present in `available`.
    #[must_use]
    pub fn restricted_to(&self, available: &[String]) -> Self {
        Self {
            namespaces: self.namespaces.iter().filter(|namespace| available.contains(namespace)).cloned().collect(),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
