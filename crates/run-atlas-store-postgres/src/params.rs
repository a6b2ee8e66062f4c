// crates/run-atlas-store-postgres/src/params.rs
// ============================================================================
// Module: Statement Parameters
// Description: Owned parameter values and positional placeholder numbering.
// Purpose: Bind every user-supplied value instead of interpolating it.
// Dependencies: postgres-types, time
// ============================================================================

//! ## Overview
//! Predicates are compiled against the parameters already bound to a
//! statement so their `$n` placeholders continue the numbering. The final
//! list is handed to the driver through [`SqlParams::refs`].

use postgres_types::ToSql;
use time::OffsetDateTime;

/// One bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text value.
    Text(String),
    /// Double precision value.
    Float(f64),
    /// Bigint value.
    Int(i64),
    /// Timestamp with time zone.
    Timestamp(OffsetDateTime),
}

impl SqlParam {
    /// Returns the value as a driver parameter.
    #[must_use]
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Text(value) => value,
            Self::Float(value) => value,
            Self::Int(value) => value,
            Self::Timestamp(value) => value,
        }
    }
}

/// Ordered parameter list of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlParams {
    /// Bound values; index `i` is placeholder `$i+1`.
    values: Vec<SqlParam>,
}

impl SqlParams {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Binds a value and returns its placeholder.
    pub fn push(&mut self, value: SqlParam) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    /// Appends values whose placeholders were numbered after this list.
    pub fn extend(&mut self, values: Vec<SqlParam>) {
        self.values.extend(values);
    }

    /// Placeholder number the next bound value will receive.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.values.len() + 1
    }

    /// Number of bound values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bound values in placeholder order.
    #[must_use]
    pub fn values(&self) -> &[SqlParam] {
        &self.values
    }

    /// Borrowed driver parameters in placeholder order.
    #[must_use]
    pub fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values.iter().map(SqlParam::as_sql).collect()
    }
}
