// crates/run-atlas-core/src/core/filter.rs
// ============================================================================
// Module: Run Filters
// Description: Filter wire format and paginated run query parameters.
// Purpose: Describe which runs a caller wants and in which order.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Filters are trusted input from internal UI code. They are permissive: a
//! field filter that cannot be applied is dropped by the backend instead of
//! failing the query.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::core::identifiers::ExperimentId;
use crate::core::run::RunStatus;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Default page size for run listings.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size accepted for run listings.
pub const MAX_PAGE_SIZE: u32 = 1000;

// ============================================================================
// SECTION: Field Filters
// ============================================================================

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equality.
    #[default]
    Eq,
    /// Inequality.
    Ne,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Case-insensitive substring match.
    Contains,
    /// Membership in a list of values.
    In,
}

impl FilterOp {
    /// Returns true for the four ordering operators.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Returns the SQL comparison operator for scalar comparisons.
    ///
    /// `Contains` and `In` have no single-token form and return `None`.
    #[must_use]
    pub const fn sql_operator(self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("!="),
            Self::Lt => Some("<"),
            Self::Le => Some("<="),
            Self::Gt => Some(">"),
            Self::Ge => Some(">="),
            Self::Contains | Self::In => None,
        }
    }
}

/// Filter over one namespaced field (`record.*`, `params.*`, `metrics.*`, `derived.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Dot-notation field path, for example `metrics.best_f`.
    pub field: String,
    /// Comparison operator.
    #[serde(default)]
    pub op: FilterOp,
    /// Value to compare against. A list for `in`.
    pub value: Value,
}

impl FieldFilter {
    /// Creates a field filter.
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Specification for filtering runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Restrict to one experiment.
    #[serde(default)]
    pub experiment_id: Option<ExperimentId>,
    /// Restrict to any of these statuses.
    #[serde(default)]
    pub status: Option<Vec<RunStatus>>,
    /// Runs started at or after this time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_after: Option<OffsetDateTime>,
    /// Runs started at or before this time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_before: Option<OffsetDateTime>,
    /// Filters over namespaced fields, combined with AND.
    #[serde(default)]
    pub field_filters: Vec<FieldFilter>,
}

impl FilterSpec {
    /// Creates a filter restricted to one experiment.
    #[must_use]
    pub fn for_experiment(experiment_id: impl Into<ExperimentId>) -> Self {
        Self {
            experiment_id: Some(experiment_id.into()),
            ..Self::default()
        }
    }

    /// Adds a field filter.
    #[must_use]
    pub fn with_field_filter(mut self, filter: FieldFilter) -> Self {
        self.field_filters.push(filter);
        self
    }
}

// ============================================================================
// SECTION: Run Query
// ============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for the direction.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Paginated run listing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    /// Optional filter.
    #[serde(default)]
    pub filter: Option<FilterSpec>,
    /// Namespaced sort field. Defaults to `record.started_at`.
    #[serde(default)]
    pub sort_field: Option<String>,
    /// Sort direction.
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Page size.
    #[serde(default = "default_page_size")]
    pub limit: u32,
    /// Number of matching runs to skip.
    #[serde(default)]
    pub offset: u64,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort_field: None,
            sort_order: SortOrder::default(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl RunQuery {
    /// Creates a query for one page of runs.
    #[must_use]
    pub const fn page(filter: Option<FilterSpec>, limit: u32, offset: u64) -> Self {
        Self {
            filter,
            sort_field: None,
            sort_order: SortOrder::Desc,
            limit,
            offset,
        }
    }

    /// Sets the sort field and direction.
    #[must_use]
    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Returns the page size clamped into `1..=max`.
    #[must_use]
    pub fn effective_limit(&self, max: u32) -> u32 {
        self.limit.clamp(1, max.max(1))
    }

    /// Returns the experiment filter, if any.
    #[must_use]
    pub fn experiment_id(&self) -> Option<&ExperimentId> {
        self.filter.as_ref().and_then(|filter| filter.experiment_id.as_ref())
    }
}

/// Serde default for [`RunQuery::limit`].
const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
