// crates/run-atlas-core/src/core/search.rs
// ============================================================================
// Module: Search Types
// Description: Categorized search requests, hits, and groups.
// Purpose: Define the search wire format and category labels.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A search runs a fixed set of category queries. Each category yields a
//! bounded hit list and a total that may be approximate; categories with no
//! hits and a zero total are dropped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Request
// ============================================================================

/// Default number of hits per category.
pub const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query string, matched as a case-insensitive substring.
    pub q: String,
    /// Maximum hits per category.
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

impl SearchRequest {
    /// Creates a search request.
    #[must_use]
    pub fn new(q: impl Into<String>, limit: u32) -> Self {
        Self { q: q.into(), limit }
    }

    /// Returns the trimmed query, or `None` when it is blank.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        let trimmed = self.q.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Serde default for [`SearchRequest::limit`].
const fn default_search_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Navigation target of a hit or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Hit navigates to an experiment.
    Experiment,
    /// Hit navigates to a run.
    Run,
}

/// Search category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchCategory {
    /// Experiment identifiers.
    Experiments,
    /// Cataloged field names.
    FieldNames,
    /// Parameter names (index-based search).
    ParamNames,
    /// Metric names (index-based search).
    MetricNames,
    /// Derived metric names (index-based search).
    DerivedNames,
    /// Run identifiers.
    Runs,
    /// Run fingerprints.
    Fingerprints,
    /// Experiment manifest tags.
    Tags,
    /// Run record tags.
    RunTags,
}

impl SearchCategory {
    /// Category key on the wire.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Experiments => "experiments",
            Self::FieldNames => "field_names",
            Self::ParamNames => "param_names",
            Self::MetricNames => "metric_names",
            Self::DerivedNames => "derived_names",
            Self::Runs => "runs",
            Self::Fingerprints => "fingerprints",
            Self::Tags => "tags",
            Self::RunTags => "run_tags",
        }
    }

    /// Group header label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Experiments => "Experiments",
            Self::FieldNames => "Field names",
            Self::ParamNames => "Parameters",
            Self::MetricNames => "Metrics",
            Self::DerivedNames => "Derived metrics",
            Self::Runs => "Runs",
            Self::Fingerprints => "Fingerprints",
            Self::Tags => "Tags",
            Self::RunTags => "Run tags",
        }
    }

    /// Navigation scope of the group.
    #[must_use]
    pub const fn scope(self) -> EntityType {
        match self {
            Self::Experiments
            | Self::FieldNames
            | Self::ParamNames
            | Self::MetricNames
            | Self::DerivedNames
            | Self::Tags => EntityType::Experiment,
            Self::Runs | Self::Fingerprints | Self::RunTags => EntityType::Run,
        }
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Display text.
    pub label: String,
    /// Secondary text.
    #[serde(default)]
    pub sublabel: Option<String>,
    /// Navigation target kind.
    pub entity_type: EntityType,
    /// Experiment or run identifier to navigate to.
    pub entity_id: String,
    /// Matched field path for field hits.
    #[serde(default)]
    pub field: Option<String>,
    /// Matched value for field-value hits.
    #[serde(default)]
    pub value: Option<String>,
}

impl SearchHit {
    /// Creates a hit navigating to an experiment.
    #[must_use]
    pub fn experiment(experiment_id: &str, sublabel: String) -> Self {
        Self {
            label: experiment_id.to_string(),
            sublabel: Some(sublabel),
            entity_type: EntityType::Experiment,
            entity_id: experiment_id.to_string(),
            field: None,
            value: None,
        }
    }

    /// Creates a hit navigating to a run, labelled with its experiment.
    #[must_use]
    pub fn run(run_id: &str, experiment_id: &str) -> Self {
        Self {
            label: run_id.to_string(),
            sublabel: Some(experiment_id.to_string()),
            entity_type: EntityType::Run,
            entity_id: run_id.to_string(),
            field: None,
            value: None,
        }
    }
}

/// Hits of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchGroup {
    /// Category key.
    pub category: String,
    /// Group header label.
    pub label: String,
    /// Navigation scope.
    pub scope: EntityType,
    /// Bounded hit list.
    pub hits: Vec<SearchHit>,
    /// Total matches, possibly approximate.
    pub total: u64,
}

impl SearchGroup {
    /// Creates a group for a category.
    #[must_use]
    pub fn new(category: SearchCategory, hits: Vec<SearchHit>, total: u64) -> Self {
        Self {
            category: category.key().to_string(),
            label: category.label().to_string(),
            scope: category.scope(),
            hits,
            total,
        }
    }

    /// Creates a group whose total is approximated from the hit count.
    #[must_use]
    pub fn approximate(category: SearchCategory, hits: Vec<SearchHit>, limit: u32) -> Self {
        let total = approximate_total(hits.len(), limit);
        Self::new(category, hits, total)
    }

    /// Returns true when the group has neither hits nor a total.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.hits.is_empty() && self.total == 0
    }
}

/// Approximate total: one more than the hit count once the limit is reached.
#[must_use]
pub fn approximate_total(hits: usize, limit: u32) -> u64 {
    let count = u64::try_from(hits).unwrap_or(u64::MAX);
    if count >= u64::from(limit) { count.saturating_add(1) } else { count }
}

/// Search response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Echo of the query.
    pub query: String,
    /// Non-empty groups in dispatch order.
    pub groups: Vec<SearchGroup>,
}

impl SearchResponse {
    /// Builds a response, dropping empty groups.
    #[must_use]
    pub fn from_groups(query: &str, groups: Vec<SearchGroup>) -> Self {
        Self {
            query: query.to_string(),
            groups: groups.into_iter().filter(|group| !group.is_empty()).collect(),
        }
    }
}

/// Case-insensitive substring match. A blank needle never matches.
#[must_use]
pub fn matches_query(needle: &str, haystack: &str) -> bool {
    !needle.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}
