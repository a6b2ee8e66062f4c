// crates/run-atlas-core/src/core/field.rs
// ============================================================================
// Module: Field References and Field Index
// Description: Namespaced field paths and per-field metadata.
// Purpose: Resolve dot paths once and describe which fields exist on runs.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! A field path is `namespace.key` with namespace one of `record`, `params`,
//! `metrics`, or `derived`. [`FieldRef::parse`] resolves a path once into a
//! tagged reference so backends never string-match prefixes again.
//!
//! [`FieldStats`] accumulates per-field type, count, bounded value sets, and
//! numeric ranges when a field index is built by sampling payloads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::run::RunResponse;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Largest number of distinct values retained per categorical field.
pub const MAX_FIELD_VALUES: usize = 100;

// ============================================================================
// SECTION: Namespaces
// ============================================================================

/// Field namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNamespace {
    /// Core record fields.
    Record,
    /// Resolved parameters.
    Params,
    /// Captured metrics.
    Metrics,
    /// Post-hoc derived metrics.
    Derived,
}

impl FieldNamespace {
    /// Returns the path prefix for the namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Params => "params",
            Self::Metrics => "metrics",
            Self::Derived => "derived",
        }
    }

    /// Parses a path prefix.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "record" => Some(Self::Record),
            "params" => Some(Self::Params),
            "metrics" => Some(Self::Metrics),
            "derived" => Some(Self::Derived),
            _ => None,
        }
    }
}

/// Payload section holding a namespace's values inside `record_json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadSection {
    /// `record_json -> 'params_resolved'`.
    Params,
    /// `record_json -> 'metrics'`.
    Metrics,
}

impl PayloadSection {
    /// Returns the JSON key of the section inside the payload.
    #[must_use]
    pub const fn json_key(self) -> &'static str {
        match self {
            Self::Params => "params_resolved",
            Self::Metrics => "metrics",
        }
    }
}

// ============================================================================
// SECTION: Record Columns
// ============================================================================

/// Storage kind of a physical record column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Text column.
    Text,
    /// Timestamp column.
    Timestamp,
    /// Integer column.
    Integer,
}

/// Physical run columns that filters and sorts may address directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordColumn {
    /// `run_id`.
    RunId,
    /// `experiment_id`.
    ExperimentId,
    /// `status`.
    Status,
    /// `context_fingerprint`.
    ContextFingerprint,
    /// `params_fingerprint`.
    ParamsFingerprint,
    /// `seed_fingerprint`.
    SeedFingerprint,
    /// `started_at`.
    StartedAt,
    /// `finished_at`.
    FinishedAt,
    /// `duration_ms`.
    DurationMs,
}

impl RecordColumn {
    /// The physical column allowlist.
    pub const ALL: [Self; 9] = [
        Self::RunId,
        Self::ExperimentId,
        Self::Status,
        Self::ContextFingerprint,
        Self::ParamsFingerprint,
        Self::SeedFingerprint,
        Self::StartedAt,
        Self::FinishedAt,
        Self::DurationMs,
    ];

    /// Returns the column name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RunId => "run_id",
            Self::ExperimentId => "experiment_id",
            Self::Status => "status",
            Self::ContextFingerprint => "context_fingerprint",
            Self::ParamsFingerprint => "params_fingerprint",
            Self::SeedFingerprint => "seed_fingerprint",
            Self::StartedAt => "started_at",
            Self::FinishedAt => "finished_at",
            Self::DurationMs => "duration_ms",
        }
    }

    /// Returns the storage kind of the column.
    #[must_use]
    pub const fn kind(self) -> ColumnKind {
        match self {
            Self::StartedAt | Self::FinishedAt => ColumnKind::Timestamp,
            Self::DurationMs => ColumnKind::Integer,
            Self::RunId
            | Self::ExperimentId
            | Self::Status
            | Self::ContextFingerprint
            | Self::ParamsFingerprint
            | Self::SeedFingerprint => ColumnKind::Text,
        }
    }

    /// Looks up an allowlisted column by name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|column| column.name() == name)
    }
}

// ============================================================================
// SECTION: Field References
// ============================================================================

/// A field path resolved once into its storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// Allowlisted physical record column.
    Column(RecordColumn),
    /// Record key stored only inside the payload, such as `tags` or `notes`.
    RecordKey(String),
    /// Key inside a payload section.
    Payload {
        /// Payload section.
        section: PayloadSection,
        /// Key within the section.
        key: String,
    },
    /// Key inside the derived metrics side record.
    Derived(String),
    /// Malformed path or unknown namespace.
    Unsupported,
}

impl FieldRef {
    /// Resolves a dot path such as `metrics.score`.
    ///
    /// The path is split on the first dot; the remainder is the key verbatim.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let Some((namespace, key)) = path.split_once('.') else {
            return Self::Unsupported;
        };
        if key.is_empty() {
            return Self::Unsupported;
        }
        match FieldNamespace::parse(namespace) {
            Some(FieldNamespace::Record) => RecordColumn::parse(key)
                .map_or_else(|| Self::RecordKey(key.to_string()), Self::Column),
            Some(FieldNamespace::Params) => Self::Payload {
                section: PayloadSection::Params,
                key: key.to_string(),
            },
            Some(FieldNamespace::Metrics) => Self::Payload {
                section: PayloadSection::Metrics,
                key: key.to_string(),
            },
            Some(FieldNamespace::Derived) => Self::Derived(key.to_string()),
            None => Self::Unsupported,
        }
    }

    /// Returns the namespace of the reference.
    #[must_use]
    pub const fn namespace(&self) -> Option<FieldNamespace> {
        match self {
            Self::Column(_) | Self::RecordKey(_) => Some(FieldNamespace::Record),
            Self::Payload {
                section: PayloadSection::Params,
                ..
            } => Some(FieldNamespace::Params),
            Self::Payload {
                section: PayloadSection::Metrics,
                ..
            } => Some(FieldNamespace::Metrics),
            Self::Derived(_) => Some(FieldNamespace::Derived),
            Self::Unsupported => None,
        }
    }

    /// Returns true when the reference needs the derived side table.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::Derived(_))
    }

    /// Reads the referenced value from a run. JSON null reads as absent.
    #[must_use]
    pub fn value_of(&self, run: &RunResponse) -> Option<Value> {
        let record = &run.record;
        let value = match self {
            Self::Column(column) => match column {
                RecordColumn::RunId => Value::from(record.run_id.as_str()),
                RecordColumn::ExperimentId => Value::from(record.experiment_id.as_str()),
                RecordColumn::Status => Value::from(record.status.as_str()),
                RecordColumn::ContextFingerprint => Value::from(record.context_fingerprint.as_str()),
                RecordColumn::ParamsFingerprint => Value::from(record.params_fingerprint.as_str()),
                RecordColumn::SeedFingerprint => Value::from(record.seed_fingerprint.as_str()),
                RecordColumn::StartedAt => timestamp_value(record.started_at)?,
                RecordColumn::FinishedAt => timestamp_value(record.finished_at?)?,
                RecordColumn::DurationMs => Value::from(record.duration_ms?),
            },
            Self::RecordKey(key) => serde_json::to_value(record).ok()?.get(key)?.clone(),
            Self::Payload {
                section: PayloadSection::Params,
                key,
            } => run.params.get(key)?.clone(),
            Self::Payload {
                section: PayloadSection::Metrics,
                key,
            } => run.metrics.get(key)?.clone(),
            Self::Derived(key) => run.derived_metrics.get(key)?.clone(),
            Self::Unsupported => return None,
        };
        if value.is_null() { None } else { Some(value) }
    }
}

/// Formats a timestamp the way it appears on the wire.
fn timestamp_value(value: OffsetDateTime) -> Option<Value> {
    value.format(&Rfc3339).ok().map(Value::from)
}

/// Interprets a JSON value as a finite number.
///
/// Numbers and numeric strings qualify; booleans do not.
#[must_use]
pub fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Renders a JSON value as plain text (strings unquoted).
#[must_use]
pub fn text_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Field Index
// ============================================================================

/// Inferred field type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Numeric values.
    Numeric,
    /// String values.
    String,
    /// Boolean values.
    Boolean,
    /// Anything else.
    #[default]
    Unknown,
}

impl FieldType {
    /// Infers a field type from a JSON value.
    ///
    /// Booleans are tested before numbers.
    #[must_use]
    pub const fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Numeric,
            Value::String(_) => Self::String,
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Unknown,
        }
    }

    /// Parses a catalog type label. Unknown labels map to [`FieldType::Unknown`].
    #[must_use]
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("numeric") => Self::Numeric,
            Some("string") => Self::String,
            Some("boolean") => Self::Boolean,
            _ => Self::Unknown,
        }
    }
}

/// Metadata about one field across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Inferred type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Number of runs carrying the field.
    pub count: u64,
    /// Sorted distinct values for categorical fields (at most 100).
    #[serde(default)]
    pub values: Option<Vec<String>>,
    /// Minimum value for numeric fields.
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Maximum value for numeric fields.
    #[serde(default)]
    pub max_value: Option<f64>,
}

/// Index of available fields across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIndex {
    /// Index format version.
    pub version: u32,
    /// When the index was built.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_scan: Option<OffsetDateTime>,
    /// True number of runs in scope.
    pub run_count: u64,
    /// `params.*` fields.
    #[serde(default)]
    pub params_fields: BTreeMap<String, FieldInfo>,
    /// `metrics.*` fields.
    #[serde(default)]
    pub metrics_fields: BTreeMap<String, FieldInfo>,
    /// `derived.*` fields.
    #[serde(default)]
    pub derived_fields: BTreeMap<String, FieldInfo>,
    /// `record.*` fields.
    #[serde(default)]
    pub record_fields: BTreeMap<String, FieldInfo>,
}

impl FieldIndex {
    /// Creates an empty index stamped with the current time.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 1,
            last_scan: Some(OffsetDateTime::now_utc()),
            run_count: 0,
            params_fields: BTreeMap::new(),
            metrics_fields: BTreeMap::new(),
            derived_fields: BTreeMap::new(),
            record_fields: BTreeMap::new(),
        }
    }

    /// Returns the field map for a namespace.
    #[must_use]
    pub const fn fields(&self, namespace: FieldNamespace) -> &BTreeMap<String, FieldInfo> {
        match namespace {
            FieldNamespace::Record => &self.record_fields,
            FieldNamespace::Params => &self.params_fields,
            FieldNamespace::Metrics => &self.metrics_fields,
            FieldNamespace::Derived => &self.derived_fields,
        }
    }

    /// Returns the mutable field map for a namespace.
    pub fn fields_mut(&mut self, namespace: FieldNamespace) -> &mut BTreeMap<String, FieldInfo> {
        match namespace {
            FieldNamespace::Record => &mut self.record_fields,
            FieldNamespace::Params => &mut self.params_fields,
            FieldNamespace::Metrics => &mut self.metrics_fields,
            FieldNamespace::Derived => &mut self.derived_fields,
        }
    }

    /// Returns true when no params or metrics fields are known.
    #[must_use]
    pub fn has_no_payload_fields(&self) -> bool {
        self.params_fields.is_empty() && self.metrics_fields.is_empty()
    }
}

// ============================================================================
// SECTION: Field Statistics
// ============================================================================

/// Running statistics for one field while sampling payloads.
///
/// The type is fixed by the first value seen.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    /// Type inferred from the first value.
    field_type: FieldType,
    /// Number of values observed.
    count: u64,
    /// Distinct values for categorical fields.
    values: BTreeSet<String>,
    /// Running minimum for numeric fields.
    min: Option<f64>,
    /// Running maximum for numeric fields.
    max: Option<f64>,
}

impl FieldStats {
    /// Starts statistics for a field whose first value is `first`.
    #[must_use]
    pub const fn new(first: &Value) -> Self {
        Self {
            field_type: FieldType::infer(first),
            count: 0,
            values: BTreeSet::new(),
            min: None,
            max: None,
        }
    }

    /// Records one observed value.
    pub fn observe(&mut self, value: &Value) {
        self.count += 1;
        match self.field_type {
            FieldType::Numeric => {
                if let Some(number) = value.as_f64().filter(|_| !value.is_boolean()) {
                    self.min = Some(self.min.map_or(number, |min| min.min(number)));
                    self.max = Some(self.max.map_or(number, |max| max.max(number)));
                }
            }
            FieldType::String | FieldType::Boolean => {
                if self.values.len() < MAX_FIELD_VALUES {
                    self.values.insert(text_value(value));
                }
            }
            FieldType::Unknown => {}
        }
    }

    /// Converts the statistics into field metadata.
    #[must_use]
    pub fn into_info(self) -> FieldInfo {
        let categorical = matches!(self.field_type, FieldType::String | FieldType::Boolean);
        let values = (categorical && !self.values.is_empty()).then(|| self.values.into_iter().collect());
        FieldInfo {
            field_type: self.field_type,
            count: self.count,
            values,
            min_value: self.min,
            max_value: self.max,
        }
    }
}

/// Accumulates statistics for every key of a JSON object into `stats`.
pub fn observe_object(stats: &mut BTreeMap<String, FieldStats>, object: &Map<String, Value>) {
    for (key, value) in object {
        stats.entry(key.clone()).or_insert_with(|| FieldStats::new(value)).observe(value);
    }
}

/// Finalizes accumulated statistics into a field map.
#[must_use]
pub fn finish_stats(stats: BTreeMap<String, FieldStats>) -> BTreeMap<String, FieldInfo> {
    stats.into_iter().map(|(key, stats)| (key, stats.into_info())).collect()
}
