// crates/run-atlas-store-postgres/src/filter.rs
// ============================================================================
// Module: Filter Compiler
// Description: Compiles filter specs and field paths into parameterized SQL.
// Purpose: Translate the filter wire format into predicates over runs.
// Dependencies: run-atlas-core, crate::{params, scope}
// ============================================================================

//! ## Overview
//! Every query aliases the runs table as `r` and, when joined, the derived
//! table as `d`. Field paths resolve through [`FieldRef`]:
//! - allowlisted record columns compare the physical column;
//! - other record keys compare `r.record_json->>key`;
//! - `params.*` and `metrics.*` read the payload sections;
//! - `derived.*` reads `d.derived_json` and only compiles when the join is
//!   present in the [`CompileContext`].
//!
//! Filters that cannot apply compile to `None` and are skipped, matching the
//! in-memory store. Numeric casts are guarded by a regular expression so a
//! non-numeric payload value reads as `NULL` instead of failing the query.

// ============================================================================
// SECTION: Imports
// ============================================================================

use run_atlas_core::FieldFilter;
use run_atlas_core::FieldRef;
use run_atlas_core::FilterOp;
use run_atlas_core::FilterSpec;
use run_atlas_core::RecordColumn;
use run_atlas_core::core::field::ColumnKind;
use run_atlas_core::core::field::numeric_value;
use run_atlas_core::core::field::text_value;
use run_atlas_core::core::run::parse_timestamp;
use serde_json::Value;

use crate::params::SqlParam;
use crate::params::SqlParams;
use crate::scope::Scope;
use crate::scope::ScopeError;
use crate::scope::quote_ident;
use crate::scope::quote_literal;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Text accepted as a finite decimal number that fits a double.
///
/// Mantissa digits on either side of the point are capped at 200 and the
/// exponent at two digits, so the magnitude stays within `1e-299..1e299`
/// and the `float8` cast never overflows or underflows. Longer literals
/// read as non-numeric.
pub const NUMERIC_PATTERN: &str = r"^\s*[-+]?(\d{1,200}(\.\d{0,200})?|\.\d{1,200})([eE][-+]?\d{1,2})?\s*$";

// ============================================================================
// SECTION: Context
// ============================================================================

/// Tables available to a compiled predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileContext {
    /// Whether `d` (the derived table) is joined.
    derived: bool,
}

impl CompileContext {
    /// Only the runs table is available.
    #[must_use]
    pub const fn runs_only() -> Self {
        Self { derived: false }
    }

    /// The derived table is joined as `d`.
    #[must_use]
    pub const fn with_derived() -> Self {
        Self { derived: true }
    }

    /// Joins derived only when one of `fields` or a field filter needs it.
    #[must_use]
    pub fn for_fields<'a>(fields: impl IntoIterator<Item = &'a str>, filter: Option<&FilterSpec>) -> Self {
        let in_fields = fields.into_iter().any(|path| FieldRef::parse(path).is_derived());
        let in_filter = filter.is_some_and(|filter| {
            filter.field_filters.iter().any(|field_filter| FieldRef::parse(&field_filter.field).is_derived())
        });
        Self {
            derived: in_fields || in_filter,
        }
    }

    /// Returns true when the derived table is joined.
    #[must_use]
    pub const fn has_derived(self) -> bool {
        self.derived
    }
}

/// Renders `runs r`, left-joined with `derived d` when the context asks.
///
/// # Errors
///
/// Returns [`ScopeError::Empty`] for an empty scope.
pub fn runs_from(scope: &Scope, ctx: CompileContext) -> Result<String, ScopeError> {
    let runs = scope.table("runs", Some("r"))?;
    if !ctx.has_derived() {
        return Ok(runs);
    }
    let derived = scope.table("derived", Some("d"))?;
    Ok(format!("{runs} LEFT JOIN {derived} ON d.run_id = r.run_id"))
}

// ============================================================================
// SECTION: Field Expressions
// ============================================================================

/// Physical column reference.
fn column_ref(column: RecordColumn) -> String {
    format!("r.{}", quote_ident(column.name()))
}

/// Text rendering of a field, `None` when the field cannot be read here.
#[must_use]
pub fn text_expr(field: &FieldRef, ctx: CompileContext) -> Option<String> {
    match field {
        FieldRef::Column(column) => Some(match column.kind() {
            ColumnKind::Timestamp => format!("(to_jsonb({}) #>> '{{}}')", column_ref(*column)),
            ColumnKind::Text | ColumnKind::Integer => format!("{}::text", column_ref(*column)),
        }),
        FieldRef::RecordKey(key) => Some(format!("(r.record_json->>{})", quote_literal(key))),
        FieldRef::Payload { section, key } => Some(format!(
            "(r.record_json->{}->>{})",
            quote_literal(section.json_key()),
            quote_literal(key)
        )),
        FieldRef::Derived(key) if ctx.has_derived() => Some(format!("(d.derived_json->>{})", quote_literal(key))),
        FieldRef::Derived(_) | FieldRef::Unsupported => None,
    }
}

/// Casts a text expression to `cast` when it looks numeric, else `NULL`.
fn guarded(expr: &str, cast: &str) -> String {
    format!("(CASE WHEN {expr} ~ {} THEN ({expr})::{cast} END)", quote_literal(NUMERIC_PATTERN))
}

/// Double precision rendering of a field; non-numeric values read as `NULL`.
#[must_use]
pub fn numeric_expr(field: &FieldRef, ctx: CompileContext) -> Option<String> {
    if let FieldRef::Column(column) = field
        && column.kind() == ColumnKind::Integer
    {
        return Some(format!("{}::float8", column_ref(*column)));
    }
    text_expr(field, ctx).map(|expr| guarded(&expr, "float8"))
}

/// Sort keys for a field, numeric payload values ordered numerically.
#[must_use]
pub fn sort_exprs(field: &FieldRef, ctx: CompileContext) -> Option<Vec<String>> {
    match field {
        FieldRef::Column(column) => Some(vec![column_ref(*column)]),
        FieldRef::RecordKey(_) => text_expr(field, ctx).map(|expr| vec![expr]),
        FieldRef::Payload { .. } | FieldRef::Derived(_) => {
            let text = text_expr(field, ctx)?;
            Some(vec![guarded(&text, "float8"), text])
        }
        FieldRef::Unsupported => None,
    }
}

// ============================================================================
// SECTION: Predicates
// ============================================================================

/// A compiled predicate and its parameters.
///
/// Placeholders are numbered from the index given to [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// SQL boolean expression.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

/// Collects parameters with placeholders numbered from a starting index.
struct Binder {
    /// Placeholder number of the first parameter.
    first: usize,
    /// Bound parameters.
    params: Vec<SqlParam>,
}

impl Binder {
    /// Starts numbering at `first`.
    const fn new(first: usize) -> Self {
        Self {
            first,
            params: Vec::new(),
        }
    }

    /// Binds a value and returns its placeholder.
    fn bind(&mut self, param: SqlParam) -> String {
        let placeholder = format!("${}", self.first + self.params.len());
        self.params.push(param);
        placeholder
    }
}

/// Escapes `LIKE` wildcards and wraps the text for a substring match.
#[must_use]
pub fn like_pattern(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

/// Elements of an `in` value; a scalar counts as a one-element list.
fn in_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

/// Compiles one field filter with placeholders starting at `first_index`.
///
/// Returns `None` when the filter cannot apply: unknown namespace, malformed
/// path, ordering on a payload-only record key, a derived field without the
/// derived join, or a value the column cannot hold.
#[must_use]
pub fn compile(filter: &FieldFilter, ctx: CompileContext, first_index: usize) -> Option<Predicate> {
    let field = FieldRef::parse(&filter.field);
    let mut binder = Binder::new(first_index);
    let sql = match &field {
        FieldRef::Unsupported => return None,
        FieldRef::RecordKey(_) if filter.op.is_ordering() => return None,
        FieldRef::Column(column) => compile_column(*column, filter, &mut binder)?,
        FieldRef::RecordKey(_) | FieldRef::Payload { .. } | FieldRef::Derived(_) => {
            let expr = text_expr(&field, ctx)?;
            compile_json(&expr, filter, &mut binder)
        }
    };
    Some(Predicate {
        sql,
        params: binder.params,
    })
}

/// Binds a value typed for a physical column.
fn column_operand(kind: ColumnKind, value: &Value, binder: &mut Binder) -> Option<String> {
    match kind {
        ColumnKind::Text => Some(format!("{}::text", binder.bind(SqlParam::Text(text_value(value))))),
        ColumnKind::Timestamp => {
            let timestamp = parse_timestamp(&text_value(value))?;
            Some(format!("{}::timestamptz", binder.bind(SqlParam::Timestamp(timestamp))))
        }
        ColumnKind::Integer => {
            let number = numeric_value(value)?;
            Some(format!("{}::float8", binder.bind(SqlParam::Float(number))))
        }
    }
}

/// Compiles a filter over an allowlisted column.
fn compile_column(column: RecordColumn, filter: &FieldFilter, binder: &mut Binder) -> Option<String> {
    let target = column_ref(column);
    match filter.op {
        FilterOp::Contains => {
            let pattern = binder.bind(SqlParam::Text(like_pattern(&text_value(&filter.value))));
            Some(format!("{target}::text ILIKE {pattern}::text"))
        }
        FilterOp::In => {
            let items = in_items(&filter.value);
            if items.is_empty() {
                return Some("FALSE".to_string());
            }
            let operands = items
                .into_iter()
                .map(|item| column_operand(column.kind(), item, binder))
                .collect::<Option<Vec<_>>>()?;
            Some(format!("{target} IN ({})", operands.join(", ")))
        }
        op => {
            let operator = op.sql_operator()?;
            let operand = column_operand(column.kind(), &filter.value, binder)?;
            Some(format!("{target} {operator} {operand}"))
        }
    }
}

/// Compiles a filter over a JSON text expression.
fn compile_json(expr: &str, filter: &FieldFilter, binder: &mut Binder) -> String {
    let number = filter.value.is_number().then(|| numeric_value(&filter.value)).flatten();
    match (filter.op, number) {
        (FilterOp::Eq, Some(number)) => {
            let operand = binder.bind(SqlParam::Float(number));
            format!("{} = ({operand}::float8)::numeric", guarded(expr, "numeric"))
        }
        (FilterOp::Ne, Some(number)) => {
            let operand = binder.bind(SqlParam::Float(number));
            format!("({expr} IS NOT NULL AND {} IS DISTINCT FROM ({operand}::float8)::numeric)", guarded(expr, "numeric"))
        }
        (FilterOp::Contains, _) => {
            let pattern = binder.bind(SqlParam::Text(like_pattern(&text_value(&filter.value))));
            format!("{expr} ILIKE {pattern}::text")
        }
        (FilterOp::In, _) => {
            let items = in_items(&filter.value);
            if items.is_empty() {
                return "FALSE".to_string();
            }
            let operands: Vec<String> = items
                .into_iter()
                .map(|item| format!("{}::text", binder.bind(SqlParam::Text(text_value(item)))))
                .collect();
            format!("{expr} IN ({})", operands.join(", "))
        }
        (op, _) => {
            let operator = op.sql_operator().unwrap_or("=");
            match numeric_value(&filter.value).filter(|_| op.is_ordering()) {
                Some(number) => {
                    let operand = binder.bind(SqlParam::Float(number));
                    format!("{} {operator} {operand}::float8", guarded(expr, "float8"))
                }
                None => {
                    let operand = binder.bind(SqlParam::Text(text_value(&filter.value)));
                    format!("{expr} {operator} {operand}::text")
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Where Clauses
// ============================================================================

/// Conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhereClause {
    /// Predicates joined with `AND`.
    clauses: Vec<String>,
}

impl WhereClause {
    /// Adds a predicate.
    pub fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// Returns true when there is nothing to filter on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Renders `WHERE ...`, or an empty string.
    #[must_use]
    pub fn render(&self) -> String {
        if self.clauses.is_empty() { String::new() } else { format!("WHERE {}", self.clauses.join(" AND ")) }
    }

    /// Renders the predicates joined with `AND`, or `TRUE`.
    #[must_use]
    pub fn condition(&self) -> String {
        if self.clauses.is_empty() { "TRUE".to_string() } else { self.clauses.join(" AND ") }
    }
}

/// Compiles a filter spec into a where clause, binding into `params`.
#[must_use]
pub fn compile_filter_spec(filter: Option<&FilterSpec>, ctx: CompileContext, params: &mut SqlParams) -> WhereClause {
    let mut clause = WhereClause::default();
    let Some(filter) = filter else {
        return clause;
    };
    if let Some(experiment_id) = &filter.experiment_id {
        let placeholder = params.push(SqlParam::Text(experiment_id.to_string()));
        clause.push(format!("{} = {placeholder}::text", column_ref(RecordColumn::ExperimentId)));
    }
    if let Some(statuses) = filter.status.as_ref().filter(|statuses| !statuses.is_empty()) {
        let placeholders: Vec<String> = statuses
            .iter()
            .map(|status| format!("{}::text", params.push(SqlParam::Text(status.as_str().to_string()))))
            .collect();
        clause.push(format!("{} IN ({})", column_ref(RecordColumn::Status), placeholders.join(", ")));
    }
    if let Some(after) = filter.started_after {
        let placeholder = params.push(SqlParam::Timestamp(after));
        clause.push(format!("{} >= {placeholder}::timestamptz", column_ref(RecordColumn::StartedAt)));
    }
    if let Some(before) = filter.started_before {
        let placeholder = params.push(SqlParam::Timestamp(before));
        clause.push(format!("{} <= {placeholder}::timestamptz", column_ref(RecordColumn::StartedAt)));
    }
    for field_filter in &filter.field_filters {
        if let Some(predicate) = compile(field_filter, ctx, params.next_index()) {
            params.extend(predicate.params);
            clause.push(predicate.sql);
        }
    }
    clause
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
