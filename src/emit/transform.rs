//! Record transformers
//!
//! Turn raw API records into keyed row operations. `MappingTransformer`
//! covers the usual connector needs: renamed columns, typed coercions,
//! primary keys, soft-delete flags and child tables from nested arrays.

use super::types::{Row, RowOp};
use crate::error::{Error, Result};
use crate::types::{lookup_path, JsonValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized datetime output format
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Naive datetime formats accepted on input (interpreted as UTC)
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y%m%dT%H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Date-only formats accepted on input (midnight UTC)
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Unix timestamps above this are taken as milliseconds
const UNIX_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Converts one raw record into row operations
pub trait Transformer: Send + Sync {
    /// Transform a record; `Error::Transform` marks a bad row
    fn transform(&self, record: &JsonValue) -> Result<Vec<RowOp>>;
}

// ============================================================================
// Mapping Types
// ============================================================================

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Text; numbers and booleans are stringified, objects serialized
    String,
    /// 64-bit integer
    #[serde(alias = "int")]
    Integer,
    /// 64-bit float; `$`, `,` and spaces are stripped from strings
    #[serde(alias = "number", alias = "double")]
    Float,
    /// Boolean; accepts `yes`/`no`, `1`/`0` and friends
    #[serde(alias = "bool")]
    Boolean,
    /// Timestamp normalized to `%Y-%m-%dT%H:%M:%SZ`
    #[serde(alias = "timestamp")]
    Datetime,
    /// Passed through untouched
    #[default]
    Json,
}

/// One output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Output column name
    pub column: String,
    /// Dot path in the record (defaults to the column name)
    #[serde(default)]
    pub source: Option<String>,
    /// Value type
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Reject the row when the value is missing or null
    #[serde(default)]
    pub required: bool,
}

impl ColumnMapping {
    /// Create a column reading the same-named source field
    pub fn new(column: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            column: column.into(),
            source: None,
            field_type,
            required: false,
        }
    }

    /// Read from a different source path
    #[must_use]
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Mark the column as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn source_path(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.column)
    }
}

/// How one record maps onto a table.
///
/// With no `columns`, every top-level field is copied under its
/// snake_case name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Destination table
    pub table: String,
    /// Key columns (output names)
    pub primary_key: Vec<String>,
    /// Output columns
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    /// Source path of a soft-delete marker
    #[serde(default)]
    pub delete_flag: Option<String>,
    /// Tables extracted from nested arrays
    #[serde(default)]
    pub children: Vec<ChildMapping>,
}

/// Child table fed from an array inside the parent record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildMapping {
    /// Dot path of the nested array
    pub path: String,
    /// Column receiving the parent's key
    #[serde(default)]
    pub parent_column: Option<String>,
    /// Mapping applied to each element
    #[serde(flatten)]
    pub mapping: TableMapping,
}

impl TableMapping {
    /// Create a mapping copying every field under its snake_case name
    pub fn new(table: impl Into<String>, primary_key: &[&str]) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.iter().map(ToString::to_string).collect(),
            columns: Vec::new(),
            delete_flag: None,
            children: Vec::new(),
        }
    }

    /// Add a column
    #[must_use]
    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    /// Treat records with a truthy value at `path` as deletes
    #[must_use]
    pub fn with_delete_flag(mut self, path: impl Into<String>) -> Self {
        self.delete_flag = Some(path.into());
        self
    }

    /// Add a child table
    #[must_use]
    pub fn child(
        mut self,
        path: impl Into<String>,
        parent_column: Option<&str>,
        mapping: TableMapping,
    ) -> Self {
        self.children.push(ChildMapping {
            path: path.into(),
            parent_column: parent_column.map(ToString::to_string),
            mapping,
        });
        self
    }

    /// Check the mapping is usable
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::invalid_value("mapping.table", "table name is empty"));
        }
        if self.primary_key.is_empty() {
            return Err(Error::invalid_value(
                format!("mapping.{}.primary_key", self.table),
                "at least one key column is required",
            ));
        }
        if !self.columns.is_empty() {
            for key in &self.primary_key {
                if !self.columns.iter().any(|c| &c.column == key) {
                    return Err(Error::invalid_value(
                        format!("mapping.{}.primary_key", self.table),
                        format!("key column '{key}' is not mapped"),
                    ));
                }
            }
        }
        for child in &self.children {
            child.mapping.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// Mapping Transformer
// ============================================================================

/// Transformer driven by a [`TableMapping`]
#[derive(Debug, Clone)]
pub struct MappingTransformer {
    mapping: TableMapping,
}

impl MappingTransformer {
    /// Create a transformer, validating the mapping
    pub fn new(mapping: TableMapping) -> Result<Self> {
        mapping.validate()?;
        Ok(Self { mapping })
    }

    /// The mapping in use
    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }
}

impl Transformer for MappingTransformer {
    fn transform(&self, record: &JsonValue) -> Result<Vec<RowOp>> {
        let mut ops = Vec::new();
        transform_table(&self.mapping, record, None, &mut ops)?;
        Ok(ops)
    }
}

fn transform_table(
    mapping: &TableMapping,
    record: &JsonValue,
    parent: Option<(&str, &JsonValue)>,
    ops: &mut Vec<RowOp>,
) -> Result<()> {
    let JsonValue::Object(fields) = record else {
        return Err(Error::transform(&mapping.table, "record is not an object"));
    };

    let mut row = Row::new();
    if mapping.columns.is_empty() {
        for (name, value) in fields {
            row.insert(to_snake_case(name), value.clone());
        }
    } else {
        for column in &mapping.columns {
            let raw = lookup_path(record, column.source_path()).unwrap_or(&JsonValue::Null);
            let value = coerce(&column.column, raw, column.field_type)?;
            if column.required && value.is_null() {
                return Err(Error::transform(&column.column, "required field is missing"));
            }
            row.insert(column.column.clone(), value);
        }
    }
    if let Some((column, value)) = parent {
        row.insert(column.to_string(), value.clone());
    }

    let key = row_key(mapping, &row)?;

    if let Some(flag) = &mapping.delete_flag {
        if lookup_path(record, flag).is_some_and(is_truthy) {
            ops.push(RowOp::delete(&mapping.table, key));
            return Ok(());
        }
    }

    let parent_value = match mapping.primary_key.as_slice() {
        [single] => row.get(single).cloned().unwrap_or(JsonValue::Null),
        _ => JsonValue::String(key.clone()),
    };
    ops.push(RowOp::upsert(&mapping.table, key, row));

    for child in &mapping.children {
        let items = match lookup_path(record, &child.path) {
            Some(JsonValue::Array(items)) => items.as_slice(),
            Some(JsonValue::Null) | None => continue,
            Some(other) => std::slice::from_ref(other),
        };
        let link = child.parent_column.as_deref().map(|c| (c, &parent_value));
        for item in items {
            transform_table(&child.mapping, item, link, ops)?;
        }
    }

    Ok(())
}

/// Render the primary key of a row; composite keys are joined with `|`
fn row_key(mapping: &TableMapping, row: &Row) -> Result<String> {
    let mut parts = Vec::with_capacity(mapping.primary_key.len());
    for column in &mapping.primary_key {
        match row.get(column) {
            None | Some(JsonValue::Null) => {
                return Err(Error::transform(column, "primary key is missing"));
            }
            Some(JsonValue::String(s)) => parts.push(s.clone()),
            Some(other) => parts.push(other.to_string()),
        }
    }
    Ok(parts.join("|"))
}

// ============================================================================
// Passthrough Transformer
// ============================================================================

/// Upserts every record as-is, keyed by one field
#[derive(Debug, Clone)]
pub struct PassthroughTransformer {
    table: String,
    key_field: String,
}

impl PassthroughTransformer {
    /// Create a passthrough transformer
    pub fn new(table: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_field: key_field.into(),
        }
    }
}

impl Transformer for PassthroughTransformer {
    fn transform(&self, record: &JsonValue) -> Result<Vec<RowOp>> {
        let JsonValue::Object(row) = record else {
            return Err(Error::transform(&self.table, "record is not an object"));
        };
        let key = match lookup_path(record, &self.key_field) {
            None | Some(JsonValue::Null) => {
                return Err(Error::transform(&self.key_field, "primary key is missing"));
            }
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Ok(vec![RowOp::upsert(&self.table, key, row.clone())])
    }
}

// ============================================================================
// Coercion
// ============================================================================

/// `f` as an i64 when it is whole and in range
fn whole_i64(f: f64) -> Option<i64> {
    // i64::MAX rounds up to 2^63 as a float, so the upper bound is exclusive
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

/// Convert a raw value to `field_type`; missing values and blank strings become null
pub fn coerce(field: &str, value: &JsonValue, field_type: FieldType) -> Result<JsonValue> {
    if value.is_null() {
        return Ok(JsonValue::Null);
    }
    if field_type != FieldType::String && field_type != FieldType::Json {
        if let JsonValue::String(s) = value {
            if s.trim().is_empty() {
                return Ok(JsonValue::Null);
            }
        }
    }

    let invalid = |expected: &str| {
        Error::transform(field, format!("cannot convert {value} to {expected}"))
    };

    match field_type {
        FieldType::Json => Ok(value.clone()),
        FieldType::String => Ok(match value {
            JsonValue::String(s) => JsonValue::String(s.clone()),
            JsonValue::Number(n) => JsonValue::String(n.to_string()),
            JsonValue::Bool(b) => JsonValue::String(b.to_string()),
            other => JsonValue::String(other.to_string()),
        }),
        FieldType::Integer => {
            let parsed = match value {
                JsonValue::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(whole_i64)),
                JsonValue::String(s) => {
                    let cleaned = s.trim().replace(',', "");
                    cleaned
                        .parse::<i64>()
                        .ok()
                        .or_else(|| cleaned.parse::<f64>().ok().and_then(whole_i64))
                }
                _ => None,
            };
            parsed.map(JsonValue::from).ok_or_else(|| invalid("integer"))
        }
        FieldType::Float => {
            let parsed = match value {
                JsonValue::Number(n) => n.as_f64(),
                JsonValue::String(s) => s
                    .chars()
                    .filter(|&c| !matches!(c, '$' | ',') && !c.is_whitespace())
                    .collect::<String>()
                    .parse::<f64>()
                    .ok(),
                _ => None,
            };
            parsed
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| invalid("float"))
        }
        FieldType::Boolean => {
            let parsed = match value {
                JsonValue::Bool(b) => Some(*b),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                JsonValue::String(s) => parse_bool(s),
                _ => None,
            };
            parsed.map(JsonValue::Bool).ok_or_else(|| invalid("boolean"))
        }
        FieldType::Datetime => {
            let parsed = match value {
                JsonValue::String(s) => parse_datetime(s.trim()),
                JsonValue::Number(n) => n.as_i64().and_then(from_unix),
                _ => None,
            };
            parsed
                .map(|dt| JsonValue::String(dt.format(DATETIME_FORMAT).to_string()))
                .ok_or_else(|| invalid("datetime"))
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => parse_bool(s).unwrap_or(false),
        _ => false,
    }
}

/// Parse a datetime in any of the accepted formats, as UTC
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn from_unix(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() > UNIX_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Convert `camelCase`, `PascalCase` or spaced names to `snake_case`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }

    out.trim_end_matches('_').to_string()
}
