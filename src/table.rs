//! In-memory result sets
//!
//! A [`Table`] is an ordered list of column names plus rows of [`Cell`]s aligned
//! to those columns. Tables are built from BigQuery query responses and handed
//! to a [`TableWriter`](crate::etl::TableWriter) for persistence.

use chrono::{DateTime, Utc};
use eyre::{Context, OptionExt, Result, eyre};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// A single scalar value in a result row
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Nested `RECORD` or `REPEATED` values, kept as JSON
    Json(Value),
}

impl Cell {
    /// Convert the cell into a JSON value for embedding in nested fields
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            Self::Text(s) => Value::String(s.clone()),
            Self::Timestamp(_) => Value::String(self.to_string()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
            Self::Timestamp(ts) if ts.timestamp_subsec_micros() == 0 => {
                write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S+00:00"))
            }
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f+00:00")),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Schema of a query result as returned by the BigQuery REST API
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// One column (or nested sub-field) of a [`TableSchema`]
#[derive(Clone, Debug, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }

    fn is_record(&self) -> bool {
        matches!(
            self.field_type.to_ascii_uppercase().as_str(),
            "RECORD" | "STRUCT"
        )
    }
}

/// A structured result set: named columns and rows aligned to them
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build a table, checking every row has one cell per column
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            eyre::bail!(
                "Row {} has {} values but the table has {} columns",
                i,
                row.len(),
                columns.len()
            );
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from a BigQuery schema and `rows` payload
    ///
    /// Each row is an object of the form `{"f": [{"v": ...}, ...]}` with one
    /// entry per schema field.
    pub fn from_bigquery(schema: &TableSchema, rows: &[Value]) -> Result<Self> {
        let columns = schema.fields.iter().map(|f| f.name.clone()).collect();
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                convert_row(&schema.fields, row)
                    .with_context(|| format!("Failed to convert row {}", i))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Append rows from another page of the same result set
    pub fn extend(&mut self, other: Table) -> Result<()> {
        if other.columns != self.columns {
            eyre::bail!(
                "Cannot merge result pages with different columns: [{}] vs [{}]",
                self.columns.join(", "),
                other.columns.join(", ")
            );
        }
        self.rows.extend(other.rows);
        Ok(())
    }
}

fn row_values<'a>(row: &'a Value) -> Result<&'a Vec<Value>> {
    row.get("f")
        .and_then(Value::as_array)
        .ok_or_eyre("Row is missing its 'f' array")
}

fn convert_row(fields: &[FieldSchema], row: &Value) -> Result<Vec<Cell>> {
    let values = row_values(row)?;
    if values.len() != fields.len() {
        eyre::bail!(
            "Row has {} values but the schema has {} fields",
            values.len(),
            fields.len()
        );
    }
    fields
        .iter()
        .zip(values)
        .map(|(field, value)| convert_cell(field, value.get("v").unwrap_or(&Value::Null)))
        .collect()
}

fn convert_cell(field: &FieldSchema, raw: &Value) -> Result<Cell> {
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    if field.is_repeated() || field.is_record() {
        return nested_json(field, raw).map(Cell::Json);
    }
    convert_scalar(field, raw)
}

fn nested_json(field: &FieldSchema, raw: &Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if field.is_repeated() {
        let items = raw
            .as_array()
            .ok_or_else(|| eyre!("Expected an array for repeated field '{}'", field.name))?;
        return items
            .iter()
            .map(|item| element_json(field, item.get("v").unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array);
    }
    element_json(field, raw)
}

fn element_json(field: &FieldSchema, raw: &Value) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if field.is_record() {
        let values = row_values(raw)
            .with_context(|| format!("Malformed record in field '{}'", field.name))?;
        let mut object = serde_json::Map::new();
        for (sub, value) in field.fields.iter().zip(values) {
            let json = nested_json(sub, value.get("v").unwrap_or(&Value::Null))?;
            object.insert(sub.name.clone(), json);
        }
        return Ok(Value::Object(object));
    }
    convert_scalar(field, raw).map(|cell| cell.to_json())
}

fn convert_scalar(field: &FieldSchema, raw: &Value) -> Result<Cell> {
    let text = raw
        .as_str()
        .ok_or_else(|| eyre!("Expected a string value for field '{}', got {}", field.name, raw))?;

    let cell = match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => Cell::Int(
            text.parse::<i64>()
                .with_context(|| format!("Invalid INTEGER in '{}': {}", field.name, text))?,
        ),
        "FLOAT" | "FLOAT64" => Cell::Float(
            text.parse::<f64>()
                .with_context(|| format!("Invalid FLOAT in '{}': {}", field.name, text))?,
        ),
        "BOOLEAN" | "BOOL" => match text.to_ascii_lowercase().as_str() {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            _ => eyre::bail!("Invalid BOOLEAN in '{}': {}", field.name, text),
        },
        "TIMESTAMP" => Cell::Timestamp(parse_timestamp(text).ok_or_else(|| {
            eyre!("Invalid TIMESTAMP in '{}': {}", field.name, text)
        })?),
        _ => Cell::Text(text.to_string()),
    };
    Ok(cell)
}

/// Parse a BigQuery TIMESTAMP value
///
/// Accepts int64 microseconds since the epoch (`useInt64Timestamp`) and the
/// legacy floating point seconds form (`1.6E9`).
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(micros) = text.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros);
    }
    let seconds = text.parse::<f64>().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}
