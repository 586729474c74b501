//! Query-related data models.
//!
//! This module defines parameter values and the row sets returned by a session.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// A positional parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
    /// Structured value bound as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

/// Map a JSON value onto the narrowest parameter type that holds it.
impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .unwrap_or_else(|| Self::String(n.to_string())),
            },
            JsonValue::String(v) => Self::String(v),
            other => Self::Json(other),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for QueryParam {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

/// Rows fetched by one statement. Each row is an ordered tuple of column values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl RowSet {
    /// Create a row set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self { columns, rows }
    }

    /// Get the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows were fetched.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the first row, if any.
    pub fn first(&self) -> Option<&[JsonValue]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// Get a value by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&JsonValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// The outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecuteOutput {
    /// Rows of a single statement
    Single(RowSet),
    /// One row set per batch statement, in submission order
    Batch(Vec<RowSet>),
}

impl ExecuteOutput {
    /// Get the row sets in submission order.
    pub fn row_sets(&self) -> &[RowSet] {
        match self {
            Self::Single(rows) => std::slice::from_ref(rows),
            Self::Batch(sets) => sets,
        }
    }

    /// Take the single-statement result, if this is one.
    pub fn into_single(self) -> Option<RowSet> {
        match self {
            Self::Single(rows) => Some(rows),
            Self::Batch(_) => None,
        }
    }

    /// Take the batch results, if this is a batch.
    pub fn into_batch(self) -> Option<Vec<RowSet>> {
        match self {
            Self::Single(_) => None,
            Self::Batch(sets) => Some(sets),
        }
    }
}
