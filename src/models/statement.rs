//! Statement batch models.
//!
//! A call to `Session::execute` takes either one statement or a collection of
//! statements, plus optional parameters. This module normalises both into a
//! [`StatementBatch`]: an ordered list of (statement, parameters) pairs.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashSet};

/// The statements argument of an `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statements {
    /// One statement; the result is a single row set.
    Single(String),
    /// Several statements; the result is one row set per statement.
    Batch(Vec<String>),
}

impl Statements {
    /// Number of statements.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(list) => list.len(),
        }
    }

    /// Check if this is an empty batch.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if this is a batch (even a batch of one).
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

impl From<&str> for Statements {
    fn from(sql: &str) -> Self {
        Self::Single(sql.to_string())
    }
}

impl From<String> for Statements {
    fn from(sql: String) -> Self {
        Self::Single(sql)
    }
}

impl From<Vec<String>> for Statements {
    fn from(list: Vec<String>) -> Self {
        Self::Batch(list)
    }
}

impl From<Vec<&str>> for Statements {
    fn from(list: Vec<&str>) -> Self {
        Self::Batch(list.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for Statements {
    fn from(list: &[&str]) -> Self {
        Self::Batch(list.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Statements {
    fn from(list: [&str; N]) -> Self {
        Self::Batch(list.iter().map(|s| s.to_string()).collect())
    }
}

/// Unordered collections run in the collection's iteration order.
impl From<HashSet<String>> for Statements {
    fn from(set: HashSet<String>) -> Self {
        Self::Batch(set.into_iter().collect())
    }
}

impl From<BTreeSet<String>> for Statements {
    fn from(set: BTreeSet<String>) -> Self {
        Self::Batch(set.into_iter().collect())
    }
}

/// Dynamic input: a string is a single statement, an array of strings is a batch.
impl TryFrom<JsonValue> for Statements {
    type Error = DbError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::String(sql) => Ok(Self::Single(sql)),
            JsonValue::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| match item {
                    JsonValue::String(sql) => Ok(sql),
                    other => Err(DbError::statement_type(format!(
                        "statement {} must be a string, got {}",
                        idx,
                        json_type_name(&other)
                    ))),
                })
                .collect::<DbResult<Vec<_>>>()
                .map(Self::Batch),
            other => Err(DbError::statement_type(format!(
                "expected a string or a list of strings, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

/// The parameters argument of an `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameters {
    /// Parameters of a single statement.
    Single(Vec<QueryParam>),
    /// One entry per batch statement; `None` means the statement takes no parameters.
    Batch(Vec<Option<Vec<QueryParam>>>),
}

impl Parameters {
    /// Parse JSON parameters matching the shape of `statements`.
    ///
    /// A single statement takes an array of values. A batch takes an array with
    /// one entry per statement, each an array of values or `null`.
    pub fn from_json(value: JsonValue, statements: &Statements) -> DbResult<Self> {
        let JsonValue::Array(items) = value else {
            return Err(DbError::invalid_input(format!(
                "parameters must be an array, got {}",
                json_type_name(&value)
            )));
        };

        if !statements.is_batch() {
            return Ok(Self::Single(items.into_iter().map(QueryParam::from).collect()));
        }

        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                JsonValue::Null => Ok(None),
                JsonValue::Array(values) => {
                    Ok(Some(values.into_iter().map(QueryParam::from).collect()))
                }
                other => Err(DbError::invalid_input(format!(
                    "parameters for statement {} must be an array or null, got {}",
                    idx,
                    json_type_name(&other)
                ))),
            })
            .collect::<DbResult<Vec<_>>>()
            .map(Self::Batch)
    }
}

impl From<Vec<QueryParam>> for Parameters {
    fn from(params: Vec<QueryParam>) -> Self {
        Self::Single(params)
    }
}

impl From<Vec<Vec<QueryParam>>> for Parameters {
    fn from(params: Vec<Vec<QueryParam>>) -> Self {
        Self::Batch(params.into_iter().map(Some).collect())
    }
}

impl From<Vec<Option<Vec<QueryParam>>>> for Parameters {
    fn from(params: Vec<Option<Vec<QueryParam>>>) -> Self {
        Self::Batch(params)
    }
}

/// One statement paired with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// None when the statement was submitted without parameters.
    pub params: Option<Vec<QueryParam>>,
}

impl Statement {
    /// Create a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: None,
        }
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = Some(params);
        self
    }

    /// Parameters to bind; empty when none were given.
    pub fn bind_params(&self) -> &[QueryParam] {
        self.params.as_deref().unwrap_or(&[])
    }
}

/// Normalised input of one `execute` call, run under one commit/rollback boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementBatch {
    Single(Statement),
    Batch(Vec<Statement>),
}

impl StatementBatch {
    /// Pair statements with parameters.
    ///
    /// A batch without parameters (or with an empty parameter list) gets one
    /// independent empty placeholder per statement. Shape and length mismatches
    /// are rejected rather than truncated.
    pub fn new(statements: Statements, parameters: Option<Parameters>) -> DbResult<Self> {
        match (statements, parameters) {
            (Statements::Single(sql), None) => Ok(Self::Single(Statement::new(sql))),
            (Statements::Single(sql), Some(Parameters::Single(params))) => {
                Ok(Self::Single(Statement::new(sql).with_params(params)))
            }
            (Statements::Single(_), Some(Parameters::Batch(_))) => Err(DbError::statement_type(
                "a single statement takes one parameter list, got per-statement parameters",
            )),
            (Statements::Batch(list), None) => Ok(Self::placeholders(list)),
            (Statements::Batch(list), Some(Parameters::Batch(params))) if params.is_empty() => {
                Ok(Self::placeholders(list))
            }
            (Statements::Batch(list), Some(Parameters::Batch(params))) => {
                if list.len() != params.len() {
                    return Err(DbError::statement_type(format!(
                        "{} statements but {} parameter entries",
                        list.len(),
                        params.len()
                    )));
                }
                Ok(Self::Batch(
                    list.into_iter()
                        .zip(params)
                        .map(|(sql, params)| Statement { sql, params })
                        .collect(),
                ))
            }
            (Statements::Batch(_), Some(Parameters::Single(_))) => Err(DbError::statement_type(
                "a batch takes one parameter entry per statement, got a single parameter list",
            )),
        }
    }

    fn placeholders(list: Vec<String>) -> Self {
        Self::Batch(list.into_iter().map(Statement::new).collect())
    }

    /// Statements in submission order.
    pub fn statements(&self) -> &[Statement] {
        match self {
            Self::Single(stmt) => std::slice::from_ref(stmt),
            Self::Batch(list) => list,
        }
    }

    /// Check if this came from a collection of statements.
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.statements().len()
    }

    /// Check if there are no statements to run.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
