//! Error types for database sessions.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each error variant carries enough context for the caller to tell a failed dial
//! apart from a failed statement, and a failed statement apart from a failed rollback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Wrong SQL statements type: {message}")]
    StatementType { message: String },

    #[error("SQL execution error: {message}")]
    SqlExecution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        /// Position of the failing statement within a batch. None for single statements.
        statement_index: Option<usize>,
        suggestion: String,
    },

    /// Rollback failed after a statement failure. The statement failure is kept as `source`.
    #[error("Transaction error: {message} (original failure: {source})")]
    Transaction {
        message: String,
        source: Box<DbError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement shape error.
    pub fn statement_type(message: impl Into<String>) -> Self {
        Self::StatementType {
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn sql_execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::SqlExecution {
            message: message.into(),
            sql_state,
            statement_index: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a rollback failure that keeps the statement failure that triggered it.
    pub fn transaction(message: impl Into<String>, original: DbError) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Box::new(original),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Re-classify a failure raised while running a statement as an execution error.
    ///
    /// Execution errors keep their SQL state; every other kind is folded into the
    /// message. `statement_index` is attached for batch members.
    pub fn into_execution(self, statement_index: Option<usize>) -> Self {
        match self {
            Self::SqlExecution {
                message,
                sql_state,
                suggestion,
                ..
            } => Self::SqlExecution {
                message,
                sql_state,
                statement_index,
                suggestion,
            },
            Self::Connection {
                message,
                suggestion,
            } => Self::SqlExecution {
                message,
                sql_state: None,
                statement_index,
                suggestion,
            },
            other => Self::SqlExecution {
                message: other.to_string(),
                sql_state: None,
                statement_index,
                suggestion: "Check the SQL statement and its parameters".to_string(),
            },
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::SqlExecution { suggestion, .. } => Some(suggestion),
            Self::Transaction { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Index of the failing statement within a batch, if known.
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            Self::SqlExecution {
                statement_index, ..
            } => *statement_index,
            Self::Transaction { source, .. } => source.statement_index(),
            _ => None,
        }
    }

    /// The statement failure behind a rollback failure, if this is one.
    pub fn original(&self) -> Option<&DbError> {
        match self {
            Self::Transaction { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this error means the underlying connection is no longer usable.
    ///
    /// Must be checked before `into_execution`, which folds connectivity
    /// failures into execution errors.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::sql_execution(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::sql_execution(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection",
                "Check database server load",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::sql_execution(
                format!("Type not found: {}", type_name),
                None,
                "Check the types referenced by the statement",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::sql_execution(
                format!("Column not found: {}", col),
                None,
                "Check the column names referenced by the statement",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Reconnect to the database",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
