//! Data models for database sessions.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod statement;

// Re-export commonly used types
pub use connection::{DatabaseType, SessionState};
pub use query::{ExecuteOutput, QueryParam, RowSet};
pub use statement::{Parameters, Statement, StatementBatch, Statements};
