//! Connection-related data models.
//!
//! This module defines the supported backends and the observable session state.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Includes MariaDB
    #[value(name = "mysql")]
    MySQL,
    #[value(name = "postgresql", alias = "postgres")]
    PostgreSQL,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
        }
    }

    /// URL scheme understood by the driver.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::PostgreSQL => 5432,
            Self::MySQL => 3306,
        }
    }

    /// Get the default login user for this database type.
    pub fn default_user(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "root",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSQL),
            other => Err(format!("Unknown database type: {}", other)),
        }
    }
}

/// Observable state of a session, derived from which handles it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection and no cursor.
    Disconnected,
    /// Connection open, cursor released. Reached after every `execute`.
    ConnectedNoCursor,
    /// Connection and cursor both open.
    Ready,
}

impl SessionState {
    /// Check if the session holds a live connection.
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::ConnectedNoCursor => write!(f, "connected_no_cursor"),
            Self::Ready => write!(f, "ready"),
        }
    }
}
