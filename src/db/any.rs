//! Runtime backend selection.
//!
//! [`AnyBackend`] picks MySQL or PostgreSQL from configuration and dispatches
//! every capability to the matching driver.

use crate::config::SessionConfig;
use crate::db::backend::{Backend, BackendConnection, BackendCursor};
use crate::db::drivers::mysql::{MySqlBackend, MySqlCursor, MySqlSessionConnection};
use crate::db::drivers::postgres::{PgCursor, PgSessionConnection, PostgresBackend};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam, RowSet};
use async_trait::async_trait;

/// A backend chosen at runtime.
#[derive(Debug, Clone, Copy)]
pub enum AnyBackend {
    MySql(MySqlBackend),
    Postgres(PostgresBackend),
}

impl AnyBackend {
    /// Get the driver for a database type.
    pub fn for_type(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::MySQL => Self::MySql(MySqlBackend),
            DatabaseType::PostgreSQL => Self::Postgres(PostgresBackend),
        }
    }

    /// Get the driver matching a session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::for_type(config.db_type)
    }
}

/// A connection opened by [`AnyBackend`].
pub enum AnyConnection {
    MySql(MySqlSessionConnection),
    Postgres(PgSessionConnection),
}

/// A cursor opened on an [`AnyConnection`].
pub enum AnyCursor {
    MySql(MySqlCursor),
    Postgres(PgCursor),
}

#[async_trait]
impl Backend for AnyBackend {
    type Connection = AnyConnection;

    fn kind(&self) -> DatabaseType {
        match self {
            Self::MySql(b) => b.kind(),
            Self::Postgres(b) => b.kind(),
        }
    }

    async fn dial(&self, config: &SessionConfig) -> DbResult<AnyConnection> {
        match self {
            Self::MySql(b) => b.dial(config).await.map(AnyConnection::MySql),
            Self::Postgres(b) => b.dial(config).await.map(AnyConnection::Postgres),
        }
    }
}

#[async_trait]
impl BackendConnection for AnyConnection {
    type Cursor = AnyCursor;

    fn cursor(&mut self) -> DbResult<AnyCursor> {
        match self {
            Self::MySql(c) => c.cursor().map(AnyCursor::MySql),
            Self::Postgres(c) => c.cursor().map(AnyCursor::Postgres),
        }
    }

    async fn commit(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(c) => c.commit().await,
            Self::Postgres(c) => c.commit().await,
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(c) => c.rollback().await,
            Self::Postgres(c) => c.rollback().await,
        }
    }

    async fn close(self) -> DbResult<()> {
        match self {
            Self::MySql(c) => c.close().await,
            Self::Postgres(c) => c.close().await,
        }
    }
}

#[async_trait]
impl BackendCursor for AnyCursor {
    type Connection = AnyConnection;

    async fn execute(
        &mut self,
        connection: &mut AnyConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<()> {
        match (self, connection) {
            (Self::MySql(cur), AnyConnection::MySql(conn)) => {
                cur.execute(conn, sql, params).await
            }
            (Self::Postgres(cur), AnyConnection::Postgres(conn)) => {
                cur.execute(conn, sql, params).await
            }
            _ => Err(DbError::internal(
                "Cursor and connection belong to different backends",
            )),
        }
    }

    fn fetch_all(&mut self) -> DbResult<RowSet> {
        match self {
            Self::MySql(cur) => cur.fetch_all(),
            Self::Postgres(cur) => cur.fetch_all(),
        }
    }

    fn close(self) -> DbResult<()> {
        match self {
            Self::MySql(cur) => cur.close(),
            Self::Postgres(cur) => cur.close(),
        }
    }
}
