//! Backend capability set.
//!
//! A session only needs four things from a database driver: dial a connection,
//! open a cursor on it, commit or roll back the open transaction, and close
//! handles. Each backend supplies these through the traits below.

use crate::config::SessionConfig;
use crate::error::DbResult;
use crate::models::{DatabaseType, QueryParam, RowSet};
use async_trait::async_trait;

/// A database driver able to open connections.
#[async_trait]
pub trait Backend: Send + Sync {
    type Connection: BackendConnection;

    /// The database family this backend speaks to.
    fn kind(&self) -> DatabaseType;

    /// Open a new connection. Fails with a connection error.
    async fn dial(&self, config: &SessionConfig) -> DbResult<Self::Connection>;
}

/// An open connection with an implicit transaction.
///
/// A transaction starts with the first statement after a commit or rollback.
/// `commit` and `rollback` are no-ops when no statement ran since the last one.
#[async_trait]
pub trait BackendConnection: Send + Sized {
    type Cursor: BackendCursor<Connection = Self>;

    fn cursor(&mut self) -> DbResult<Self::Cursor>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Close the connection. Uncommitted work is discarded by the server.
    async fn close(self) -> DbResult<()>;
}

/// A statement handle bound to its connection.
#[async_trait]
pub trait BackendCursor: Send + Sized {
    type Connection: Send;

    /// Run one statement and buffer its result.
    async fn execute(
        &mut self,
        connection: &mut Self::Connection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<()>;

    /// Drain the rows buffered by the last `execute`.
    fn fetch_all(&mut self) -> DbResult<RowSet>;

    fn close(self) -> DbResult<()>;
}

/// The cursor type of a backend's connections.
pub type CursorOf<B> = <<B as Backend>::Connection as BackendConnection>::Cursor;
