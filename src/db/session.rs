//! Connection lifecycle management.
//!
//! A [`Session`] owns one connection and, for the duration of one `execute`
//! call, one cursor. Every `execute` runs against a live connection (redialled
//! lazily when it was lost), commits once on success, rolls back once on
//! failure, and releases its cursor before returning.

use crate::config::SessionConfig;
use crate::db::backend::{Backend, BackendConnection, BackendCursor, CursorOf};
use crate::db::params::describe_params;
use crate::error::{DbError, DbResult};
use crate::models::{
    ExecuteOutput, Parameters, RowSet, SessionState, Statement, StatementBatch, Statements,
};
use tracing::{error, trace, warn};

/// One logical database session over a single connection.
///
/// Not shareable between concurrent callers; `execute` and `close` take `&mut self`.
pub struct Session<B: Backend> {
    backend: B,
    config: SessionConfig,
    connection: Option<B::Connection>,
    cursor: Option<CursorOf<B>>,
    /// Set while an `execute` is between its first statement and its cursor
    /// release. Still set on entry means the previous call was dropped early.
    in_flight: bool,
    closed: bool,
}

impl<B: Backend> Session<B> {
    /// Dial immediately and open a cursor.
    ///
    /// Fails with [`DbError::InvalidInput`] if the configuration is invalid or
    /// names another database type than `backend`, and with
    /// [`DbError::Connection`] if the dial fails; no session is returned.
    pub async fn connect(backend: B, config: SessionConfig) -> DbResult<Self> {
        config.validate()?;
        if config.db_type != backend.kind() {
            return Err(DbError::invalid_input(format!(
                "Configuration is for {} but the backend is {}",
                config.db_type,
                backend.kind()
            )));
        }

        let mut connection = backend.dial(&config).await.inspect_err(|e| {
            error!(server = %config.display_target(), "Database connection failed: {}", e);
        })?;
        let cursor = connection.cursor()?;
        warn!(
            server = %config.display_target(),
            backend = %backend.kind(),
            "Database has been connected."
        );

        Ok(Self {
            backend,
            config,
            connection: Some(connection),
            cursor: Some(cursor),
            in_flight: false,
            closed: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current state, derived from the handles held.
    pub fn state(&self) -> SessionState {
        match (&self.connection, &self.cursor) {
            (Some(_), Some(_)) => SessionState::Ready,
            (Some(_), None) => SessionState::ConnectedNoCursor,
            (None, _) => SessionState::Disconnected,
        }
    }

    /// Check if `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one statement or a batch under a single commit.
    ///
    /// A single statement yields [`ExecuteOutput::Single`]; a collection yields
    /// [`ExecuteOutput::Batch`] with one row set per statement in submission
    /// order. On failure the transaction is rolled back once and the failure is
    /// returned as [`DbError::SqlExecution`], or as [`DbError::Transaction`]
    /// when the rollback fails as well.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let rows = session.execute("SELECT * FROM t WHERE id = ?", Some(vec![1.into()].into())).await?;
    /// let sets = session.execute(["INSERT INTO t VALUES (2)", "SELECT * FROM t"], None).await?;
    /// ```
    pub async fn execute<S>(
        &mut self,
        statements: S,
        parameters: Option<Parameters>,
    ) -> DbResult<ExecuteOutput>
    where
        S: Into<Statements>,
    {
        let batch = StatementBatch::new(statements.into(), parameters)?;
        self.execute_batch(&batch).await
    }

    /// Run an already normalised batch.
    pub async fn execute_batch(&mut self, batch: &StatementBatch) -> DbResult<ExecuteOutput> {
        if self.closed {
            return Err(DbError::connection(
                "Session is closed",
                "Create a new session; a closed session is not reopened",
            ));
        }

        if self.in_flight {
            self.abandon_interrupted();
        }
        self.ensure_live().await?;

        self.in_flight = true;
        let outcome = match self.run(batch).await {
            Ok(output) => Ok(output),
            Err(failure) => Err(self.recover(failure).await),
        };

        self.release_cursor();
        self.in_flight = false;
        outcome
    }

    /// Clean up after an `execute` whose future was dropped before it finished.
    ///
    /// Its transaction may still be open and the connection may hold an unread
    /// response, so neither is reused. Dropping the connection makes the server
    /// roll the transaction back.
    fn abandon_interrupted(&mut self) {
        warn!("Previous execute was interrupted; discarding its transaction.");
        self.discard_handles();
        self.in_flight = false;
    }

    /// Rebuild only the missing pieces: a cursor, or a connection and a cursor.
    async fn ensure_live(&mut self) -> DbResult<()> {
        if self.connection.is_some() && self.cursor.is_some() {
            warn!("The database and cursor are connected.");
            return Ok(());
        }

        if self.connection.is_none() {
            let connection = self.backend.dial(&self.config).await.inspect_err(|e| {
                error!(server = %self.config.display_target(), "Database reconnect failed: {}", e);
            })?;
            warn!(server = %self.config.display_target(), "Database has been reconnected.");
            self.connection = Some(connection);
        } else {
            warn!("Database is connected.");
        }

        let Some(connection) = self.connection.as_mut() else {
            return Err(DbError::internal("Session has no connection after dialing"));
        };
        self.cursor = Some(connection.cursor()?);
        warn!("Database cursor has been reconnected.");
        Ok(())
    }

    async fn run(&mut self, batch: &StatementBatch) -> Result<ExecuteOutput, Failure> {
        let (Some(connection), Some(cursor)) = (self.connection.as_mut(), self.cursor.as_mut())
        else {
            return Err(Failure::new(
                DbError::internal("Session has no live cursor"),
                None,
            ));
        };

        let mut results = Vec::with_capacity(batch.len());
        for (idx, statement) in batch.statements().iter().enumerate() {
            let index = batch.is_batch().then_some(idx);
            let rows = run_statement(connection, cursor, statement)
                .await
                .map_err(|e| Failure::new(e, index))?;
            results.push(rows);
        }

        connection
            .commit()
            .await
            .map_err(|e| Failure::new(e, None))?;

        Ok(match batch {
            StatementBatch::Single(_) => {
                ExecuteOutput::Single(results.into_iter().next().unwrap_or_default())
            }
            StatementBatch::Batch(_) => ExecuteOutput::Batch(results),
        })
    }

    /// Roll back once and build the error returned to the caller.
    async fn recover(&mut self, failure: Failure) -> DbError {
        let Failure {
            error: err,
            connection_lost,
        } = failure;
        error!(error = %err, "Statement execution failed; rolling back");

        let rollback = match self.connection.as_mut() {
            Some(connection) => connection.rollback().await,
            None => Ok(()),
        };

        let result = match rollback {
            Ok(()) => err,
            Err(rollback_err) => {
                error!(error = %rollback_err, "Rollback failed");
                DbError::transaction(format!("Rollback failed: {}", rollback_err), err)
            }
        };

        if connection_lost {
            self.discard_handles();
        }
        result
    }

    fn release_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                error!(error = %e, "Failed to close database cursor");
            }
            warn!("Database has disconnected the cursor.");
        }
    }

    /// Drop handles to a connection that can no longer be used. The next
    /// `execute` redials.
    fn discard_handles(&mut self) {
        self.release_cursor();
        if self.connection.take().is_some() {
            warn!("Database connection was lost and has been discarded.");
        }
    }

    /// Close the cursor, then the connection.
    ///
    /// Both handles end up absent even when closing one fails; the first
    /// failure is returned. Closing an already closed session is a no-op.
    pub async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        self.in_flight = false;
        let was_open = self.connection.is_some() || self.cursor.is_some();
        let mut first_err = None;

        if let Some(cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                error!(error = %e, "Failed to close database cursor");
                first_err.get_or_insert(e);
            }
            warn!("Database has disconnected the cursor.");
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                error!(error = %e, "Failed to close database connection");
                first_err.get_or_insert(e);
            }
            warn!("Database has been disconnected.");
        }

        if was_open {
            warn!("Database has been disconnected completely.");
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_statement<C>(
    connection: &mut C,
    cursor: &mut C::Cursor,
    statement: &Statement,
) -> DbResult<RowSet>
where
    C: BackendConnection,
{
    trace!(
        "SQL Statement -> {} | Parameters -> {}",
        statement.sql,
        describe_params(statement.bind_params())
    );
    cursor
        .execute(connection, &statement.sql, statement.bind_params())
        .await?;
    cursor.fetch_all()
}

/// A failure inside the transaction, before rollback.
struct Failure {
    error: DbError,
    connection_lost: bool,
}

impl Failure {
    /// Classify as an execution error, remembering whether the connection died.
    fn new(err: DbError, statement_index: Option<usize>) -> Self {
        Self {
            connection_lost: err.is_connection_lost(),
            error: err.into_execution(statement_index),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.kind())
            .field("server", &self.config.display_target())
            .field("state", &self.state())
            .field("in_flight", &self.in_flight)
            .field("closed", &self.closed)
            .finish()
    }
}
