//! sqlx-backed MySQL and PostgreSQL drivers.
//!
//! Each backend holds one plain connection (no pool). Transactions are opened
//! with a raw `BEGIN` before the first statement after a commit or rollback,
//! so every statement between two commits belongs to the same transaction.

use crate::config::SessionConfig;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::future::Future;
use tracing::{debug, error};

/// Await a driver connect future, bounded by the configured connect timeout.
async fn connect_within<C, F>(
    db_type: DatabaseType,
    config: &SessionConfig,
    connect: F,
) -> DbResult<C>
where
    F: Future<Output = Result<C, sqlx::Error>>,
{
    match tokio::time::timeout(config.connect_timeout(), connect).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => {
            error!(server = %config.display_target(), "Failed to connect to {}: {}", db_type, e);
            Err(DbError::connection(
                format!(
                    "Failed to connect to {} at {}: {}",
                    db_type,
                    config.display_target(),
                    e
                ),
                connection_suggestion(db_type, &e),
            ))
        }
        Err(_) => {
            error!(
                server = %config.display_target(),
                "Connecting to {} timed out after {}s", db_type, config.connect_timeout_secs
            );
            Err(DbError::connection(
                format!(
                    "Timed out after {}s connecting to {} at {}",
                    config.connect_timeout_secs,
                    db_type,
                    config.display_target()
                ),
                "Check that the server is reachable or raise connect_timeout",
            ))
        }
    }
}

/// Get a helpful suggestion for a dial failure.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication")
        || error_str.contains("password")
        || error_str.contains("access denied")
    {
        return "Verify the user and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    format!(
        "Verify host, port and credentials; the server expects {}://user:pass@host:{}/db",
        db_type.scheme(),
        db_type.default_port()
    )
}

fn missing_result() -> DbError {
    DbError::internal("No result to fetch: no statement has been executed on this cursor")
}

pub mod mysql {
    use super::*;
    use crate::db::backend::{Backend, BackendConnection, BackendCursor};
    use crate::db::params::bind_mysql_param;
    use crate::db::types::decode_rows;
    use crate::models::{QueryParam, RowSet};
    use async_trait::async_trait;
    use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
    use sqlx::{ConnectOptions, Connection, Executor};
    use std::str::FromStr;

    /// MySQL / MariaDB driver.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MySqlBackend;

    #[async_trait]
    impl Backend for MySqlBackend {
        type Connection = MySqlSessionConnection;

        fn kind(&self) -> DatabaseType {
            DatabaseType::MySQL
        }

        async fn dial(&self, config: &SessionConfig) -> DbResult<Self::Connection> {
            let url = config.connection_url()?;
            let options = MySqlConnectOptions::from_str(url.as_str())
                .map_err(|e| {
                    DbError::connection(
                        format!("Invalid MySQL connection options: {}", e),
                        connection_suggestion(DatabaseType::MySQL, &e),
                    )
                })?
                .charset(config.charset_or_default());

            debug!(
                server = %config.display_target(),
                charset = config.charset_or_default(),
                "Dialing MySQL"
            );
            let conn = connect_within(DatabaseType::MySQL, config, options.connect()).await?;
            Ok(MySqlSessionConnection {
                conn,
                in_transaction: false,
            })
        }
    }

    /// An open MySQL connection.
    pub struct MySqlSessionConnection {
        conn: MySqlConnection,
        in_transaction: bool,
    }

    impl MySqlSessionConnection {
        async fn begin_if_needed(&mut self) -> DbResult<()> {
            if !self.in_transaction {
                self.conn.execute("BEGIN").await?;
                self.in_transaction = true;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BackendConnection for MySqlSessionConnection {
        type Cursor = MySqlCursor;

        fn cursor(&mut self) -> DbResult<MySqlCursor> {
            Ok(MySqlCursor { result: None })
        }

        async fn commit(&mut self) -> DbResult<()> {
            if self.in_transaction {
                self.conn.execute("COMMIT").await?;
                self.in_transaction = false;
            }
            Ok(())
        }

        async fn rollback(&mut self) -> DbResult<()> {
            if self.in_transaction {
                self.in_transaction = false;
                self.conn.execute("ROLLBACK").await?;
            }
            Ok(())
        }

        async fn close(self) -> DbResult<()> {
            self.conn.close().await?;
            Ok(())
        }
    }

    /// Result buffer for one MySQL statement at a time.
    pub struct MySqlCursor {
        result: Option<RowSet>,
    }

    #[async_trait]
    impl BackendCursor for MySqlCursor {
        type Connection = MySqlSessionConnection;

        async fn execute(
            &mut self,
            connection: &mut MySqlSessionConnection,
            sql: &str,
            params: &[QueryParam],
        ) -> DbResult<()> {
            self.result = None;
            connection.begin_if_needed().await?;

            // Without parameters use the text protocol, which accepts any statement
            let rows = if params.is_empty() {
                connection.conn.fetch_all(sql).await?
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query.fetch_all(&mut connection.conn).await?
            };

            self.result = Some(decode_rows(&rows));
            Ok(())
        }

        fn fetch_all(&mut self) -> DbResult<RowSet> {
            self.result.take().ok_or_else(missing_result)
        }

        fn close(self) -> DbResult<()> {
            Ok(())
        }
    }
}

pub mod postgres {
    use super::*;
    use crate::db::backend::{Backend, BackendConnection, BackendCursor};
    use crate::db::params::bind_postgres_param;
    use crate::db::types::decode_rows;
    use crate::models::{QueryParam, RowSet};
    use async_trait::async_trait;
    use sqlx::postgres::{PgConnectOptions, PgConnection};
    use sqlx::{ConnectOptions, Connection, Executor};
    use std::str::FromStr;

    /// PostgreSQL driver.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PostgresBackend;

    #[async_trait]
    impl Backend for PostgresBackend {
        type Connection = PgSessionConnection;

        fn kind(&self) -> DatabaseType {
            DatabaseType::PostgreSQL
        }

        async fn dial(&self, config: &SessionConfig) -> DbResult<Self::Connection> {
            let url = config.connection_url()?;
            let options = PgConnectOptions::from_str(url.as_str()).map_err(|e| {
                DbError::connection(
                    format!("Invalid PostgreSQL connection options: {}", e),
                    connection_suggestion(DatabaseType::PostgreSQL, &e),
                )
            })?;
            if config.charset.is_some() {
                debug!("Ignoring charset for PostgreSQL; client encoding is UTF8");
            }

            debug!(server = %config.display_target(), "Dialing PostgreSQL");
            let conn = connect_within(DatabaseType::PostgreSQL, config, options.connect()).await?;
            Ok(PgSessionConnection {
                conn,
                in_transaction: false,
            })
        }
    }

    /// An open PostgreSQL connection.
    pub struct PgSessionConnection {
        conn: PgConnection,
        in_transaction: bool,
    }

    impl PgSessionConnection {
        async fn begin_if_needed(&mut self) -> DbResult<()> {
            if !self.in_transaction {
                self.conn.execute("BEGIN").await?;
                self.in_transaction = true;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BackendConnection for PgSessionConnection {
        type Cursor = PgCursor;

        fn cursor(&mut self) -> DbResult<PgCursor> {
            Ok(PgCursor { result: None })
        }

        async fn commit(&mut self) -> DbResult<()> {
            if self.in_transaction {
                self.conn.execute("COMMIT").await?;
                self.in_transaction = false;
            }
            Ok(())
        }

        async fn rollback(&mut self) -> DbResult<()> {
            if self.in_transaction {
                self.in_transaction = false;
                self.conn.execute("ROLLBACK").await?;
            }
            Ok(())
        }

        async fn close(self) -> DbResult<()> {
            self.conn.close().await?;
            Ok(())
        }
    }

    /// Result buffer for one PostgreSQL statement at a time.
    pub struct PgCursor {
        result: Option<RowSet>,
    }

    #[async_trait]
    impl BackendCursor for PgCursor {
        type Connection = PgSessionConnection;

        async fn execute(
            &mut self,
            connection: &mut PgSessionConnection,
            sql: &str,
            params: &[QueryParam],
        ) -> DbResult<()> {
            self.result = None;
            connection.begin_if_needed().await?;

            let rows = if params.is_empty() {
                connection.conn.fetch_all(sql).await?
            } else {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.fetch_all(&mut connection.conn).await?
            };

            self.result = Some(decode_rows(&rows));
            Ok(())
        }

        fn fetch_all(&mut self) -> DbResult<RowSet> {
            self.result.take().ok_or_else(missing_result)
        }

        fn close(self) -> DbResult<()> {
            Ok(())
        }
    }
}
