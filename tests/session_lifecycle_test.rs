//! Lifecycle tests for Session against a scripted in-memory backend.
//!
//! The backend records every capability call so tests can check exactly
//! which dials, cursors, commits and rollbacks a call produced.

use async_trait::async_trait;
use db_session::config::SessionConfig;
use db_session::db::{Backend, BackendConnection, BackendCursor, Session};
use db_session::error::{DbError, DbResult};
use db_session::models::{
    DatabaseType, ExecuteOutput, Parameters, QueryParam, RowSet, SessionState, Statements,
};
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    /// Fail this many upcoming dials.
    failing_dials: usize,
    /// Statements that fail with a database error.
    failing_sql: HashSet<String>,
    /// Statements that drop the connection.
    connection_killers: HashSet<String>,
    /// Statements that never complete.
    hanging_sql: HashSet<String>,
    fail_commit: bool,
    fail_rollback: bool,
    fail_connection_close: bool,
}

#[derive(Default)]
struct Recorder {
    script: Script,
    events: Vec<String>,
    /// Statements made durable by a successful commit.
    committed: Vec<String>,
    open_cursors: usize,
    max_open_cursors: usize,
}

impl Recorder {
    fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }
}

type Shared = Arc<Mutex<Recorder>>;

#[derive(Clone, Default)]
struct ScriptedBackend {
    shared: Shared,
}

impl ScriptedBackend {
    fn with_script(script: Script) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Recorder {
                script,
                ..Recorder::default()
            })),
        }
    }

    fn events(&self) -> Vec<String> {
        self.shared.lock().unwrap().events.clone()
    }

    fn count(&self, event: &str) -> usize {
        self.shared.lock().unwrap().count(event)
    }

    fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.shared.lock().unwrap().script);
    }

    fn clear_events(&self) {
        self.shared.lock().unwrap().events.clear();
    }

    fn committed(&self) -> Vec<String> {
        self.shared.lock().unwrap().committed.clone()
    }
}

struct ScriptedConnection {
    shared: Shared,
    dead: bool,
    /// Statements run since the last commit or rollback.
    pending: Vec<String>,
}

struct ScriptedCursor {
    shared: Shared,
    result: Option<RowSet>,
}

#[async_trait]
impl Backend for ScriptedBackend {
    type Connection = ScriptedConnection;

    fn kind(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn dial(&self, _config: &SessionConfig) -> DbResult<ScriptedConnection> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("dial".into());
        if rec.script.failing_dials > 0 {
            rec.script.failing_dials -= 1;
            return Err(DbError::connection(
                "Connection refused",
                "Check that the server is running",
            ));
        }
        Ok(ScriptedConnection {
            shared: self.shared.clone(),
            dead: false,
            pending: Vec::new(),
        })
    }
}

#[async_trait]
impl BackendConnection for ScriptedConnection {
    type Cursor = ScriptedCursor;

    fn cursor(&mut self) -> DbResult<ScriptedCursor> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("cursor".into());
        rec.open_cursors += 1;
        rec.max_open_cursors = rec.max_open_cursors.max(rec.open_cursors);
        Ok(ScriptedCursor {
            shared: self.shared.clone(),
            result: None,
        })
    }

    async fn commit(&mut self) -> DbResult<()> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("commit".into());
        if rec.script.fail_commit {
            return Err(DbError::sql_execution(
                "deadlock detected",
                Some("40P01".into()),
                "retry the transaction",
            ));
        }
        rec.committed.append(&mut self.pending);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("rollback".into());
        self.pending.clear();
        if self.dead {
            return Err(DbError::connection("I/O error: broken pipe", "reconnect"));
        }
        if rec.script.fail_rollback {
            return Err(DbError::sql_execution("rollback refused", None, "check server"));
        }
        Ok(())
    }

    async fn close(self) -> DbResult<()> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("close".into());
        if rec.script.fail_connection_close {
            return Err(DbError::connection("I/O error: reset by peer", "ignore"));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendCursor for ScriptedCursor {
    type Connection = ScriptedConnection;

    async fn execute(
        &mut self,
        connection: &mut ScriptedConnection,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<()> {
        let hangs = {
            let mut rec = self.shared.lock().unwrap();
            rec.events.push(format!("execute:{}", sql));
            rec.script.hanging_sql.contains(sql)
        };
        if hangs {
            std::future::pending::<()>().await;
        }

        let rec = self.shared.lock().unwrap();
        if connection.dead {
            return Err(DbError::connection("I/O error: broken pipe", "reconnect"));
        }
        if rec.script.connection_killers.contains(sql) {
            connection.dead = true;
            return Err(DbError::connection(
                "I/O error: connection reset by peer",
                "reconnect",
            ));
        }
        if rec.script.failing_sql.contains(sql) {
            return Err(DbError::sql_execution(
                format!("syntax error near '{}'", sql),
                Some("42000".into()),
                "Check the SQL syntax",
            ));
        }

        connection.pending.push(sql.to_string());
        let mut row = vec![json!(sql)];
        row.extend(params.iter().map(|p| serde_json::to_value(p).unwrap()));
        self.result = Some(RowSet::new(vec!["sql".into()], vec![row]));
        Ok(())
    }

    fn fetch_all(&mut self) -> DbResult<RowSet> {
        self.result
            .take()
            .ok_or_else(|| DbError::internal("nothing to fetch"))
    }

    fn close(self) -> DbResult<()> {
        let mut rec = self.shared.lock().unwrap();
        rec.events.push("cursor.close".into());
        rec.open_cursors -= 1;
        Ok(())
    }
}

fn config() -> SessionConfig {
    SessionConfig::new(DatabaseType::MySQL).with_password("secret")
}

async fn connected(backend: &ScriptedBackend) -> Session<ScriptedBackend> {
    let session = Session::connect(backend.clone(), config()).await.unwrap();
    backend.clear_events();
    session
}

fn sql_of(rows: &RowSet) -> &str {
    rows.rows[0][0].as_str().unwrap()
}

#[tokio::test]
async fn test_connect_dials_eagerly_and_is_ready() {
    let backend = ScriptedBackend::default();
    let session = Session::connect(backend.clone(), config()).await.unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(backend.events(), vec!["dial", "cursor"]);
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let backend = ScriptedBackend::with_script(Script {
        failing_dials: 1,
        ..Script::default()
    });

    let err = Session::connect(backend.clone(), config()).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(backend.events(), vec!["dial"]);
}

#[tokio::test]
async fn test_single_statement_returns_rows_and_releases_cursor() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let output = session.execute("SELECT 1", None).await.unwrap();

    let rows = output.into_single().expect("single statement result");
    assert_eq!(rows.rows, vec![vec![json!("SELECT 1")]]);
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
    assert_eq!(
        backend.events(),
        vec!["execute:SELECT 1", "commit", "cursor.close"]
    );
}

#[tokio::test]
async fn test_next_execute_creates_cursor_without_redial() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    session.execute("SELECT 1", None).await.unwrap();
    session.execute("SELECT 2", None).await.unwrap();

    assert_eq!(backend.count("dial"), 0);
    assert_eq!(backend.count("cursor"), 1);
    assert_eq!(backend.count("commit"), 2);
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
    assert_eq!(backend.shared.lock().unwrap().max_open_cursors, 1);
}

#[tokio::test]
async fn test_single_statement_params_are_bound_in_order() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let params: Parameters = vec![QueryParam::Int(7), QueryParam::from("x"), QueryParam::Null].into();
    let output = session
        .execute("INSERT INTO t VALUES (?, ?, ?)", Some(params))
        .await
        .unwrap();

    let rows = output.into_single().unwrap();
    assert_eq!(
        rows.rows[0],
        vec![json!("INSERT INTO t VALUES (?, ?, ?)"), json!(7), json!("x"), json!(null)]
    );
}

#[tokio::test]
async fn test_batch_without_params_matches_empty_placeholders() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let omitted = session.execute(["A", "B", "C"], None).await.unwrap();
    let explicit = session
        .execute(
            ["A", "B", "C"],
            Some(Parameters::Batch(vec![None, None, None])),
        )
        .await
        .unwrap();
    let empty_list = session
        .execute(["A", "B", "C"], Some(Parameters::Batch(vec![])))
        .await
        .unwrap();

    assert_eq!(omitted, explicit);
    assert_eq!(omitted, empty_list);
    for rows in omitted.row_sets() {
        assert_eq!(rows.rows[0].len(), 1, "no parameters should be bound");
    }
}

#[tokio::test]
async fn test_batch_results_follow_submission_order() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let output = session
        .execute(
            vec!["B", "A", "C"],
            Some(
                vec![
                    vec![QueryParam::Int(2)],
                    vec![QueryParam::Int(1)],
                    vec![QueryParam::Int(3)],
                ]
                .into(),
            ),
        )
        .await
        .unwrap();

    let sets = output.into_batch().expect("batch result");
    let order: Vec<&str> = sets.iter().map(sql_of).collect();
    assert_eq!(order, vec!["B", "A", "C"]);
    assert_eq!(sets[1].rows[0][1], json!(1));
    assert_eq!(backend.count("commit"), 1);
    assert_eq!(backend.committed(), vec!["B", "A", "C"]);
}

#[tokio::test]
async fn test_unordered_collection_is_a_batch() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let set: BTreeSet<String> = ["SELECT 1".to_string()].into_iter().collect();
    let output = session.execute(set, None).await.unwrap();
    assert!(matches!(output, ExecuteOutput::Batch(ref sets) if sets.len() == 1));
}

#[tokio::test]
async fn test_kth_failure_rolls_back_once() {
    let backend = ScriptedBackend::with_script(Script {
        failing_sql: ["BAD".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let err = session
        .execute(["A", "BAD", "C"], None)
        .await
        .unwrap_err();

    match &err {
        DbError::SqlExecution {
            sql_state,
            statement_index,
            message,
            ..
        } => {
            assert_eq!(*statement_index, Some(1));
            assert_eq!(sql_state.as_deref(), Some("42000"));
            assert!(message.contains("BAD"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        backend.events(),
        vec!["execute:A", "execute:BAD", "rollback", "cursor.close"]
    );
    assert!(backend.committed().is_empty());
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
}

#[tokio::test]
async fn test_session_recovers_after_failed_statement() {
    let backend = ScriptedBackend::with_script(Script {
        failing_sql: ["BAD".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    assert!(session.execute("BAD", None).await.is_err());
    let output = session.execute("GOOD", None).await.unwrap();

    assert_eq!(sql_of(&output.into_single().unwrap()), "GOOD");
    assert_eq!(backend.count("dial"), 0);
}

#[tokio::test]
async fn test_rollback_failure_keeps_original_error() {
    let backend = ScriptedBackend::with_script(Script {
        failing_sql: ["BAD".to_string()].into_iter().collect(),
        fail_rollback: true,
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let err = session.execute(["A", "BAD"], None).await.unwrap_err();

    assert!(matches!(err, DbError::Transaction { .. }));
    assert!(err.to_string().contains("rollback refused"));
    let original = err.original().expect("statement failure is kept");
    assert!(matches!(original, DbError::SqlExecution { .. }));
    assert!(original.to_string().contains("BAD"));
    assert_eq!(err.statement_index(), Some(1));
    assert_eq!(backend.count("rollback"), 1);
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
}

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let backend = ScriptedBackend::with_script(Script {
        fail_commit: true,
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let err = session.execute("UPDATE t SET x = 1", None).await.unwrap_err();

    assert!(matches!(err, DbError::SqlExecution { .. }));
    assert!(err.to_string().contains("deadlock"));
    assert_eq!(
        backend.events(),
        vec!["execute:UPDATE t SET x = 1", "commit", "rollback", "cursor.close"]
    );
}

#[tokio::test]
async fn test_lost_connection_is_redialled_on_next_execute() {
    let backend = ScriptedBackend::with_script(Script {
        connection_killers: ["KILL".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let err = session.execute(["A", "KILL"], None).await.unwrap_err();

    // The rollback on the dead connection fails too; both are reported
    assert!(matches!(err, DbError::Transaction { .. }));
    assert!(matches!(
        err.original(),
        Some(DbError::SqlExecution {
            statement_index: Some(1),
            ..
        })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);

    backend.clear_events();
    let output = session.execute("SELECT 1", None).await.unwrap();
    assert_eq!(sql_of(&output.into_single().unwrap()), "SELECT 1");
    assert_eq!(
        backend.events(),
        vec![
            "dial",
            "cursor",
            "execute:SELECT 1",
            "commit",
            "cursor.close"
        ]
    );
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
}

#[tokio::test]
async fn test_failed_redial_surfaces_connection_error() {
    let backend = ScriptedBackend::with_script(Script {
        connection_killers: ["KILL".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;
    let _ = session.execute("KILL", None).await;

    backend.script(|s| s.failing_dials = 1);
    let err = session.execute("SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(session.state(), SessionState::Disconnected);

    // The following call dials again and succeeds
    assert!(session.execute("SELECT 1", None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_execute_commits_nothing() {
    let backend = ScriptedBackend::with_script(Script {
        hanging_sql: ["SLOW".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let interrupted = tokio::time::timeout(
        Duration::from_millis(500),
        session.execute(["INSERT INTO t VALUES (1)", "SLOW"], None),
    )
    .await;
    assert!(interrupted.is_err(), "execute should still be pending");

    backend.clear_events();
    let output = session.execute("SELECT 1", None).await.unwrap();
    assert_eq!(sql_of(&output.into_single().unwrap()), "SELECT 1");

    // The stale cursor is released and the half-done transaction's connection replaced
    assert_eq!(
        backend.events(),
        vec![
            "cursor.close",
            "dial",
            "cursor",
            "execute:SELECT 1",
            "commit",
            "cursor.close"
        ]
    );
    assert_eq!(backend.committed(), vec!["SELECT 1"]);
    assert_eq!(backend.shared.lock().unwrap().open_cursors, 0);
    assert_eq!(session.state(), SessionState::ConnectedNoCursor);
}

#[tokio::test(start_paused = true)]
async fn test_close_after_interrupted_execute() {
    let backend = ScriptedBackend::with_script(Script {
        hanging_sql: ["SLOW".to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    let interrupted =
        tokio::time::timeout(Duration::from_millis(500), session.execute("SLOW", None)).await;
    assert!(interrupted.is_err());

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(backend.committed().is_empty());

    let err = session.execute("SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
}

#[tokio::test]
async fn test_connect_rejects_config_for_another_database() {
    let backend = ScriptedBackend::default();
    let config = SessionConfig::new(DatabaseType::PostgreSQL);

    let err = Session::connect(backend.clone(), config).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    assert_eq!(backend.events(), vec!["cursor.close", "close"]);
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_close_after_execute_only_closes_connection() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;
    session.execute("SELECT 1", None).await.unwrap();
    backend.clear_events();

    session.close().await.unwrap();
    assert_eq!(backend.events(), vec!["close"]);
}

#[tokio::test]
async fn test_close_failure_still_drops_handles() {
    let backend = ScriptedBackend::with_script(Script {
        fail_connection_close: true,
        ..Script::default()
    });
    let mut session = connected(&backend).await;

    assert!(session.close().await.is_err());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.close().await.is_ok());
}

#[tokio::test]
async fn test_execute_after_close_fails_without_dialing() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;
    session.close().await.unwrap();
    backend.clear_events();

    let err = session.execute("SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn test_shape_errors_touch_nothing() {
    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;

    let err = session
        .execute(["A", "B"], Some(vec![vec![QueryParam::Int(1)]].into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::StatementType { .. }));

    let err = session
        .execute(["A", "B"], Some(vec![QueryParam::Int(1)].into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::StatementType { .. }));

    assert!(backend.events().is_empty());
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_dynamic_statements_shape() {
    let err = Statements::try_from(json!(42)).unwrap_err();
    assert!(matches!(err, DbError::StatementType { .. }));
    assert!(err.to_string().starts_with("Wrong SQL statements type"));

    let backend = ScriptedBackend::default();
    let mut session = connected(&backend).await;
    let statements = Statements::try_from(json!(["A", "B"])).unwrap();
    let output = session.execute(statements, None).await.unwrap();
    assert_eq!(output.row_sets().len(), 2);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let first_backend = ScriptedBackend::default();
    let second_backend = ScriptedBackend::default();
    let mut first = connected(&first_backend).await;
    let mut second = connected(&second_backend).await;

    let (a, b) = tokio::join!(first.execute("A", None), second.execute("B", None));
    assert_eq!(sql_of(&a.unwrap().into_single().unwrap()), "A");
    assert_eq!(sql_of(&b.unwrap().into_single().unwrap()), "B");

    first.close().await.unwrap();
    assert_eq!(second.state(), SessionState::ConnectedNoCursor);
    assert_eq!(second_backend.count("close"), 0);
}
