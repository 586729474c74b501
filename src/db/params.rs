//! Parameter binding for positional statement placeholders.
//!
//! Placeholders are passed through untouched: `?` for MySQL, `$1..$n` for PostgreSQL.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Render parameters for statement tracing. Binary values are summarised by length.
pub(crate) fn describe_params(params: &[QueryParam]) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|p| match p {
            QueryParam::Null => "NULL".to_string(),
            QueryParam::Bool(v) => v.to_string(),
            QueryParam::Int(v) => v.to_string(),
            QueryParam::Float(v) => v.to_string(),
            QueryParam::String(v) => format!("{:?}", v),
            QueryParam::Bytes(v) => format!("<{} bytes>", v.len()),
            QueryParam::Json(v) => v.to_string(),
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}
