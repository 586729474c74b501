//! Single-connection database sessions for MySQL and PostgreSQL.
//!
//! A [`Session`] dials eagerly, heals a lost connection lazily on the next
//! `execute`, runs each call under one commit, and rolls back once on failure.
//! Backends plug in through the capability traits in [`db::backend`].

pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod models;

pub use config::{Config, SessionConfig};
pub use db::{AnyBackend, Session};
pub use error::{DbError, DbResult};
