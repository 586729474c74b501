//! Database access layer.
//!
//! This module provides:
//! - The backend capability traits a session runs on
//! - sqlx drivers for MySQL and PostgreSQL
//! - Runtime backend selection
//! - Parameter binding and row decoding
//! - The session lifecycle manager

pub mod any;
pub mod backend;
pub mod drivers;
pub mod params;
pub mod session;
pub mod types;

pub use any::{AnyBackend, AnyConnection, AnyCursor};
pub use backend::{Backend, BackendConnection, BackendCursor, CursorOf};
pub use drivers::mysql::MySqlBackend;
pub use drivers::postgres::PostgresBackend;
pub use session::Session;
