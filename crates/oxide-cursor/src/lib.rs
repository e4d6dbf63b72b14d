//! Prepared statement caching and cursor execution for embedded SQL
//! engines.
//!
//! `oxide-cursor` sits between application code and an engine implementing
//! [`oxide_sql_core::Engine`]. It provides:
//!
//! - **Statement cache** - compiled statements are pooled per connection
//!   and reused when the same text runs again
//! - **Statement chains** - one `execute` may hold several `;`-separated
//!   statements, compiled and run one at a time
//! - **Batches** - `execute_many` re-runs a chain once per binding set
//! - **Fail-fast concurrency** - cursors on different threads share one
//!   connection; misuse of a single cursor or connection from two places at
//!   once is an error rather than a wait
//! - **Tracers** - exec and row callbacks at connection or cursor level
//!
//! # Example
//!
//! ```rust
//! use oxide_cursor::prelude::*;
//! use oxide_sql_sqlite::SqliteEngine;
//!
//! let engine = SqliteEngine::open_in_memory().unwrap();
//! let conn = Connection::open(engine, ConnectionConfig::default());
//!
//! let cursor = conn.cursor().unwrap();
//! cursor
//!     .execute("CREATE TABLE t(x); INSERT INTO t VALUES (?), (?)", [1, 2])
//!     .unwrap();
//! cursor
//!     .execute_many("INSERT INTO t VALUES (?)", vec![[3], [4]])
//!     .unwrap();
//!
//! let rows = cursor
//!     .execute("SELECT sum(x) FROM t", ())
//!     .unwrap()
//!     .fetch_all()
//!     .unwrap();
//! assert_eq!(rows[0].get::<i64>(0).unwrap(), 10);
//! assert_eq!(cursor.status().unwrap(), Status::Done);
//! ```

pub mod bindings;
pub mod cache;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod row;

pub use bindings::{Bindings, TraceBindings};
pub use cache::{CacheStats, CompiledUnit, Disposition, StatementCache};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use cursor::{Cursor, Rows, Status};
pub use error::{CursorError, Result};
pub use hooks::{ExecTrace, Hooks, RowTrace};
pub use row::{Column, Row};

/// Commonly used types.
pub mod prelude {
    pub use crate::bindings::{Bindings, TraceBindings};
    pub use crate::config::ConnectionConfig;
    pub use crate::connection::Connection;
    pub use crate::cursor::{Cursor, Status};
    pub use crate::error::{CursorError, Result};
    pub use crate::row::{Column, Row};
    pub use oxide_sql_core::{FromSqlValue, SqlValue, ToSqlValue};
}
