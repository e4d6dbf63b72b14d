//! # oxide-sql-sqlite
//!
//! SQLite implementation of the [`oxide_sql_core::Engine`] contract.
//!
//! The library is compiled in (`rusqlite`'s bundled `libsqlite3-sys`) and
//! driven directly through its C API:
//!
//! - **Statement boundaries**: [`Engine::compile`] prepares only the first
//!   statement of its input and reports how many bytes it consumed, so the
//!   caller can walk a `;`-separated script one statement at a time.
//! - **Threading**: databases are opened in serialized mode
//!   (`SQLITE_OPEN_FULLMUTEX`). One [`SqliteEngine`] may be shared between
//!   threads; each [`SqliteStatement`] is used by one owner at a time.
//! - **Errors**: extended result codes are enabled, and the error message is
//!   read while the connection mutex is still held.
//! - **Instrumentation**: [`EngineStats`] counts compiled and finalized
//!   handles, steps and resets.
//!
//! All `unsafe` code lives in the private `ffi` module.
//!
//! ## Example
//!
//! ```rust
//! use oxide_sql_core::{Engine, SqlValue, Step};
//! use oxide_sql_sqlite::SqliteEngine;
//!
//! let engine = SqliteEngine::open_in_memory().unwrap();
//! let compiled = engine.compile("SELECT ? + 1; SELECT 2").unwrap();
//! assert_eq!(compiled.consumed, "SELECT ? + 1;".len());
//!
//! let mut stmt = compiled.handle.unwrap();
//! engine.bind(&mut stmt, 1, &SqlValue::Int(41)).unwrap();
//! assert_eq!(engine.step(&mut stmt).unwrap(), Step::Row);
//! assert_eq!(engine.column_value(&stmt, 0), SqlValue::Int(42));
//! engine.finalize(stmt).unwrap();
//! assert_eq!(engine.stats().live(), 0);
//! ```
//!
//! [`Engine::compile`]: oxide_sql_core::Engine::compile

mod engine;
#[allow(unsafe_code)]
mod ffi;
mod stats;

pub use engine::{OpenOptions, SqliteEngine, SqliteStatement};
pub use stats::EngineStats;
