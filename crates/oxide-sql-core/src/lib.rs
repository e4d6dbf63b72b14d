//! # oxide-sql-core
//!
//! Shared vocabulary for the oxide execution stack.
//!
//! This crate provides:
//! - The [`Engine`] contract: compile, bind, step, finalize and column
//!   introspection of an embedded SQL engine
//! - Engine result codes and errors ([`ErrorCode`], [`EngineError`])
//! - The closed value type exchanged with the engine ([`SqlValue`]) and
//!   conversions to and from host types
//!
//! It has no dependencies; engines (`oxide-sql-sqlite`) and the execution
//! layer (`oxide-cursor`) both build on it.
//!
//! ## Values
//!
//! ```rust
//! use oxide_sql_core::{FromSqlValue, SqlValue, ToSqlValue};
//!
//! let v = "O'Brien".to_sql_value();
//! assert_eq!(v.to_sql_inline(), "'O''Brien'");
//!
//! let n = i64::from_sql_value(&SqlValue::Int(7)).unwrap();
//! assert_eq!(n, 7);
//! ```

pub mod engine;
pub mod error;
pub mod value;

pub use engine::{Compiled, Engine, Step};
pub use error::{EngineError, ErrorCode};
pub use value::{FromSqlValue, SqlValue, ToSqlValue, ValueError};
