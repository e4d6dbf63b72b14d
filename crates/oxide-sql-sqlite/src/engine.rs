//! [`Engine`] implementation backed by the SQLite C library.

use oxide_sql_core::{Compiled, Engine, EngineError, SqlValue, Step};
use tracing::debug;

use crate::ffi::{
    RawDb, RawStmt, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI,
};
use crate::stats::EngineStats;

/// How a database file is opened.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    read_only: bool,
    create: bool,
    uri: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    /// Read-write, creating the file if it does not exist.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read_only: false,
            create: true,
            uri: false,
        }
    }

    /// Opens the database read-only. Implies `create(false)`.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Creates the file when missing.
    #[must_use]
    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Interprets the path as a `file:` URI.
    #[must_use]
    pub const fn uri(mut self, uri: bool) -> Self {
        self.uri = uri;
        self
    }

    fn flags(&self) -> i32 {
        let mut flags = SQLITE_OPEN_FULLMUTEX;
        if self.read_only {
            flags |= SQLITE_OPEN_READONLY;
        } else {
            flags |= SQLITE_OPEN_READWRITE;
            if self.create {
                flags |= SQLITE_OPEN_CREATE;
            }
        }
        if self.uri {
            flags |= SQLITE_OPEN_URI;
        }
        flags
    }
}

/// A compiled SQLite statement.
pub struct SqliteStatement(RawStmt);

impl std::fmt::Debug for SqliteStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SqliteStatement")
    }
}

/// One SQLite database connection, opened in serialized mode so it can be
/// shared by several threads.
pub struct SqliteEngine {
    db: RawDb,
    path: String,
    stats: EngineStats,
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("path", &self.path)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SqliteEngine {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &str) -> Result<Self, EngineError> {
        Self::open_with(path, &OpenOptions::new())
    }

    /// Opens the database at `path` with explicit options.
    pub fn open_with(path: &str, options: &OpenOptions) -> Result<Self, EngineError> {
        let db = RawDb::open(path, options.flags())?;
        debug!(path, read_only = options.read_only, "opened database");
        Ok(Self {
            db,
            path: String::from(path),
            stats: EngineStats::default(),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::open(":memory:")
    }

    /// Path the database was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handle instrumentation counters.
    #[must_use]
    pub const fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Rows modified by the most recently completed statement.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.db.changes()
    }

    /// Rowid of the most recent successful INSERT.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.db.last_insert_rowid()
    }

    /// Whether [`Engine::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }
}

impl Engine for SqliteEngine {
    type Handle = SqliteStatement;

    fn compile(&self, sql: &str) -> Result<Compiled<SqliteStatement>, EngineError> {
        if sql.contains('\0') {
            return Err(EngineError::misuse("SQL text contains a NUL byte"));
        }
        let (stmt, consumed) = self.db.prepare(sql)?;
        if stmt.is_some() {
            self.stats.record_compile();
        }
        Ok(Compiled {
            handle: stmt.map(SqliteStatement),
            consumed,
        })
    }

    fn step(&self, handle: &mut SqliteStatement) -> Result<Step, EngineError> {
        self.stats.record_step();
        if handle.0.step()? {
            Ok(Step::Row)
        } else {
            Ok(Step::Done)
        }
    }

    fn reset(&self, handle: &mut SqliteStatement) -> Result<(), EngineError> {
        self.stats.record_reset();
        handle.0.reset()
    }

    fn bind(
        &self,
        handle: &mut SqliteStatement,
        index: usize,
        value: &SqlValue,
    ) -> Result<(), EngineError> {
        handle.0.bind(index, value)
    }

    fn finalize(&self, handle: SqliteStatement) -> Result<(), EngineError> {
        self.stats.record_finalize();
        handle.0.finalize()
    }

    fn parameter_count(&self, handle: &SqliteStatement) -> usize {
        handle.0.parameter_count()
    }

    fn parameter_name(&self, handle: &SqliteStatement, index: usize) -> Option<String> {
        handle.0.parameter_name(index)
    }

    fn column_count(&self, handle: &SqliteStatement) -> usize {
        handle.0.column_count()
    }

    fn data_count(&self, handle: &SqliteStatement) -> usize {
        handle.0.data_count()
    }

    fn column_name(&self, handle: &SqliteStatement, index: usize) -> String {
        handle.0.column_name(index)
    }

    fn column_decltype(&self, handle: &SqliteStatement, index: usize) -> Option<String> {
        handle.0.column_decltype(index)
    }

    fn column_value(&self, handle: &SqliteStatement, index: usize) -> SqlValue {
        handle.0.column_value(index)
    }

    fn interrupt(&self) {
        self.db.interrupt();
    }

    fn close(&self) -> Result<(), EngineError> {
        debug!(path = %self.path, live = self.stats.live(), "closing database");
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_sql_core::ErrorCode;

    fn run(engine: &SqliteEngine, sql: &str) {
        let mut rest = sql;
        while !rest.trim().is_empty() {
            let compiled = engine.compile(rest).unwrap();
            if let Some(mut stmt) = compiled.handle {
                while engine.step(&mut stmt).unwrap() == Step::Row {}
                engine.finalize(stmt).unwrap();
            }
            rest = &rest[compiled.consumed..];
        }
    }

    #[test]
    fn test_compile_reports_consumed_bytes() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let sql = "SELECT 1; SELECT 2";
        let compiled = engine.compile(sql).unwrap();
        assert_eq!(&sql[..compiled.consumed], "SELECT 1;");
        engine.finalize(compiled.handle.unwrap()).unwrap();

        let tail = engine.compile(&sql[9..]).unwrap();
        assert_eq!(tail.consumed, sql.len() - 9);
        engine.finalize(tail.handle.unwrap()).unwrap();
    }

    #[test]
    fn test_compile_comment_only_has_no_handle() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let compiled = engine.compile("  -- nothing here\n").unwrap();
        assert!(compiled.handle.is_none());
        assert_eq!(engine.stats().compiled(), 0);
    }

    #[test]
    fn test_compile_error() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let err = engine.compile("SELEKT 1").unwrap_err();
        assert_eq!(err.code.primary(), ErrorCode::ERROR);
        assert!(err.message.contains("syntax error"));
    }

    #[test]
    fn test_compile_rejects_nul() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let err = engine.compile("SELECT 1;\0SELECT 2").unwrap_err();
        assert!(err.code.is_misuse());
    }

    #[test]
    fn test_step_and_read_columns() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        run(&engine, "CREATE TABLE t(a INTEGER, b TEXT, c BLOB, d REAL);");
        run(&engine, "INSERT INTO t VALUES (1, 'x', X'0102', 2.5);");

        let mut stmt = engine
            .compile("SELECT a, b, c, d, NULL FROM t")
            .unwrap()
            .handle
            .unwrap();
        assert_eq!(engine.column_count(&stmt), 5);
        assert_eq!(engine.data_count(&stmt), 0);
        assert_eq!(engine.step(&mut stmt).unwrap(), Step::Row);
        assert_eq!(engine.data_count(&stmt), 5);
        assert_eq!(engine.column_name(&stmt, 1), "b");
        assert_eq!(engine.column_decltype(&stmt, 0).as_deref(), Some("INTEGER"));
        assert_eq!(engine.column_decltype(&stmt, 4), None);
        assert_eq!(engine.column_value(&stmt, 0), SqlValue::Int(1));
        assert_eq!(engine.column_value(&stmt, 1), SqlValue::Text(String::from("x")));
        assert_eq!(engine.column_value(&stmt, 2), SqlValue::Blob(vec![1, 2]));
        assert_eq!(engine.column_value(&stmt, 3), SqlValue::Float(2.5));
        assert_eq!(engine.column_value(&stmt, 4), SqlValue::Null);
        assert_eq!(engine.step(&mut stmt).unwrap(), Step::Done);
        engine.finalize(stmt).unwrap();
    }

    #[test]
    fn test_parameters_and_binding() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let mut stmt = engine
            .compile("SELECT ?, :name, @other, $dollar, ?7")
            .unwrap()
            .handle
            .unwrap();
        assert_eq!(engine.parameter_count(&stmt), 7);
        assert_eq!(engine.parameter_name(&stmt, 1), None);
        assert_eq!(engine.parameter_name(&stmt, 2).as_deref(), Some(":name"));
        assert_eq!(engine.parameter_name(&stmt, 3).as_deref(), Some("@other"));
        assert_eq!(engine.parameter_name(&stmt, 4).as_deref(), Some("$dollar"));
        assert_eq!(engine.parameter_name(&stmt, 7).as_deref(), Some("?7"));

        engine.bind(&mut stmt, 1, &SqlValue::Int(5)).unwrap();
        engine
            .bind(&mut stmt, 2, &SqlValue::Text(String::from("n")))
            .unwrap();
        engine.bind(&mut stmt, 3, &SqlValue::ZeroBlob(3)).unwrap();
        assert_eq!(engine.step(&mut stmt).unwrap(), Step::Row);
        assert_eq!(engine.column_value(&stmt, 0), SqlValue::Int(5));
        assert_eq!(engine.column_value(&stmt, 1), SqlValue::Text(String::from("n")));
        assert_eq!(engine.column_value(&stmt, 2), SqlValue::Blob(vec![0, 0, 0]));
        assert_eq!(engine.column_value(&stmt, 3), SqlValue::Null);

        // reset clears bindings
        engine.reset(&mut stmt).unwrap();
        assert_eq!(engine.step(&mut stmt).unwrap(), Step::Row);
        assert_eq!(engine.column_value(&stmt, 0), SqlValue::Null);
        engine.finalize(stmt).unwrap();
    }

    #[test]
    fn test_bind_out_of_range() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let mut stmt = engine.compile("SELECT ?").unwrap().handle.unwrap();
        let err = engine.bind(&mut stmt, 2, &SqlValue::Int(1)).unwrap_err();
        assert_eq!(err.code.primary(), ErrorCode::RANGE);
        engine.finalize(stmt).unwrap();
    }

    #[test]
    fn test_step_error_carries_extended_code() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        run(&engine, "CREATE TABLE u(x UNIQUE); INSERT INTO u VALUES (1);");
        let mut stmt = engine
            .compile("INSERT INTO u VALUES (1)")
            .unwrap()
            .handle
            .unwrap();
        let err = engine.step(&mut stmt).unwrap_err();
        assert_eq!(err.code.primary(), ErrorCode::CONSTRAINT);
        assert_ne!(err.code, ErrorCode::CONSTRAINT);
        assert!(err.message.contains("UNIQUE"));
        // finalize reports the failed step again
        assert!(engine.finalize(stmt).is_err());
    }

    #[test]
    fn test_stats_and_changes() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        run(&engine, "CREATE TABLE t(x); INSERT INTO t VALUES (1), (2);");
        assert_eq!(engine.changes(), 2);
        assert_eq!(engine.last_insert_rowid(), 2);
        assert_eq!(engine.stats().compiled(), 2);
        assert_eq!(engine.stats().finalized(), 2);
        assert_eq!(engine.stats().live(), 0);
    }

    #[test]
    fn test_interrupt_and_close_after_close() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());
        engine.interrupt();
        assert_eq!(engine.changes(), 0);
        let err = engine.compile("SELECT 1").unwrap_err();
        assert!(err.code.is_misuse());
    }

    #[test]
    fn test_statement_outlives_close() {
        let engine = SqliteEngine::open_in_memory().unwrap();
        let mut stmt = engine.compile("SELECT 1").unwrap().handle.unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());

        // the connection lingers until its last statement is finalized
        assert_eq!(engine.step(&mut stmt).unwrap(), Step::Row);
        engine.finalize(stmt).unwrap();
        assert_eq!(engine.stats().live(), 0);
    }

    #[test]
    fn test_open_read_only_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db").to_string_lossy().into_owned();
        let err = SqliteEngine::open_with(&path, &OpenOptions::new().read_only(true)).unwrap_err();
        assert_eq!(err.code.primary(), ErrorCode::CANTOPEN);
    }
}
