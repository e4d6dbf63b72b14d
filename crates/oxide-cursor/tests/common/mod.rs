//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::result::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use oxide_cursor::prelude::*;
use oxide_sql_core::{Compiled, Engine, EngineError, ErrorCode, Step};
use oxide_sql_sqlite::{SqliteEngine, SqliteStatement};

/// In-memory connection with the default configuration.
pub fn memory() -> Connection<SqliteEngine> {
    memory_with(ConnectionConfig::default())
}

/// In-memory connection with `config`.
pub fn memory_with(config: ConnectionConfig) -> Connection<SqliteEngine> {
    Connection::open(SqliteEngine::open_in_memory().unwrap(), config)
}

/// Runs `sql` to completion on a fresh cursor.
pub fn run<E: Engine>(conn: &Connection<E>, sql: &str) {
    conn.execute(sql, ()).unwrap().fetch_all().unwrap();
}

/// Every column of every row as an integer.
pub fn ints(rows: &[Row]) -> Vec<Vec<i64>> {
    rows.iter()
        .map(|row| (0..row.len()).map(|i| row.get::<i64>(i).unwrap()).collect())
        .collect()
}

/// SQLite engine whose finalize and reset can be made to fail.
///
/// The wrapped statement is always finalized or reset; only the reported
/// result changes.
pub struct FaultyEngine {
    pub inner: SqliteEngine,
    pub fail_finalize: AtomicBool,
    pub fail_reset: Mutex<Option<ErrorCode>>,
}

impl FaultyEngine {
    pub fn new() -> Self {
        Self {
            inner: SqliteEngine::open_in_memory().unwrap(),
            fail_finalize: AtomicBool::new(false),
            fail_reset: Mutex::new(None),
        }
    }

    pub fn set_fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reset(&self, code: Option<ErrorCode>) {
        *self.fail_reset.lock().unwrap() = code;
    }
}

impl Engine for FaultyEngine {
    type Handle = SqliteStatement;

    fn compile(&self, sql: &str) -> Result<Compiled<SqliteStatement>, EngineError> {
        self.inner.compile(sql)
    }

    fn step(&self, handle: &mut SqliteStatement) -> Result<Step, EngineError> {
        self.inner.step(handle)
    }

    fn reset(&self, handle: &mut SqliteStatement) -> Result<(), EngineError> {
        let result = self.inner.reset(handle);
        if let Some(code) = *self.fail_reset.lock().unwrap() {
            return Err(EngineError::new(code, "injected reset failure"));
        }
        result
    }

    fn bind(
        &self,
        handle: &mut SqliteStatement,
        index: usize,
        value: &SqlValue,
    ) -> Result<(), EngineError> {
        self.inner.bind(handle, index, value)
    }

    fn finalize(&self, handle: SqliteStatement) -> Result<(), EngineError> {
        let result = self.inner.finalize(handle);
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(EngineError::new(ErrorCode::IOERR, "injected finalize failure"));
        }
        result
    }

    fn parameter_count(&self, handle: &SqliteStatement) -> usize {
        self.inner.parameter_count(handle)
    }

    fn parameter_name(&self, handle: &SqliteStatement, index: usize) -> Option<String> {
        self.inner.parameter_name(handle, index)
    }

    fn column_count(&self, handle: &SqliteStatement) -> usize {
        self.inner.column_count(handle)
    }

    fn data_count(&self, handle: &SqliteStatement) -> usize {
        self.inner.data_count(handle)
    }

    fn column_name(&self, handle: &SqliteStatement, index: usize) -> String {
        self.inner.column_name(handle, index)
    }

    fn column_decltype(&self, handle: &SqliteStatement, index: usize) -> Option<String> {
        self.inner.column_decltype(handle, index)
    }

    fn column_value(&self, handle: &SqliteStatement, index: usize) -> SqlValue {
        self.inner.column_value(handle, index)
    }

    fn interrupt(&self) {
        self.inner.interrupt();
    }

    fn close(&self) -> Result<(), EngineError> {
        self.inner.close()
    }
}
