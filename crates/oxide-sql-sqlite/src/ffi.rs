//! Raw SQLite C API access.
//!
//! This is the **only** module of the workspace that contains `unsafe`
//! code or C types. [`RawDb`] owns a `sqlite3*` opened in serialized
//! (`FULLMUTEX`) mode and [`RawStmt`] owns a `sqlite3_stmt*`. Everything
//! above this module works with safe types.
//!
//! The connection pointer sits behind a `RwLock`: calls that use it hold a
//! read guard, and `close` takes the write guard to null it, so the
//! pointer is never freed while another thread is inside a call.

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr::{self, NonNull};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use oxide_sql_core::{EngineError, ErrorCode, SqlValue};
use rusqlite::ffi;

pub(crate) use ffi::{
    SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE,
    SQLITE_OPEN_URI,
};

/// Static description of a result code (`sqlite3_errstr`).
fn errstr(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static NUL-terminated
    // string for every input.
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

/// Builds an error from the connection's last error message.
///
/// # Safety
///
/// `db` must be a valid open connection and the caller must hold its mutex
/// so the message belongs to the call that produced `rc`.
unsafe fn error_from_db(db: *mut ffi::sqlite3, rc: c_int) -> EngineError {
    let msg = ffi::sqlite3_errmsg(db);
    let message = if msg.is_null() {
        errstr(rc)
    } else {
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    };
    EngineError::new(ErrorCode(rc), message)
}

fn too_big(what: &str) -> EngineError {
    EngineError::new(ErrorCode::TOOBIG, format!("{what} exceeds engine size limit"))
}

/// Holds a connection's recursive mutex for the lifetime of the guard.
///
/// Keeps the error message read after a failing call paired with that call
/// when several threads share the connection.
struct DbMutex(*mut ffi::sqlite3_mutex);

impl DbMutex {
    fn enter(db: *mut ffi::sqlite3) -> Self {
        // SAFETY: db is a valid connection; sqlite3_db_mutex returns NULL
        // outside serialized mode and sqlite3_mutex_enter(NULL) is a no-op.
        unsafe {
            let mutex = ffi::sqlite3_db_mutex(db);
            ffi::sqlite3_mutex_enter(mutex);
            Self(mutex)
        }
    }
}

impl Drop for DbMutex {
    fn drop(&mut self) {
        // SAFETY: entered in DbMutex::enter on this thread.
        unsafe { ffi::sqlite3_mutex_leave(self.0) }
    }
}

/// An open `sqlite3*` connection. Null once closed.
pub(crate) struct RawDb {
    db: RwLock<*mut ffi::sqlite3>,
}

// SAFETY: the connection is opened in serialized mode, so sqlite itself
// serializes calls from several threads. The pointer is only dereferenced
// under a read guard and only freed under the write guard.
unsafe impl Send for RawDb {}
unsafe impl Sync for RawDb {}

impl RawDb {
    /// Opens a database with `sqlite3_open_v2` and enables extended result
    /// codes.
    pub(crate) fn open(path: &str, flags: c_int) -> Result<Self, EngineError> {
        let c_path = CString::new(path)
            .map_err(|_| EngineError::misuse("database path contains a NUL byte"))?;
        let mut db = ptr::null_mut();
        // SAFETY: c_path is NUL-terminated and db is a valid out pointer.
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            if db.is_null() {
                return Err(EngineError::new(ErrorCode(rc), errstr(rc)));
            }
            // SAFETY: sqlite allocates a handle even on failure; it carries
            // the error message and must be closed.
            let err = unsafe { error_from_db(db, rc) };
            unsafe { ffi::sqlite3_close(db) };
            return Err(err);
        }
        // SAFETY: db is open.
        unsafe { ffi::sqlite3_extended_result_codes(db, 1) };
        Ok(Self {
            db: RwLock::new(db),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, *mut ffi::sqlite3> {
        self.db.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether [`close`](Self::close) has run.
    pub(crate) fn is_closed(&self) -> bool {
        self.read().is_null()
    }

    /// Compiles the first statement of `sql`, returning the statement (if
    /// the consumed text held one) and the number of bytes consumed.
    pub(crate) fn prepare(&self, sql: &str) -> Result<(Option<RawStmt>, usize), EngineError> {
        let guard = self.read();
        let db = *guard;
        if db.is_null() {
            return Err(EngineError::misuse("database connection is closed"));
        }
        let len = c_int::try_from(sql.len()).map_err(|_| too_big("SQL text"))?;
        let start = sql.as_ptr().cast::<c_char>();
        let mut stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();

        let _lock = DbMutex::enter(db);
        // SAFETY: start..start+len is valid UTF-8 owned by `sql`; sqlite
        // reads at most `len` bytes and sets tail inside that range.
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, start, len, &mut stmt, &mut tail) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: db is open and its mutex is held.
            return Err(unsafe { error_from_db(db, rc) });
        }

        let consumed = if tail.is_null() {
            sql.len()
        } else {
            // SAFETY: tail points into the same allocation as start.
            let offset = unsafe { tail.offset_from(start) };
            usize::try_from(offset).unwrap_or(sql.len())
        };
        Ok((NonNull::new(stmt).map(|ptr| RawStmt { ptr }), consumed))
    }

    /// Interrupts any running statement on this connection.
    pub(crate) fn interrupt(&self) {
        let db = self.read();
        if !db.is_null() {
            // SAFETY: db is open while the read guard is held;
            // sqlite3_interrupt is safe from any thread.
            unsafe { ffi::sqlite3_interrupt(*db) }
        }
    }

    /// Rows changed by the most recent statement.
    pub(crate) fn changes(&self) -> u64 {
        let db = self.read();
        if db.is_null() {
            return 0;
        }
        // SAFETY: db is open while the read guard is held.
        let n = unsafe { ffi::sqlite3_changes(*db) };
        u64::try_from(n).unwrap_or(0)
    }

    /// Rowid of the most recent successful INSERT.
    pub(crate) fn last_insert_rowid(&self) -> i64 {
        let db = self.read();
        if db.is_null() {
            return 0;
        }
        // SAFETY: db is open while the read guard is held.
        unsafe { ffi::sqlite3_last_insert_rowid(*db) }
    }

    /// Closes the connection. Waits for calls in progress on other threads.
    /// Unfinalized statements keep the underlying connection alive until
    /// they are finalized (`sqlite3_close_v2`).
    pub(crate) fn close(&self) -> Result<(), EngineError> {
        let db = {
            let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, ptr::null_mut())
        };
        if db.is_null() {
            return Ok(());
        }
        // SAFETY: db was open and is no longer reachable through self.
        let rc = unsafe { ffi::sqlite3_close_v2(db) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(ErrorCode(rc), errstr(rc)))
        }
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A compiled `sqlite3_stmt*`.
pub(crate) struct RawStmt {
    ptr: NonNull<ffi::sqlite3_stmt>,
}

// SAFETY: the connection is opened in serialized mode, and a RawStmt is
// only ever used by its single owner at a time.
unsafe impl Send for RawStmt {}

impl RawStmt {
    fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.ptr.as_ptr()
    }

    fn db(&self) -> *mut ffi::sqlite3 {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_db_handle(self.as_ptr()) }
    }

    fn index(index: usize) -> Result<c_int, EngineError> {
        c_int::try_from(index)
            .map_err(|_| EngineError::new(ErrorCode::RANGE, "parameter index out of range"))
    }

    fn column(index: usize) -> c_int {
        c_int::try_from(index).unwrap_or(c_int::MAX)
    }

    /// Steps once. `Ok(true)` means a row is available.
    pub(crate) fn step(&mut self) -> Result<bool, EngineError> {
        let db = self.db();
        let _lock = DbMutex::enter(db);
        // SAFETY: the statement is live and owned exclusively.
        let rc = unsafe { ffi::sqlite3_step(self.as_ptr()) };
        match rc {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            // SAFETY: db is open and its mutex is held.
            _ => Err(unsafe { error_from_db(db, rc) }),
        }
    }

    /// Rewinds the statement and clears all bindings.
    pub(crate) fn reset(&mut self) -> Result<(), EngineError> {
        let db = self.db();
        let _lock = DbMutex::enter(db);
        // SAFETY: the statement is live.
        let rc = unsafe { ffi::sqlite3_reset(self.as_ptr()) };
        unsafe { ffi::sqlite3_clear_bindings(self.as_ptr()) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            // SAFETY: db is open and its mutex is held.
            Err(unsafe { error_from_db(db, rc) })
        }
    }

    /// Binds one value (SQLITE_TRANSIENT: sqlite copies text and blobs).
    pub(crate) fn bind(&mut self, index: usize, value: &SqlValue) -> Result<(), EngineError> {
        let idx = Self::index(index)?;
        let stmt = self.as_ptr();
        // SAFETY: stmt is live; text and blob pointers are valid for the
        // given lengths and copied by sqlite before returning.
        let rc = unsafe {
            match value {
                SqlValue::Null => ffi::sqlite3_bind_null(stmt, idx),
                SqlValue::Int(n) => ffi::sqlite3_bind_int64(stmt, idx, *n),
                SqlValue::Float(x) => ffi::sqlite3_bind_double(stmt, idx, *x),
                SqlValue::Text(s) => {
                    let len = c_int::try_from(s.len()).map_err(|_| too_big("text value"))?;
                    ffi::sqlite3_bind_text(
                        stmt,
                        idx,
                        s.as_ptr().cast::<c_char>(),
                        len,
                        ffi::SQLITE_TRANSIENT(),
                    )
                }
                SqlValue::Blob(b) => {
                    let len = c_int::try_from(b.len()).map_err(|_| too_big("blob value"))?;
                    ffi::sqlite3_bind_blob(stmt, idx, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
                }
                SqlValue::ZeroBlob(n) => ffi::sqlite3_bind_zeroblob64(stmt, idx, *n),
            }
        };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(ErrorCode(rc), errstr(rc)))
        }
    }

    pub(crate) fn parameter_count(&self) -> usize {
        // SAFETY: the statement is live.
        let n = unsafe { ffi::sqlite3_bind_parameter_count(self.as_ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    pub(crate) fn parameter_name(&self, index: usize) -> Option<String> {
        let idx = Self::index(index).ok()?;
        // SAFETY: the statement is live; the returned string is owned by
        // the statement and copied before returning.
        unsafe {
            let name = ffi::sqlite3_bind_parameter_name(self.as_ptr(), idx);
            (!name.is_null()).then(|| CStr::from_ptr(name).to_string_lossy().into_owned())
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        // SAFETY: the statement is live.
        let n = unsafe { ffi::sqlite3_column_count(self.as_ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    pub(crate) fn data_count(&self) -> usize {
        // SAFETY: the statement is live.
        let n = unsafe { ffi::sqlite3_data_count(self.as_ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    pub(crate) fn column_name(&self, index: usize) -> String {
        // SAFETY: the statement is live; the name is copied immediately.
        unsafe {
            let name = ffi::sqlite3_column_name(self.as_ptr(), Self::column(index));
            if name.is_null() {
                String::new()
            } else {
                CStr::from_ptr(name).to_string_lossy().into_owned()
            }
        }
    }

    pub(crate) fn column_decltype(&self, index: usize) -> Option<String> {
        // SAFETY: the statement is live; the declared type is copied.
        unsafe {
            let decl = ffi::sqlite3_column_decltype(self.as_ptr(), Self::column(index));
            (!decl.is_null()).then(|| CStr::from_ptr(decl).to_string_lossy().into_owned())
        }
    }

    pub(crate) fn column_value(&self, index: usize) -> SqlValue {
        let stmt = self.as_ptr();
        let col = Self::column(index);
        // SAFETY: the statement has a current row; pointers returned by
        // column_text/column_blob stay valid until the next step and are
        // copied before returning. column_bytes is read after the pointer,
        // as the C API requires.
        unsafe {
            match ffi::sqlite3_column_type(stmt, col) {
                ffi::SQLITE_INTEGER => SqlValue::Int(ffi::sqlite3_column_int64(stmt, col)),
                ffi::SQLITE_FLOAT => SqlValue::Float(ffi::sqlite3_column_double(stmt, col)),
                ffi::SQLITE_TEXT => {
                    let text = ffi::sqlite3_column_text(stmt, col);
                    let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, col)).unwrap_or(0);
                    if text.is_null() {
                        SqlValue::Text(String::new())
                    } else {
                        let bytes = std::slice::from_raw_parts(text, len);
                        SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob = ffi::sqlite3_column_blob(stmt, col);
                    let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, col)).unwrap_or(0);
                    if blob.is_null() {
                        SqlValue::Blob(Vec::new())
                    } else {
                        SqlValue::Blob(std::slice::from_raw_parts(blob.cast::<u8>(), len).to_vec())
                    }
                }
                _ => SqlValue::Null,
            }
        }
    }

    /// Finalizes the statement. Reports the error of the most recent failed
    /// step, if any.
    ///
    /// Finalizing the last statement of a closed connection frees the
    /// connection and its mutex, so neither is touched here: the error is
    /// built from the result code alone.
    pub(crate) fn finalize(self) -> Result<(), EngineError> {
        let stmt = self.as_ptr();
        std::mem::forget(self);
        // SAFETY: stmt is live and ownership ends here; forget() above
        // keeps Drop from finalizing it a second time.
        let rc = unsafe { ffi::sqlite3_finalize(stmt) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(ErrorCode(rc), errstr(rc)))
        }
    }
}

impl Drop for RawStmt {
    fn drop(&mut self) {
        // SAFETY: the statement is live; finalize() forgets self so this
        // only runs for statements that were never finalized explicitly.
        unsafe {
            ffi::sqlite3_finalize(self.as_ptr());
        }
    }
}
