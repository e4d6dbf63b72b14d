//! Cursor execution over statement chains and binding batches.
//!
//! A cursor is in one of three states:
//!
//! - [`Status::Begin`]: a statement is compiled and bound but not stepped
//! - [`Status::Row`]: the last step produced a row that has not been read
//! - [`Status::Done`]: nothing is left to run, or an error occurred
//!
//! Stepping is lazy. [`Cursor::execute`] steps until the first row (or the
//! end), and every [`Cursor::next_row`] steps once more. When a statement
//! finishes the cursor moves to the next statement of the chain, then to
//! the next binding set of an [`execute_many`](Cursor::execute_many) batch,
//! and finally to `Done`.
//!
//! Every error leaves the cursor in `Done`. A statement whose step failed
//! is finalized; after a binding or tracer error it goes back to the cache.

use std::sync::{Arc, MutexGuard, Weak};

use oxide_sql_core::{Engine, Step};
use tracing::{debug, trace};

use crate::bindings::{self, bare_name, Bindings, TraceBindings};
use crate::cache::{CompiledUnit, Disposition};
use crate::connection::{Connection, ConnectionInner};
use crate::error::{CursorError, Result};
use crate::guard::Exclusive;
use crate::hooks::{ExecTrace, Hooks, RowTrace};
use crate::row::{Column, Row};

/// Execution state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Compiled and bound, not yet stepped.
    Begin,
    /// A row is available.
    Row,
    /// Finished.
    Done,
}

struct Batch {
    /// The full text every binding set re-runs.
    sql: Arc<str>,
    sets: Box<dyn Iterator<Item = Bindings> + Send>,
}

pub(crate) struct CursorState<E: Engine> {
    unit: Option<CompiledUnit<E::Handle>>,
    status: Status,
    bindings: Bindings,
    offset: usize,
    batch: Option<Batch>,
    hooks: Hooks,
    closed: bool,
}

impl<E: Engine> CursorState<E> {
    const fn new() -> Self {
        Self {
            unit: None,
            status: Status::Done,
            bindings: Bindings::None,
            offset: 0,
            batch: None,
            hooks: Hooks {
                exec_trace: None,
                row_trace: None,
            },
            closed: false,
        }
    }

    const fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(CursorError::CursorClosed)
        } else {
            Ok(())
        }
    }

    /// Releases everything the cursor holds and moves it to `Done`.
    ///
    /// Unless forced, abandoning the rest of a chain or batch is reported
    /// as [`CursorError::IncompleteExecution`] once cleanup has finished.
    /// A forced reset never fails.
    fn reset(&mut self, conn: &ConnectionInner<E>, force: bool) -> Result<()> {
        let unfinished = !force && self.status != Status::Done;
        let mut result = Ok(());

        if let Some(unit) = self.unit.take() {
            let remaining =
                (unfinished && unit.has_next()).then(|| unit.remainder().trim().to_owned());
            result = conn.cache.release(unit, Disposition::Clean);
            if let Some(remaining) = remaining.filter(|_| result.is_ok()) {
                result = Err(CursorError::IncompleteExecution { remaining });
            }
        }
        if unfinished && result.is_ok() {
            if let Some(batch) = self.batch.as_mut() {
                if batch.sets.next().is_some() {
                    result = Err(CursorError::IncompleteExecution {
                        remaining: format!("unexecuted binding sets for '{}'", batch.sql),
                    });
                }
            }
        }

        self.batch = None;
        self.bindings = Bindings::None;
        self.offset = 0;
        self.status = Status::Done;

        match result {
            Err(err) if force => {
                debug!(conn = conn.id(), error = %err, "ignoring error during forced reset");
                Ok(())
            }
            other => other,
        }
    }

    /// Cleans up after `err` without letting cleanup failures replace it.
    fn fail(
        &mut self,
        conn: &ConnectionInner<E>,
        err: CursorError,
        disposition: Disposition,
    ) -> CursorError {
        if let Some(unit) = self.unit.take() {
            if let Err(cleanup) = conn.cache.release(unit, disposition) {
                debug!(conn = conn.id(), error = %cleanup, "ignoring cleanup failure");
            }
        }
        let _ = self.reset(conn, true);
        err
    }

    /// Binds the current statement and runs the exec tracer over it.
    fn bind_and_trace(&mut self, conn: &ConnectionInner<E>) -> Result<()> {
        let Some(unit) = self.unit.as_mut() else {
            return Ok(());
        };
        let range = bindings::bind_all(conn.engine(), unit, &self.bindings, &mut self.offset)?;
        if !unit.is_live() {
            return Ok(());
        }
        if let Some(tracer) = self.hooks.or(&conn.hooks()).exec_trace {
            if !tracer(unit.sql(), TraceBindings::new(&self.bindings, range)) {
                return Err(CursorError::ExecTraceAbort);
            }
        }
        Ok(())
    }

    /// Acquires and binds the first statement of `sql`, then steps to the
    /// first row.
    fn start(&mut self, conn: &ConnectionInner<E>, sql: &str) -> Result<()> {
        match conn.cache.acquire(sql) {
            Ok(unit) => self.unit = Some(unit),
            Err(err) => return Err(self.fail(conn, err, Disposition::Clean)),
        }
        self.status = Status::Begin;
        if let Err(err) = self.bind_and_trace(conn) {
            return Err(self.fail(conn, err, Disposition::Clean));
        }
        self.step(conn)
    }

    fn next_batch_set(&mut self) -> Option<(Arc<str>, Bindings)> {
        let batch = self.batch.as_mut()?;
        let bindings = batch.sets.next()?;
        Some((Arc::clone(&batch.sql), bindings))
    }

    /// Steps until a row is available or everything has run.
    fn step(&mut self, conn: &ConnectionInner<E>) -> Result<()> {
        let engine = conn.engine();
        loop {
            let outcome = match self.unit.as_mut() {
                None => {
                    self.status = Status::Done;
                    return Ok(());
                }
                Some(unit) => unit
                    .handle_mut()
                    .map_or(Ok(Step::Done), |handle| engine.step(handle)),
            };
            match outcome {
                Ok(Step::Row) => {
                    self.status = Status::Row;
                    return Ok(());
                }
                Ok(Step::Done) => {}
                Err(err) => {
                    return Err(self.fail(conn, CursorError::Step(err), Disposition::Discard));
                }
            }

            let Some(unit) = self.unit.take() else {
                continue;
            };

            // Next statement of the chain.
            if unit.has_next() {
                match conn.cache.next(unit) {
                    Ok(next) => self.unit = next,
                    Err(err) => return Err(self.fail(conn, err, Disposition::Clean)),
                }
                if let Err(err) = self.bind_and_trace(conn) {
                    return Err(self.fail(conn, err, Disposition::Clean));
                }
                continue;
            }

            // Next binding set of the batch.
            if let Some((sql, bindings)) = self.next_batch_set() {
                if let Err(err) = conn.cache.release(unit, Disposition::Clean) {
                    return Err(self.fail(conn, err, Disposition::Clean));
                }
                trace!(conn = conn.id(), sql = %sql, "next binding set");
                self.bindings = bindings;
                self.offset = 0;
                match conn.cache.acquire(&sql) {
                    Ok(first) => self.unit = Some(first),
                    Err(err) => return Err(self.fail(conn, err, Disposition::Clean)),
                }
                if let Err(err) = self.bind_and_trace(conn) {
                    return Err(self.fail(conn, err, Disposition::Clean));
                }
                continue;
            }

            self.status = Status::Done;
            self.batch = None;
            self.bindings = Bindings::None;
            self.offset = 0;
            return conn
                .cache
                .release(unit, Disposition::Clean)
                .map_err(|err| self.fail(conn, err, Disposition::Clean));
        }
    }

    fn current_row(&self, conn: &ConnectionInner<E>) -> Row {
        let engine = conn.engine();
        self.unit
            .as_ref()
            .and_then(CompiledUnit::handle)
            .map_or_else(Row::default, |handle| {
                Row::new(
                    (0..engine.data_count(handle))
                        .map(|i| engine.column_value(handle, i))
                        .collect(),
                )
            })
    }
}

pub(crate) struct CursorShared<E: Engine> {
    conn: Arc<ConnectionInner<E>>,
    state: Exclusive<CursorState<E>>,
}

impl<E: Engine> CursorShared<E> {
    /// Closes the cursor. Closing a closed cursor does nothing; closing a
    /// cursor of a closed connection only releases what it still holds.
    pub(crate) fn close(&self, force: bool) -> Result<()> {
        let mut state = self.state.enter()?;
        if state.closed {
            return Ok(());
        }
        if self.conn.is_closed() {
            return state.reset(&self.conn, true);
        }
        state.reset(&self.conn, force)?;
        state.closed = true;
        state.hooks = Hooks::default();
        Ok(())
    }
}

impl<E: Engine> Drop for CursorShared<E> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let _ = state.reset(&self.conn, true);
    }
}

/// Executes statements against a connection and iterates over results.
///
/// A cursor may be shared between threads, but only one operation runs on
/// it at a time: a concurrent (or re-entrant, from a tracer) call fails
/// with [`CursorError::ThreadingViolation`] rather than waiting.
pub struct Cursor<E: Engine> {
    shared: Arc<CursorShared<E>>,
}

impl<E: Engine> std::fmt::Debug for Cursor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("conn", &self.shared.conn.id())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Cursor<E> {
    pub(crate) fn new(conn: Arc<ConnectionInner<E>>) -> Self {
        Self {
            shared: Arc::new(CursorShared {
                conn,
                state: Exclusive::new("cursor", CursorState::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<CursorShared<E>> {
        Arc::downgrade(&self.shared)
    }

    fn enter(&self) -> Result<(MutexGuard<'_, CursorState<E>>, &ConnectionInner<E>)> {
        let state = self.shared.state.enter()?;
        self.shared.conn.check_open()?;
        state.check_open()?;
        Ok((state, &*self.shared.conn))
    }

    /// Runs `sql`, which may hold several `;`-separated statements, and
    /// steps to the first result row.
    ///
    /// Positional bindings are shared across the statements of the chain.
    /// If the previous execution was abandoned part way through a chain or
    /// batch, it is cleaned up and reported as
    /// [`CursorError::IncompleteExecution`]; `sql` is not run.
    pub fn execute(&self, sql: &str, bindings: impl Into<Bindings>) -> Result<&Self> {
        let (mut state, conn) = self.enter()?;
        state.reset(conn, false)?;
        debug!(conn = conn.id(), sql, "execute");
        state.bindings = bindings.into();
        state.start(conn, sql)?;
        Ok(self)
    }

    /// Runs `sql` once per binding set, in order.
    ///
    /// Statements that return no rows run through the whole batch before
    /// this returns. The first error stops the batch; later binding sets
    /// are not run. An empty batch runs nothing.
    pub fn execute_many<I>(&self, sql: &str, batch: I) -> Result<&Self>
    where
        I: IntoIterator,
        I::Item: Into<Bindings> + 'static,
        I::IntoIter: Send + 'static,
    {
        let (mut state, conn) = self.enter()?;
        state.reset(conn, false)?;

        let mut sets: Box<dyn Iterator<Item = Bindings> + Send> =
            Box::new(batch.into_iter().map(<I::Item as Into<Bindings>>::into));
        let Some(first) = sets.next() else {
            debug!(conn = conn.id(), sql, "execute_many with empty batch");
            return Ok(self);
        };
        debug!(conn = conn.id(), sql, "execute_many");
        state.bindings = first;
        state.batch = Some(Batch {
            sql: Arc::from(sql),
            sets,
        });
        state.start(conn, sql)?;
        Ok(self)
    }

    /// Returns the next row, or `None` once execution is complete.
    ///
    /// Rows pass through the row tracer, which may replace them or filter
    /// them out.
    pub fn next_row(&self) -> Result<Option<Row>> {
        let (mut state, conn) = self.enter()?;
        loop {
            if state.status == Status::Begin {
                state.step(conn)?;
            }
            if state.status == Status::Done {
                return Ok(None);
            }
            state.status = Status::Begin;
            let row = state.current_row(conn);
            match state.hooks.or(&conn.hooks()).row_trace {
                None => return Ok(Some(row)),
                Some(tracer) => {
                    if let Some(row) = tracer(row) {
                        return Ok(Some(row));
                    }
                }
            }
        }
    }

    /// Whether a row is available, stepping if needed. A row tracer may
    /// still filter that row out.
    pub fn has_next(&self) -> Result<bool> {
        let (mut state, conn) = self.enter()?;
        if state.status == Status::Begin {
            state.step(conn)?;
        }
        Ok(state.status == Status::Row)
    }

    /// Same as [`next_row`](Self::next_row).
    pub fn fetch_one(&self) -> Result<Option<Row>> {
        self.next_row()
    }

    /// Collects every remaining row.
    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Iterator over the remaining rows. Stops after the first error.
    #[must_use]
    pub const fn rows(&self) -> Rows<'_, E> {
        Rows {
            cursor: self,
            done: false,
        }
    }

    /// Releases the current statement and drops any pending batch.
    ///
    /// Unless `force` is set, abandoning the rest of a chain or batch is
    /// an [`CursorError::IncompleteExecution`] error; the cursor is still
    /// cleaned up and may be closed again. Once closed, every operation
    /// fails with [`CursorError::CursorClosed`].
    pub fn close(&self, force: bool) -> Result<()> {
        self.shared.close(force)
    }

    /// Name and declared type of each result column of the current
    /// statement.
    pub fn description(&self) -> Result<Vec<Column>> {
        let (state, conn) = self.enter()?;
        let engine = conn.engine();
        let handle = state
            .unit
            .as_ref()
            .and_then(CompiledUnit::handle)
            .ok_or(CursorError::ExecutionComplete)?;
        Ok((0..engine.column_count(handle))
            .map(|i| Column {
                name: engine.column_name(handle, i),
                decltype: engine.column_decltype(handle, i),
            })
            .collect())
    }

    /// Current execution state.
    pub fn status(&self) -> Result<Status> {
        let (state, _) = self.enter()?;
        Ok(state.status)
    }

    /// Parameter count of the current statement, or zero.
    pub fn bindings_count(&self) -> Result<usize> {
        let (state, _) = self.enter()?;
        Ok(state.unit.as_ref().map_or(0, CompiledUnit::parameter_count))
    }

    /// Parameter names of the current statement without their sigil;
    /// `None` for anonymous parameters.
    pub fn bindings_names(&self) -> Result<Vec<Option<String>>> {
        let (state, _) = self.enter()?;
        Ok(state.unit.as_ref().map_or_else(Vec::new, |unit| {
            unit.parameter_names()
                .iter()
                .map(|name| name.as_deref().map(|n| String::from(bare_name(n))))
                .collect()
        }))
    }

    /// Sets this cursor's exec tracer, overriding the connection's.
    pub fn set_exec_trace<F>(&self, tracer: F) -> Result<()>
    where
        F: Fn(&str, TraceBindings<'_>) -> bool + Send + Sync + 'static,
    {
        let (mut state, _) = self.enter()?;
        state.hooks.exec_trace = Some(Arc::new(tracer));
        Ok(())
    }

    /// Removes this cursor's exec tracer.
    pub fn clear_exec_trace(&self) -> Result<()> {
        let (mut state, _) = self.enter()?;
        state.hooks.exec_trace = None;
        Ok(())
    }

    /// This cursor's own exec tracer.
    pub fn exec_trace(&self) -> Result<Option<ExecTrace>> {
        let (state, _) = self.enter()?;
        Ok(state.hooks.exec_trace.clone())
    }

    /// Sets this cursor's row tracer, overriding the connection's.
    pub fn set_row_trace<F>(&self, tracer: F) -> Result<()>
    where
        F: Fn(Row) -> Option<Row> + Send + Sync + 'static,
    {
        let (mut state, _) = self.enter()?;
        state.hooks.row_trace = Some(Arc::new(tracer));
        Ok(())
    }

    /// Removes this cursor's row tracer.
    pub fn clear_row_trace(&self) -> Result<()> {
        let (mut state, _) = self.enter()?;
        state.hooks.row_trace = None;
        Ok(())
    }

    /// This cursor's own row tracer.
    pub fn row_trace(&self) -> Result<Option<RowTrace>> {
        let (state, _) = self.enter()?;
        Ok(state.hooks.row_trace.clone())
    }

    /// The connection this cursor belongs to.
    #[must_use]
    pub fn connection(&self) -> Connection<E> {
        Connection::from_inner(Arc::clone(&self.shared.conn))
    }
}

/// Iterator returned by [`Cursor::rows`].
pub struct Rows<'a, E: Engine> {
    cursor: &'a Cursor<E>,
    done: bool,
}

impl<E: Engine> Iterator for Rows<'_, E> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
