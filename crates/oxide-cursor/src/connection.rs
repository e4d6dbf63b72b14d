//! Connections: the engine, its statement cache, tracers and cursors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use oxide_sql_core::Engine;
use tracing::{debug, warn};

use crate::bindings::{Bindings, TraceBindings};
use crate::cache::{CacheStats, StatementCache};
use crate::config::ConnectionConfig;
use crate::cursor::{Cursor, CursorShared};
use crate::error::{CursorError, Result};
use crate::guard::Exclusive;
use crate::hooks::{ExecTrace, Hooks, RowTrace};
use crate::row::Row;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ConnectionInner<E: Engine> {
    pub(crate) cache: StatementCache<E>,
    config: ConnectionConfig,
    in_use: Exclusive<()>,
    hooks: Mutex<Hooks>,
    dependents: Mutex<Vec<Weak<CursorShared<E>>>>,
    closed: AtomicBool,
}

impl<E: Engine> ConnectionInner<E> {
    pub(crate) const fn id(&self) -> u64 {
        self.cache.connection_id()
    }

    pub(crate) fn engine(&self) -> &E {
        self.cache.engine()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CursorError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Snapshot of the connection-level tracers.
    pub(crate) fn hooks(&self) -> Hooks {
        lock(&self.hooks).clone()
    }
}

impl<E: Engine> Drop for ConnectionInner<E> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(err) = self.cache.close() {
            warn!(conn = self.id(), error = %err, "failed to close connection");
        }
    }
}

/// A database connection.
///
/// Cloning is cheap and yields another handle to the same connection.
/// Cursors keep their connection alive; the statement cache is torn down
/// when the connection is closed or its last handle and cursor are dropped.
///
/// Cursors on different threads may run concurrently against one
/// connection. Operations that change connection state (`close`, setting
/// tracers) fail with [`CursorError::ThreadingViolation`] if another such
/// operation is in flight.
pub struct Connection<E: Engine> {
    inner: Arc<ConnectionInner<E>>,
}

impl<E: Engine> Clone for Connection<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Engine> std::fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id())
            .field("config", &self.inner.config)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Connection<E> {
    /// Wraps an open engine.
    pub fn open(engine: E, config: ConnectionConfig) -> Self {
        let cache = StatementCache::new(Arc::new(engine), &config);
        debug!(
            conn = cache.connection_id(),
            statement_cache_size = config.statement_cache_size,
            "opened connection"
        );
        Self {
            inner: Arc::new(ConnectionInner {
                cache,
                config,
                in_use: Exclusive::new("connection", ()),
                hooks: Mutex::new(Hooks::default()),
                dependents: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<ConnectionInner<E>>) -> Self {
        Self { inner }
    }

    /// Creates a cursor on this connection.
    pub fn cursor(&self) -> Result<Cursor<E>> {
        self.inner.check_open()?;
        let cursor = Cursor::new(Arc::clone(&self.inner));
        let mut dependents = lock(&self.inner.dependents);
        dependents.retain(|weak| weak.strong_count() > 0);
        dependents.push(cursor.downgrade());
        Ok(cursor)
    }

    /// Runs `sql` on a new cursor and returns it.
    pub fn execute(&self, sql: &str, bindings: impl Into<Bindings>) -> Result<Cursor<E>> {
        let cursor = self.cursor()?;
        cursor.execute(sql, bindings)?;
        Ok(cursor)
    }

    /// Runs `sql` once per binding set on a new cursor and returns it.
    pub fn execute_many<I>(&self, sql: &str, batch: I) -> Result<Cursor<E>>
    where
        I: IntoIterator,
        I::Item: Into<Bindings> + 'static,
        I::IntoIter: Send + 'static,
    {
        let cursor = self.cursor()?;
        cursor.execute_many(sql, batch)?;
        Ok(cursor)
    }

    /// Closes every cursor, finalizes cached statements and closes the
    /// engine.
    ///
    /// Without `force`, the first cursor that fails to close (for example
    /// with [`CursorError::IncompleteExecution`]) aborts the close and the
    /// connection stays open. With `force`, cursors are closed regardless
    /// and the first failure is reported after the connection is closed.
    /// A cursor that could not be closed because it was busy keeps its
    /// statement, and the engine itself closes once that statement is
    /// released. Closing a closed connection does nothing.
    pub fn close(&self, force: bool) -> Result<()> {
        let _in_use = self.inner.in_use.enter()?;
        if self.inner.is_closed() {
            return Ok(());
        }
        let conn = self.inner.id();

        let mut first = None;
        let mut pending = std::mem::take(&mut *lock(&self.inner.dependents)).into_iter();
        while let Some(weak) = pending.next() {
            let Some(cursor) = weak.upgrade() else {
                continue;
            };
            if let Err(err) = cursor.close(force) {
                if !force {
                    let mut dependents = lock(&self.inner.dependents);
                    dependents.push(weak);
                    dependents.extend(pending);
                    return Err(err);
                }
                warn!(conn, error = %err, "failed to close cursor");
                first.get_or_insert(err);
            }
        }

        self.inner.closed.store(true, Ordering::Release);
        if let Err(err) = self.inner.cache.close() {
            first.get_or_insert(err);
        }
        debug!(conn, "closed connection");
        first.map_or(Ok(()), Err)
    }

    /// Makes running statements fail at their next step. Safe to call
    /// from any thread while another thread is stepping.
    pub fn interrupt(&self) {
        if !self.inner.is_closed() {
            self.inner.cache.interrupt();
        }
    }

    fn update_hooks(&self, update: impl FnOnce(&mut Hooks)) -> Result<()> {
        let _in_use = self.inner.in_use.enter()?;
        self.inner.check_open()?;
        update(&mut lock(&self.inner.hooks));
        Ok(())
    }

    /// Sets the default exec tracer for cursors of this connection.
    pub fn set_exec_trace<F>(&self, tracer: F) -> Result<()>
    where
        F: Fn(&str, TraceBindings<'_>) -> bool + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.exec_trace = Some(Arc::new(tracer)))
    }

    /// Removes the default exec tracer.
    pub fn clear_exec_trace(&self) -> Result<()> {
        self.update_hooks(|hooks| hooks.exec_trace = None)
    }

    /// The default exec tracer.
    pub fn exec_trace(&self) -> Result<Option<ExecTrace>> {
        self.inner.check_open()?;
        Ok(self.inner.hooks().exec_trace)
    }

    /// Sets the default row tracer for cursors of this connection.
    pub fn set_row_trace<F>(&self, tracer: F) -> Result<()>
    where
        F: Fn(Row) -> Option<Row> + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.row_trace = Some(Arc::new(tracer)))
    }

    /// Removes the default row tracer.
    pub fn clear_row_trace(&self) -> Result<()> {
        self.update_hooks(|hooks| hooks.row_trace = None)
    }

    /// The default row tracer.
    pub fn row_trace(&self) -> Result<Option<RowTrace>> {
        self.inner.check_open()?;
        Ok(self.inner.hooks().row_trace)
    }

    /// Statement cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Whether [`close`](Self::close) has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The wrapped engine.
    #[must_use]
    pub fn engine(&self) -> &E {
        self.inner.engine()
    }

    /// The configuration the connection was opened with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}
