//! Pool of compiled statements shared by every cursor of a connection.
//!
//! A [`CompiledUnit`] is either *lent* (owned by exactly one cursor) or
//! *available* (sitting in the pool). Units are keyed by the full text they
//! were compiled from, so a multi-statement string produces one key per
//! statement boundary: `"A; B"` and `" B"`.
//!
//! Capacity bounds the total number of available units across all keys.
//! When a release pushes the pool over capacity the least recently released
//! units are finalized first. A lent unit is never in the pool, so it can
//! never be evicted from under its cursor.
//!
//! Only the pool itself sits behind the mutex. Compiling, resetting and
//! finalizing happen after the lock is dropped.
//!
//! [`close`](StatementCache::close) closes the engine only once every lent
//! unit has come back; until then the close is pending and the release of
//! the last lent unit completes it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use oxide_sql_core::{Engine, EngineError};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{CursorError, Result};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// One compiled statement of a chain.
pub struct CompiledUnit<H> {
    conn_id: u64,
    source: Arc<str>,
    consumed: usize,
    handle: Option<H>,
    param_names: Vec<Option<String>>,
    cacheable: bool,
}

impl<H> CompiledUnit<H> {
    /// Identity of the connection that compiled this unit.
    #[must_use]
    pub const fn connection_id(&self) -> u64 {
        self.conn_id
    }

    /// The text this unit was compiled from, including the remainder.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The statement itself.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.source[..self.consumed]
    }

    /// Text following this statement.
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.source[self.consumed..]
    }

    /// Whether more statements follow in the chain.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.remainder().trim().is_empty()
    }

    /// Number of parameter slots.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.param_names.len()
    }

    /// Name of every parameter slot, in index order, including its sigil.
    #[must_use]
    pub fn parameter_names(&self) -> &[Option<String>] {
        &self.param_names
    }

    /// Whether the unit holds an engine handle. Text containing only
    /// whitespace or comments compiles to a unit without one.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the unit may be returned to the pool.
    #[must_use]
    pub const fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// The engine handle.
    pub const fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    /// The engine handle, for binding and stepping.
    pub fn handle_mut(&mut self) -> Option<&mut H> {
        self.handle.as_mut()
    }
}

impl<H> std::fmt::Debug for CompiledUnit<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("conn_id", &self.conn_id)
            .field("sql", &self.sql())
            .field("remainder", &self.remainder())
            .field("live", &self.is_live())
            .field("parameters", &self.param_names.len())
            .finish()
    }
}

/// How a unit finished when it is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Completed normally; may be pooled.
    Clean,
    /// An error may have left the handle unusable; always finalized.
    Discard,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Configured capacity.
    pub capacity: usize,
    /// Units currently available for reuse.
    pub available: usize,
    /// Acquires served from the pool.
    pub hits: u64,
    /// Acquires that compiled.
    pub misses: u64,
    /// Units finalized to keep the pool within capacity.
    pub evictions: u64,
    /// Compiles whose text was too long to pool.
    pub too_big: u64,
    /// Units finalized on release because of an error.
    pub discarded: u64,
    /// Longest text that may be pooled.
    pub max_cached_sql_bytes: usize,
    /// Units currently owned by cursors.
    pub lent: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    too_big: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

struct Pool<H> {
    /// Available units per key, oldest release at the front.
    queues: HashMap<Arc<str>, VecDeque<(u64, CompiledUnit<H>)>>,
    /// Release sequence number to key, across all keys.
    recency: BTreeMap<u64, Arc<str>>,
    next_seq: u64,
    available: usize,
    lent: usize,
    /// No more units are pooled or handed out.
    closed: bool,
    /// The engine is to be closed once `lent` drops to zero.
    close_pending: bool,
    engine_closed: bool,
}

impl<H> Pool<H> {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            recency: BTreeMap::new(),
            next_seq: 0,
            available: 0,
            lent: 0,
            closed: false,
            close_pending: false,
            engine_closed: false,
        }
    }

    /// Whether the engine may be closed now.
    const fn ready_to_close(&self) -> bool {
        self.close_pending && self.lent == 0 && !self.engine_closed
    }

    /// Takes the most recently released unit for `sql`.
    fn take(&mut self, sql: &str) -> Option<CompiledUnit<H>> {
        let queue = self.queues.get_mut(sql)?;
        let (seq, unit) = queue.pop_back()?;
        if queue.is_empty() {
            self.queues.remove(sql);
        }
        self.recency.remove(&seq);
        self.available -= 1;
        Some(unit)
    }

    fn put(&mut self, unit: CompiledUnit<H>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.recency.insert(seq, Arc::clone(&unit.source));
        self.queues
            .entry(Arc::clone(&unit.source))
            .or_default()
            .push_back((seq, unit));
        self.available += 1;
    }

    /// Removes the least recently released unit across all keys.
    fn pop_oldest(&mut self) -> Option<CompiledUnit<H>> {
        let (seq, key) = self.recency.pop_first()?;
        let queue = self.queues.get_mut(&key)?;
        let (front_seq, unit) = queue.pop_front()?;
        debug_assert_eq!(seq, front_seq);
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        self.available -= 1;
        Some(unit)
    }

    fn drain(&mut self) -> Vec<CompiledUnit<H>> {
        self.recency.clear();
        self.available = 0;
        self.queues
            .drain()
            .flat_map(|(_, queue)| queue.into_iter().map(|(_, unit)| unit))
            .collect()
    }
}

/// Bounded pool of compiled statements for one connection.
pub struct StatementCache<E: Engine> {
    engine: Arc<E>,
    id: u64,
    capacity: usize,
    max_sql_bytes: usize,
    pool: Mutex<Pool<E::Handle>>,
    counters: Counters,
}

impl<E: Engine> std::fmt::Debug for StatementCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<E: Engine> StatementCache<E> {
    /// Creates an empty cache over `engine`.
    pub fn new(engine: Arc<E>, config: &ConnectionConfig) -> Self {
        Self {
            engine,
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            capacity: config.statement_cache_size,
            max_sql_bytes: config.max_cached_sql_bytes,
            pool: Mutex::new(Pool::new()),
            counters: Counters::default(),
        }
    }

    /// The engine statements are compiled with.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Identity stamped on every unit this cache compiles.
    #[must_use]
    pub const fn connection_id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Pool<E::Handle>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out a unit for the first statement of `sql`, reusing an
    /// available one compiled from the same text when possible.
    pub fn acquire(&self, sql: &str) -> Result<CompiledUnit<E::Handle>> {
        {
            let mut pool = self.lock();
            if pool.closed {
                return Err(CursorError::ConnectionClosed);
            }
            // counted before compiling so a concurrent close waits for it
            pool.lent += 1;
            if let Some(unit) = pool.take(sql) {
                drop(pool);
                Counters::bump(&self.counters.hits, 1);
                debug!(conn = self.id, sql = unit.sql(), "statement cache hit");
                return Ok(unit);
            }
        }
        self.compile(sql).inspect_err(|_| self.return_lent())
    }

    /// Ends one loan, completing a pending close when it was the last.
    fn return_lent(&self) {
        let mut pool = self.lock();
        pool.lent = pool.lent.saturating_sub(1);
        if !pool.ready_to_close() {
            return;
        }
        pool.engine_closed = true;
        let result = self.engine.close();
        drop(pool);
        match result {
            Ok(()) => debug!(conn = self.id, "closed engine after last statement returned"),
            Err(err) => warn!(conn = self.id, error = %err, "failed to close engine"),
        }
    }

    fn compile(&self, sql: &str) -> Result<CompiledUnit<E::Handle>> {
        let compiled = self
            .engine
            .compile(sql)
            .map_err(|source| CursorError::Compile {
                sql: String::from(sql),
                source,
            })?;
        Counters::bump(&self.counters.misses, 1);

        // An engine that consumes nothing would make the chain loop forever.
        let consumed = if compiled.consumed == 0 || compiled.consumed > sql.len() {
            sql.len()
        } else {
            compiled.consumed
        };
        if !sql.is_char_boundary(consumed) {
            if let Some(handle) = compiled.handle {
                let _ = self.engine.finalize(handle);
            }
            return Err(CursorError::Compile {
                sql: String::from(sql),
                source: EngineError::misuse("statement boundary is not a character boundary"),
            });
        }

        let param_names = compiled.handle.as_ref().map_or_else(Vec::new, |handle| {
            (1..=self.engine.parameter_count(handle))
                .map(|index| self.engine.parameter_name(handle, index))
                .collect()
        });

        let too_big = sql.len() > self.max_sql_bytes;
        if too_big && self.capacity > 0 {
            Counters::bump(&self.counters.too_big, 1);
        }
        let unit = CompiledUnit {
            conn_id: self.id,
            source: Arc::from(sql),
            consumed,
            handle: compiled.handle,
            param_names,
            cacheable: self.capacity > 0 && !too_big,
        };
        debug!(
            conn = self.id,
            sql = unit.sql(),
            cacheable = unit.cacheable,
            "statement cache miss"
        );
        Ok(unit)
    }

    /// Takes back a lent unit.
    ///
    /// The unit is pooled when reuse is enabled, the cache is open, the unit
    /// finished cleanly and resets without an error that invalidates the
    /// statement. Otherwise it is finalized. Any units evicted to make room
    /// are finalized as well; the first engine error is reported after all
    /// of them are released.
    pub fn release(&self, unit: CompiledUnit<E::Handle>, disposition: Disposition) -> Result<()> {
        if unit.conn_id != self.id {
            return Err(CursorError::Finalize(EngineError::misuse(
                "statement belongs to a different connection",
            )));
        }
        let result = self.put_back(unit, disposition);
        self.return_lent();
        result
    }

    fn put_back(&self, mut unit: CompiledUnit<E::Handle>, disposition: Disposition) -> Result<()> {
        let Some(mut handle) = unit.handle.take() else {
            return Ok(());
        };
        if disposition == Disposition::Discard {
            Counters::bump(&self.counters.discarded, 1);
            trace!(conn = self.id, sql = unit.sql(), "discarding statement");
            return self.finalize(handle);
        }
        if !unit.cacheable {
            return self.finalize(handle);
        }
        if let Err(err) = self.engine.reset(&mut handle) {
            if err.code.poisons_statement() {
                Counters::bump(&self.counters.discarded, 1);
                let _ = self.engine.finalize(handle);
                return Err(CursorError::Finalize(err));
            }
            // the statement itself is still usable
            debug!(conn = self.id, sql = unit.sql(), error = %err, "reset reported an error");
        }
        unit.handle = Some(handle);

        let evicted = {
            let mut pool = self.lock();
            if pool.closed {
                vec![unit]
            } else {
                pool.put(unit);
                let mut evicted = Vec::new();
                while pool.available > self.capacity {
                    match pool.pop_oldest() {
                        Some(old) => evicted.push(old),
                        None => break,
                    }
                }
                if !evicted.is_empty() {
                    Counters::bump(&self.counters.evictions, evicted.len() as u64);
                    debug!(conn = self.id, count = evicted.len(), "evicted statements");
                }
                evicted
            }
        };
        self.finalize_all(evicted)
    }

    /// Releases `unit` and acquires the next statement of its chain, if
    /// any text other than whitespace remains.
    pub fn next(&self, unit: CompiledUnit<E::Handle>) -> Result<Option<CompiledUnit<E::Handle>>> {
        if !unit.has_next() {
            self.release(unit, Disposition::Clean)?;
            return Ok(None);
        }
        let remainder = String::from(unit.remainder());
        self.release(unit, Disposition::Clean)?;
        trace!(conn = self.id, sql = %remainder, "advancing statement chain");
        self.acquire(&remainder).map(Some)
    }

    /// Finalizes every available unit and closes the cache. Later acquires
    /// fail with [`CursorError::ConnectionClosed`]; later releases finalize.
    pub fn evict_all(&self) -> Result<()> {
        let units = {
            let mut pool = self.lock();
            pool.closed = true;
            pool.drain()
        };
        debug!(conn = self.id, count = units.len(), "evicting all statements");
        self.finalize_all(units)
    }

    /// Evicts everything, then closes the engine once no unit is lent.
    ///
    /// With units still lent the engine close is deferred to the release
    /// of the last one, so no statement is ever finalized on a closed
    /// engine. Closing twice does nothing.
    pub fn close(&self) -> Result<()> {
        let evicted = self.evict_all();
        let closed = {
            let mut pool = self.lock();
            pool.close_pending = true;
            if pool.engine_closed {
                return evicted;
            }
            if pool.lent > 0 {
                debug!(conn = self.id, lent = pool.lent, "engine close deferred");
                return evicted;
            }
            pool.engine_closed = true;
            self.engine.close()
        };
        evicted.and(closed.map_err(CursorError::Finalize))
    }

    /// Interrupts the engine unless it has been closed.
    pub fn interrupt(&self) {
        let pool = self.lock();
        if !pool.engine_closed {
            self.engine.interrupt();
        }
    }

    /// Whether [`evict_all`](Self::evict_all) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether the engine has been closed.
    pub fn is_engine_closed(&self) -> bool {
        self.lock().engine_closed
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let (available, lent) = {
            let pool = self.lock();
            (pool.available, pool.lent)
        };
        CacheStats {
            capacity: self.capacity,
            available,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            too_big: self.counters.too_big.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            max_cached_sql_bytes: self.max_sql_bytes,
            lent,
        }
    }

    fn finalize(&self, handle: E::Handle) -> Result<()> {
        self.engine.finalize(handle).map_err(CursorError::Finalize)
    }

    fn finalize_all(&self, units: Vec<CompiledUnit<E::Handle>>) -> Result<()> {
        let mut first = None;
        for handle in units.into_iter().filter_map(|mut unit| unit.handle.take()) {
            if let Err(err) = self.finalize(handle) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl<E: Engine> Drop for StatementCache<E> {
    fn drop(&mut self) {
        let pool = self.pool.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in pool.drain().into_iter().filter_map(|mut unit| unit.handle.take()) {
            let _ = self.engine.finalize(handle);
        }
    }
}
