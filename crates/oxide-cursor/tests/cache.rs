mod common;

use std::sync::Arc;

use oxide_cursor::{CompiledUnit, ConnectionConfig, CursorError, Disposition, StatementCache};
use oxide_sql_core::ErrorCode;
use oxide_sql_sqlite::{SqliteEngine, SqliteStatement};
use proptest::prelude::*;

use common::{memory, run, FaultyEngine};

const TEXTS: [&str; 4] = ["SELECT 1", "SELECT 2", "SELECT ?", "SELECT 1; SELECT 2"];

fn cache_with(capacity: usize) -> StatementCache<SqliteEngine> {
    StatementCache::new(
        Arc::new(SqliteEngine::open_in_memory().unwrap()),
        &ConnectionConfig::default().with_statement_cache_size(capacity),
    )
}

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize, bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..TEXTS.len()).prop_map(Op::Acquire),
        (any::<usize>(), any::<bool>()).prop_map(|(i, discard)| Op::Release(i, discard)),
    ]
}

proptest! {
    #[test]
    fn cache_never_exceeds_capacity_or_leaks(
        capacity in 0usize..6,
        ops in proptest::collection::vec(op(), 0..64),
    ) {
        let cache = cache_with(capacity);
        let mut lent: Vec<CompiledUnit<SqliteStatement>> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire(i) => lent.push(cache.acquire(TEXTS[i]).unwrap()),
                Op::Release(i, discard) => {
                    if lent.is_empty() {
                        continue;
                    }
                    let unit = lent.swap_remove(i % lent.len());
                    let disposition = if discard { Disposition::Discard } else { Disposition::Clean };
                    cache.release(unit, disposition).unwrap();
                }
            }
            let available = cache.stats().available;
            prop_assert!(available <= capacity);
            prop_assert_eq!(cache.stats().lent, lent.len());
            prop_assert_eq!(cache.engine().stats().live(), (lent.len() + available) as i64);
        }

        for unit in lent.drain(..) {
            cache.release(unit, Disposition::Clean).unwrap();
        }
        cache.evict_all().unwrap();
        prop_assert_eq!(cache.engine().stats().live(), 0);
    }
}

#[test]
fn test_hit_reuses_compiled_statement() {
    let conn = memory();
    run(&conn, "SELECT 1");
    let compiled = conn.engine().stats().compiled();

    run(&conn, "SELECT 1");
    run(&conn, "SELECT 1");
    assert_eq!(conn.engine().stats().compiled(), compiled);
    let stats = conn.cache_stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_same_text_lent_twice_compiles_twice() {
    let cache = cache_with(4);
    let first = cache.acquire("SELECT 1").unwrap();
    let second = cache.acquire("SELECT 1").unwrap();
    assert_eq!(cache.stats().misses, 2);
    cache.release(first, Disposition::Clean).unwrap();
    cache.release(second, Disposition::Clean).unwrap();
    assert_eq!(cache.stats().available, 2);

    let again = cache.acquire("SELECT 1").unwrap();
    assert_eq!(cache.stats().hits, 1);
    cache.release(again, Disposition::Clean).unwrap();
}

#[test]
fn test_least_recently_released_is_evicted() {
    let cache = cache_with(2);
    for sql in ["SELECT 1", "SELECT 2", "SELECT 3"] {
        let unit = cache.acquire(sql).unwrap();
        cache.release(unit, Disposition::Clean).unwrap();
    }
    let stats = cache.stats();
    assert_eq!(stats.available, 2);
    assert_eq!(stats.evictions, 1);

    let unit = cache.acquire("SELECT 1").unwrap();
    assert_eq!(cache.stats().misses, 4);
    cache.release(unit, Disposition::Clean).unwrap();
    let unit = cache.acquire("SELECT 3").unwrap();
    assert_eq!(cache.stats().hits, 1);
    cache.release(unit, Disposition::Clean).unwrap();
}

#[test]
fn test_oversized_text_is_not_pooled() {
    let cache = StatementCache::new(
        Arc::new(SqliteEngine::open_in_memory().unwrap()),
        &ConnectionConfig::default().with_max_cached_sql_bytes(16),
    );
    let sql = "SELECT 1 AS a_rather_long_column_name";
    let unit = cache.acquire(sql).unwrap();
    assert!(!unit.is_cacheable());
    cache.release(unit, Disposition::Clean).unwrap();

    let stats = cache.stats();
    assert_eq!(stats.available, 0);
    assert_eq!(stats.too_big, 1);
    assert_eq!(cache.engine().stats().live(), 0);
}

#[test]
fn test_release_after_evict_all_finalizes() {
    let cache = cache_with(4);
    let unit = cache.acquire("SELECT 1").unwrap();
    cache.evict_all().unwrap();
    assert!(cache.is_closed());

    cache.release(unit, Disposition::Clean).unwrap();
    assert_eq!(cache.engine().stats().live(), 0);
    assert!(matches!(
        cache.acquire("SELECT 1"),
        Err(CursorError::ConnectionClosed)
    ));
}

#[test]
fn test_foreign_unit_is_rejected() {
    let ours = cache_with(4);
    let theirs = cache_with(4);
    let unit = theirs.acquire("SELECT 1").unwrap();
    assert_ne!(unit.connection_id(), ours.connection_id());
    assert!(matches!(
        ours.release(unit, Disposition::Clean),
        Err(CursorError::Finalize(_))
    ));
}

#[test]
fn test_evict_all_reports_failure_after_finalizing_everything() {
    let cache = StatementCache::new(Arc::new(FaultyEngine::new()), &ConnectionConfig::default());
    for sql in ["SELECT 1", "SELECT 2", "SELECT 3"] {
        let unit = cache.acquire(sql).unwrap();
        cache.release(unit, Disposition::Clean).unwrap();
    }
    assert_eq!(cache.stats().available, 3);

    cache.engine().set_fail_finalize(true);
    let err = cache.evict_all().unwrap_err();
    assert!(matches!(err, CursorError::Finalize(_)));
    assert_eq!(cache.stats().available, 0);
    assert_eq!(cache.engine().inner.stats().live(), 0);
}

#[test]
fn test_reset_error_that_invalidates_statement_discards_it() {
    let cache = StatementCache::new(Arc::new(FaultyEngine::new()), &ConnectionConfig::default());
    let unit = cache.acquire("SELECT 1").unwrap();
    cache.engine().set_fail_reset(Some(ErrorCode::SCHEMA));
    let err = cache.release(unit, Disposition::Clean).unwrap_err();
    assert!(matches!(err, CursorError::Finalize(ref e) if e.code == ErrorCode::SCHEMA));

    let stats = cache.stats();
    assert_eq!(stats.available, 0);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.lent, 0);
    assert_eq!(cache.engine().inner.stats().live(), 0);
}

#[test]
fn test_other_reset_error_keeps_statement() {
    let cache = StatementCache::new(Arc::new(FaultyEngine::new()), &ConnectionConfig::default());
    let unit = cache.acquire("SELECT 1").unwrap();
    cache.engine().set_fail_reset(Some(ErrorCode::BUSY));
    cache.release(unit, Disposition::Clean).unwrap();
    cache.engine().set_fail_reset(None);

    assert_eq!(cache.stats().available, 1);
    assert_eq!(cache.stats().discarded, 0);
    let unit = cache.acquire("SELECT 1").unwrap();
    assert_eq!(cache.stats().hits, 1);
    cache.release(unit, Disposition::Clean).unwrap();
}

#[test]
fn test_close_waits_for_lent_units() {
    let cache = cache_with(4);
    let lent = cache.acquire("SELECT 1").unwrap();
    let pooled = cache.acquire("SELECT 2").unwrap();
    cache.release(pooled, Disposition::Clean).unwrap();

    cache.close().unwrap();
    assert!(cache.is_closed());
    assert!(!cache.is_engine_closed());
    assert!(!cache.engine().is_closed());
    assert_eq!(cache.stats().lent, 1);
    assert_eq!(cache.engine().stats().live(), 1);

    cache.release(lent, Disposition::Clean).unwrap();
    assert!(cache.is_engine_closed());
    assert!(cache.engine().is_closed());
    assert_eq!(cache.stats().lent, 0);
    assert_eq!(cache.engine().stats().live(), 0);

    // closing again does nothing
    cache.close().unwrap();
}

#[test]
fn test_failed_compile_is_not_counted_as_lent() {
    let cache = cache_with(4);
    assert!(cache.acquire("SELECT FROM").is_err());
    assert_eq!(cache.stats().lent, 0);
    cache.close().unwrap();
    assert!(cache.engine().is_closed());
}
