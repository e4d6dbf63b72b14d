//! Statement handle instrumentation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of engine work performed on one database.
///
/// Every compiled handle is counted once when created and once when
/// finalized; `live()` must therefore never go negative.
#[derive(Debug, Default)]
pub struct EngineStats {
    compiled: AtomicU64,
    finalized: AtomicU64,
    steps: AtomicU64,
    resets: AtomicU64,
}

impl EngineStats {
    pub(crate) fn record_compile(&self) {
        self.compiled.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_finalize(&self) {
        self.finalized.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Statement handles created by the compiler.
    #[must_use]
    pub fn compiled(&self) -> u64 {
        self.compiled.load(Ordering::Relaxed)
    }

    /// Statement handles finalized.
    #[must_use]
    pub fn finalized(&self) -> u64 {
        self.finalized.load(Ordering::Relaxed)
    }

    /// Calls to step, across all handles.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Calls to reset, across all handles.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Handles compiled and not yet finalized.
    #[must_use]
    pub fn live(&self) -> i64 {
        // Finalized first: every finalize observed here follows its compile.
        let finalized = self.finalized.load(Ordering::Acquire);
        let compiled = self.compiled.load(Ordering::Acquire);
        i64::try_from(compiled).unwrap_or(i64::MAX) - i64::try_from(finalized).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_tracks_compile_and_finalize() {
        let stats = EngineStats::default();
        stats.record_compile();
        stats.record_compile();
        stats.record_finalize();
        assert_eq!(stats.compiled(), 2);
        assert_eq!(stats.finalized(), 1);
        assert_eq!(stats.live(), 1);
    }
}
