//! Fail-fast exclusive access to connection and cursor state.
//!
//! Entering an [`Exclusive`] never blocks. If another operation already
//! holds it (on another thread, or re-entrantly on this one through a
//! callback) entry fails with [`CursorError::ThreadingViolation`]. The
//! returned guard releases on every exit path.

use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::error::{CursorError, Result};

/// State that only one operation may touch at a time.
#[derive(Debug)]
pub struct Exclusive<T> {
    object: &'static str,
    inner: Mutex<T>,
}

impl<T> Exclusive<T> {
    /// Wraps `value`; `object` names it in violation errors.
    pub const fn new(object: &'static str, value: T) -> Self {
        Self {
            object,
            inner: Mutex::new(value),
        }
    }

    /// Enters the object, failing instead of waiting if it is in use.
    pub fn enter(&self) -> Result<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            // A panic inside a previous operation does not leave the state
            // half-borrowed; every field is valid between operations.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(CursorError::ThreadingViolation {
                object: self.object,
            }),
        }
    }

    /// Direct access through a unique reference.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_is_rejected() {
        let state = Exclusive::new("cursor", 0_u32);
        let mut first = state.enter().unwrap();
        *first += 1;
        let err = state.enter().unwrap_err();
        assert!(matches!(
            err,
            CursorError::ThreadingViolation { object: "cursor" }
        ));
        drop(first);
        assert_eq!(*state.enter().unwrap(), 1);
    }

    #[test]
    fn test_other_thread_is_rejected_while_held() {
        let state = Exclusive::new("connection", ());
        let held = state.enter().unwrap();
        std::thread::scope(|s| {
            let result = s.spawn(|| state.enter().map(|_| ())).join().unwrap();
            assert!(matches!(
                result,
                Err(CursorError::ThreadingViolation {
                    object: "connection"
                })
            ));
        });
        drop(held);
        std::thread::scope(|s| {
            assert!(s.spawn(|| state.enter().is_ok()).join().unwrap());
        });
    }

    #[test]
    fn test_released_on_error_path() {
        fn failing(state: &Exclusive<Vec<u8>>) -> Result<()> {
            let mut guard = state.enter()?;
            guard.push(1);
            Err(CursorError::ExecTraceAbort)
        }
        let state = Exclusive::new("cursor", Vec::new());
        assert!(failing(&state).is_err());
        assert_eq!(state.enter().unwrap().len(), 1);
    }
}
