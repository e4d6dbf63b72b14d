//! Exec and row tracers.
//!
//! A connection holds default tracers; a cursor may set its own, which take
//! precedence over the connection's.

use std::sync::Arc;

use crate::bindings::TraceBindings;
use crate::row::Row;

/// Called before each statement runs with the statement text and the
/// bindings it consumed. Returning `false` aborts execution.
pub type ExecTrace = Arc<dyn Fn(&str, TraceBindings<'_>) -> bool + Send + Sync>;

/// Called with each row before it is returned. Returning `None` skips the
/// row; returning a row replaces it.
pub type RowTrace = Arc<dyn Fn(Row) -> Option<Row> + Send + Sync>;

/// Optional tracer slots.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Exec tracer slot.
    pub exec_trace: Option<ExecTrace>,
    /// Row tracer slot.
    pub row_trace: Option<RowTrace>,
}

impl Hooks {
    /// Slot-wise `self`, falling back to `defaults`.
    #[must_use]
    pub fn or(&self, defaults: &Self) -> Self {
        Self {
            exec_trace: self
                .exec_trace
                .clone()
                .or_else(|| defaults.exec_trace.clone()),
            row_trace: self.row_trace.clone().or_else(|| defaults.row_trace.clone()),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("exec_trace", &self.exec_trace.is_some())
            .field("row_trace", &self.row_trace.is_some())
            .finish()
    }
}
