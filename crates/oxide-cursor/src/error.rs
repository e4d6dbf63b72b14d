//! Error types for statement caching and cursor execution.

use oxide_sql_core::{EngineError, ErrorCode};

/// Errors that can occur while compiling, binding or stepping statements.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    /// The engine rejected the SQL text. Failed compiles are never cached.
    #[error("Failed to compile '{sql}': {source}")]
    Compile {
        /// The text handed to the compiler.
        sql: String,
        /// The engine diagnostic.
        source: EngineError,
    },

    /// The supplied positional bindings do not match the statement's
    /// parameter count, or a statement with parameters got no bindings.
    #[error(
        "Incorrect number of bindings supplied: the statement uses {expected}, \
         {available} available at offset {offset}"
    )]
    BindingCount {
        /// Parameters used by the statement.
        expected: usize,
        /// Bindings left at the current offset.
        available: usize,
        /// Offset into the flat binding sequence.
        offset: usize,
    },

    /// The engine cannot represent a bound value.
    #[error("Bad binding for parameter {index}: {reason}")]
    BindingType {
        /// 1-based parameter index.
        index: usize,
        /// Engine diagnostic.
        reason: String,
    },

    /// The engine reported a runtime failure while stepping or binding.
    #[error("Step failed: {0}")]
    Step(#[source] EngineError),

    /// The engine failed to reset or finalize a statement, or to close the
    /// database.
    #[error("Finalize failed: {0}")]
    Finalize(#[source] EngineError),

    /// Statements of a chain, or binding sets of a batch, were abandoned
    /// before they ran.
    #[error("Execution was abandoned before completion: {remaining}")]
    IncompleteExecution {
        /// What was left unexecuted.
        remaining: String,
    },

    /// An object was entered while another operation on it was in flight.
    #[error("You are trying to use the same {object} in two threads at once, or re-entrantly")]
    ThreadingViolation {
        /// The kind of object (`"connection"`, `"cursor"`).
        object: &'static str,
    },

    /// The connection has been closed.
    #[error("The connection has been closed")]
    ConnectionClosed,

    /// The cursor has been closed.
    #[error("The cursor has been closed")]
    CursorClosed,

    /// Statement metadata was requested but no statement is executing.
    #[error("Can't get description for statements that have completed execution")]
    ExecutionComplete,

    /// The exec tracer returned `false`.
    #[error("Aborted by false return from the exec tracer")]
    ExecTraceAbort,
}

impl CursorError {
    /// Engine result code behind this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Compile { source, .. } => Some(source.code),
            Self::Step(e) | Self::Finalize(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Result type for cursor operations.
pub type Result<T> = std::result::Result<T, CursorError>;
