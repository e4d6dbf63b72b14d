//! The contract an embedded SQL engine exposes to the execution layer.
//!
//! The execution layer never looks inside a compiled statement. It compiles
//! one statement at a time, binds parameters by 1-based index, steps until
//! the engine reports [`Step::Done`] and finalizes handles it no longer
//! needs. Everything else (parsing, planning, storage, transactions) belongs
//! to the engine.

use crate::error::EngineError;
use crate::value::SqlValue;

/// Outcome of a single successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A result row is available and its columns can be read.
    Row,
    /// The statement has finished executing.
    Done,
}

/// Result of compiling the first statement of a SQL string.
#[derive(Debug)]
pub struct Compiled<H> {
    /// The compiled statement, or `None` if the consumed text held no
    /// statement (only whitespace or comments).
    pub handle: Option<H>,
    /// Number of bytes of the input consumed, including the terminating
    /// semicolon. The next statement of the chain starts here.
    pub consumed: usize,
}

/// An embedded SQL engine bound to one database.
///
/// Implementations must tolerate calls from several threads at once as
/// long as no two threads use the same handle concurrently; the execution
/// layer guarantees the latter.
pub trait Engine: Send + Sync {
    /// Opaque compiled statement.
    type Handle: Send;

    /// Compiles the first statement in `sql`.
    fn compile(&self, sql: &str) -> Result<Compiled<Self::Handle>, EngineError>;

    /// Advances a statement by one step.
    fn step(&self, handle: &mut Self::Handle) -> Result<Step, EngineError>;

    /// Rewinds a statement so it can be stepped again and clears its
    /// bindings.
    fn reset(&self, handle: &mut Self::Handle) -> Result<(), EngineError>;

    /// Binds `value` to the 1-based parameter `index`.
    fn bind(
        &self,
        handle: &mut Self::Handle,
        index: usize,
        value: &SqlValue,
    ) -> Result<(), EngineError>;

    /// Releases a statement. The handle is consumed whether or not an error
    /// is reported.
    fn finalize(&self, handle: Self::Handle) -> Result<(), EngineError>;

    /// Number of parameter slots (the largest parameter index).
    fn parameter_count(&self, handle: &Self::Handle) -> usize;

    /// Name of the 1-based parameter `index`, including its sigil
    /// (`:name`, `@name`, `$name`, `?NNN`), or `None` for anonymous `?`.
    fn parameter_name(&self, handle: &Self::Handle, index: usize) -> Option<String>;

    /// Number of result columns the statement declares.
    fn column_count(&self, handle: &Self::Handle) -> usize;

    /// Number of columns in the current row; zero unless the last step
    /// produced a row.
    fn data_count(&self, handle: &Self::Handle) -> usize;

    /// Name of result column `index` (0-based).
    fn column_name(&self, handle: &Self::Handle, index: usize) -> String;

    /// Declared type of result column `index`, when it maps to a table
    /// column.
    fn column_decltype(&self, handle: &Self::Handle, index: usize) -> Option<String>;

    /// Value of column `index` in the current row.
    fn column_value(&self, handle: &Self::Handle, index: usize) -> SqlValue;

    /// Requests that running statements abort at their next opportunity.
    fn interrupt(&self);

    /// Closes the underlying database. Statements must be finalized first.
    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
