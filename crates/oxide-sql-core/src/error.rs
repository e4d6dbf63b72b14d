//! Engine error codes and errors.
//!
//! Result codes follow the usual embedded-engine convention: the primary
//! code lives in the low byte and extended codes refine it in the bits
//! above (`IOERR_READ` is `IOERR | (1 << 8)`).

use core::fmt;

/// A result code reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// Generic error.
    pub const ERROR: Self = Self(1);
    /// Internal logic error in the engine.
    pub const INTERNAL: Self = Self(2);
    /// Access permission denied.
    pub const PERM: Self = Self(3);
    /// Callback routine requested an abort.
    pub const ABORT: Self = Self(4);
    /// The database file is locked.
    pub const BUSY: Self = Self(5);
    /// A table in the database is locked.
    pub const LOCKED: Self = Self(6);
    /// A memory allocation failed.
    pub const NOMEM: Self = Self(7);
    /// Attempt to write a read-only database.
    pub const READONLY: Self = Self(8);
    /// Operation terminated by an interrupt.
    pub const INTERRUPT: Self = Self(9);
    /// Disk I/O error.
    pub const IOERR: Self = Self(10);
    /// The database disk image is malformed.
    pub const CORRUPT: Self = Self(11);
    /// The database file could not be opened.
    pub const CANTOPEN: Self = Self(14);
    /// The database schema changed.
    pub const SCHEMA: Self = Self(17);
    /// String or blob exceeds size limit.
    pub const TOOBIG: Self = Self(18);
    /// Abort due to constraint violation.
    pub const CONSTRAINT: Self = Self(19);
    /// Data type mismatch.
    pub const MISMATCH: Self = Self(20);
    /// Library used incorrectly.
    pub const MISUSE: Self = Self(21);
    /// Bind parameter index out of range.
    pub const RANGE: Self = Self(25);

    /// Returns the primary code (low byte).
    #[must_use]
    pub const fn primary(self) -> Self {
        Self(self.0 & 0xff)
    }

    /// Returns true if the statement was invalidated by a schema change.
    #[must_use]
    pub const fn is_schema_change(self) -> bool {
        self.primary().0 == Self::SCHEMA.0
    }

    /// Returns true if the engine reports API misuse.
    #[must_use]
    pub const fn is_misuse(self) -> bool {
        self.primary().0 == Self::MISUSE.0
    }

    /// Returns true for the abort-class error raised after an interrupt.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        self.primary().0 == Self::INTERRUPT.0
    }

    /// Returns true if a compiled statement that produced this code must not
    /// be handed out again.
    #[must_use]
    pub const fn poisons_statement(self) -> bool {
        self.is_schema_change() || self.is_misuse()
    }

    /// Returns true if `bind` rejected the value itself rather than the
    /// statement.
    #[must_use]
    pub const fn is_binding_type(self) -> bool {
        matches!(self.primary().0, 18 | 20)
    }

    /// Returns the conventional short name of the primary code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.primary().0 {
            1 => "ERROR",
            2 => "INTERNAL",
            3 => "PERM",
            4 => "ABORT",
            5 => "BUSY",
            6 => "LOCKED",
            7 => "NOMEM",
            8 => "READONLY",
            9 => "INTERRUPT",
            10 => "IOERR",
            11 => "CORRUPT",
            14 => "CANTOPEN",
            17 => "SCHEMA",
            18 => "TOOBIG",
            19 => "CONSTRAINT",
            20 => "MISMATCH",
            21 => "MISUSE",
            25 => "RANGE",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == self.primary().0 {
            write!(f, "{} ({})", self.name(), self.0)
        } else {
            write!(f, "{} ({}, extended {})", self.name(), self.primary().0, self.0)
        }
    }
}

/// An error reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Engine result code.
    pub code: ErrorCode,
    /// Human-readable diagnostic from the engine.
    pub message: String,
}

impl EngineError {
    /// Creates a new engine error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates an error reporting misuse of the engine API.
    #[must_use]
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MISUSE, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_strips_extended_bits() {
        let ioerr_read = ErrorCode(10 | (1 << 8));
        assert_eq!(ioerr_read.primary(), ErrorCode::IOERR);
        assert_eq!(ioerr_read.name(), "IOERR");
    }

    #[test]
    fn test_poisons_statement() {
        assert!(ErrorCode::SCHEMA.poisons_statement());
        assert!(ErrorCode::MISUSE.poisons_statement());
        assert!(!ErrorCode::CONSTRAINT.poisons_statement());
        assert!(!ErrorCode::BUSY.poisons_statement());
    }

    #[test]
    fn test_binding_type_codes() {
        assert!(ErrorCode::TOOBIG.is_binding_type());
        assert!(ErrorCode::MISMATCH.is_binding_type());
        assert!(!ErrorCode::RANGE.is_binding_type());
    }

    #[test]
    fn test_display() {
        let err = EngineError::new(ErrorCode::CONSTRAINT, "UNIQUE constraint failed: t.id");
        assert_eq!(
            err.to_string(),
            "CONSTRAINT (19): UNIQUE constraint failed: t.id"
        );
        // SQLITE_CONSTRAINT_UNIQUE
        let extended = ErrorCode(2067);
        assert_eq!(extended.to_string(), "CONSTRAINT (19, extended 2067)");
    }
}
