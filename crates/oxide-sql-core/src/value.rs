//! Engine values and host conversions.
//!
//! [`SqlValue`] is the closed set of values the engine can bind and return.
//! Host types convert into it with [`ToSqlValue`] and back out of result
//! columns with [`FromSqlValue`].

use core::fmt;

/// A value bound to a statement parameter or read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// A blob of the given length filled with zeroes, allocated by the
    /// engine rather than the host.
    ZeroBlob(u64),
}

impl SqlValue {
    /// Returns the storage class name of this value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Blob(_) | Self::ZeroBlob(_) => "blob",
        }
    }

    /// Returns true for NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the SQL representation for inline use (escaped).
    ///
    /// **Warning**: Prefer binding values instead.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Int(n) => format!("{n}"),
            Self::Float(f) => format!("{f:?}"),
            Self::Text(s) => {
                // Escape single quotes by doubling them
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Self::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::ZeroBlob(n) => format!("zeroblob({n})"),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(_) | Self::ZeroBlob(_) => f.write_str(&self.to_sql_inline()),
        }
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for &SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self.clone()
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Int(i64::from(self))
    }
}

macro_rules! int_to_sql_value {
    ($($ty:ty),*) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(self) -> SqlValue {
                    SqlValue::Int(i64::from(self))
                }
            }
        )*
    };
}

int_to_sql_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

/// Error converting a column value into a host type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The stored value has no lossless mapping to the requested type.
    TypeMismatch {
        /// The requested host type.
        expected: &'static str,
        /// The storage class that was found.
        found: &'static str,
    },
    /// A column index past the end of the row.
    OutOfRange {
        /// The requested index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "cannot read {found} value as {expected}")
            }
            Self::OutOfRange { index, len } => {
                write!(f, "column index {index} out of range for row of {len}")
            }
        }
    }
}

impl std::error::Error for ValueError {}

/// Trait for types that can be read back from a result column.
pub trait FromSqlValue: Sized {
    /// Converts a column value into `Self`.
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError>;
}

const fn mismatch(expected: &'static str, value: &SqlValue) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        found: value.type_name(),
    }
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Int(n) => Ok(*n),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Float(x) => Ok(*x),
            #[allow(clippy::cast_precision_loss)]
            SqlValue::Int(n) => Ok(*n as Self),
            other => Err(mismatch("f64", other)),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Int(n) => Ok(*n != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Blob(b) => Ok(b.clone()),
            SqlValue::ZeroBlob(n) => usize::try_from(*n)
                .map(|len| vec![0; len])
                .map_err(|_| mismatch("Vec<u8>", value)),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_literals() {
        assert_eq!(
            SqlValue::Text(String::from("it's")).to_sql_inline(),
            "'it''s'"
        );
        assert_eq!(SqlValue::Blob(vec![0xCA, 0xFE]).to_sql_inline(), "X'CAFE'");
        assert_eq!(SqlValue::ZeroBlob(16).to_sql_inline(), "zeroblob(16)");
        assert_eq!(SqlValue::Float(3.0).to_sql_inline(), "3.0");
        assert_eq!(SqlValue::Null.to_string(), "NULL");
    }

    #[test]
    fn test_host_values() {
        assert_eq!(false.to_sql_value(), SqlValue::Int(0));
        assert_eq!((-3_i8).to_sql_value(), SqlValue::Int(-3));
        assert_eq!(u32::MAX.to_sql_value(), SqlValue::Int(4_294_967_295));
        assert_eq!(0.5_f32.to_sql_value(), SqlValue::Float(0.5));
        assert_eq!(
            String::from("row").to_sql_value(),
            SqlValue::Text(String::from("row"))
        );
        assert_eq!(
            Some(&b"ab"[..]).to_sql_value(),
            SqlValue::Blob(vec![b'a', b'b'])
        );
        assert_eq!(None::<&str>.to_sql_value(), SqlValue::Null);
        assert_eq!(SqlValue::Int(1).type_name(), "integer");
        assert!(SqlValue::Null.is_null());
    }

    #[test]
    fn test_from_sql_value() {
        assert_eq!(i64::from_sql_value(&SqlValue::Int(9)), Ok(9));
        assert_eq!(f64::from_sql_value(&SqlValue::Int(2)), Ok(2.0));
        assert_eq!(
            Option::<String>::from_sql_value(&SqlValue::Null),
            Ok(None)
        );
        assert_eq!(
            Vec::<u8>::from_sql_value(&SqlValue::ZeroBlob(3)),
            Ok(vec![0, 0, 0])
        );
    }

    #[test]
    fn test_from_sql_value_mismatch() {
        let err = i64::from_sql_value(&SqlValue::Text(String::from("x"))).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "i64",
                found: "text"
            }
        );
        assert_eq!(err.to_string(), "cannot read text value as i64");
    }
}
