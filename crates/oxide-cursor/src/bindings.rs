//! Applying caller bindings to the parameter slots of one statement.
//!
//! A flat positional sequence can feed a whole chain: each statement takes
//! the next `parameter_count` values and advances a shared offset. Only the
//! last statement of the chain must use up exactly what is left.

use std::collections::HashMap;
use std::ops::Range;

use oxide_sql_core::{Engine, EngineError, SqlValue, ToSqlValue};
use tracing::trace;

use crate::cache::CompiledUnit;
use crate::error::{CursorError, Result};

/// Values supplied for a statement's parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Bindings {
    /// No bindings. Valid only for statements without parameters.
    #[default]
    None,
    /// Values in parameter order, shared across a chain.
    Positional(Vec<SqlValue>),
    /// Values by parameter name, without the leading `:`, `@`, `$` or `?`.
    Named(HashMap<String, SqlValue>),
}

impl Bindings {
    /// Positional bindings from any convertible values.
    pub fn positional<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToSqlValue,
    {
        Self::Positional(values.into_iter().map(ToSqlValue::to_sql_value).collect())
    }

    /// Named bindings from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToSqlValue,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_sql_value()))
                .collect(),
        )
    }
}

impl From<()> for Bindings {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<Vec<SqlValue>> for Bindings {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::Positional(values)
    }
}

impl From<HashMap<String, SqlValue>> for Bindings {
    fn from(values: HashMap<String, SqlValue>) -> Self {
        Self::Named(values)
    }
}

impl<T: ToSqlValue, const N: usize> From<[T; N]> for Bindings {
    fn from(values: [T; N]) -> Self {
        Self::positional(values)
    }
}

/// The bindings one statement consumed, as shown to the exec tracer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceBindings<'a> {
    /// No bindings were supplied.
    None,
    /// The slice of a positional sequence this statement used.
    Positional(&'a [SqlValue]),
    /// The full mapping.
    Named(&'a HashMap<String, SqlValue>),
}

impl<'a> TraceBindings<'a> {
    pub(crate) fn new(bindings: &'a Bindings, range: Range<usize>) -> Self {
        match bindings {
            Bindings::None => Self::None,
            Bindings::Positional(values) => Self::Positional(values.get(range).unwrap_or(&[])),
            Bindings::Named(map) => Self::Named(map),
        }
    }
}

/// Strips the sigil (`:`, `@`, `$`, `?`) from a parameter name.
pub(crate) fn bare_name(name: &str) -> &str {
    name.strip_prefix(&[':', '@', '$', '?'][..]).unwrap_or(name)
}

fn bind_one<E: Engine>(
    engine: &E,
    handle: &mut E::Handle,
    index: usize,
    value: &SqlValue,
) -> Result<()> {
    engine
        .bind(handle, index, value)
        .map_err(|err: EngineError| {
            if err.code.is_binding_type() {
                CursorError::BindingType {
                    index,
                    reason: err.message,
                }
            } else {
                CursorError::Step(err)
            }
        })
}

/// Binds `bindings` to every parameter of `unit`.
///
/// For positional bindings `offset` is advanced past the values used and
/// the consumed range is returned. Named bindings leave it untouched.
pub(crate) fn bind_all<E: Engine>(
    engine: &E,
    unit: &mut CompiledUnit<E::Handle>,
    bindings: &Bindings,
    offset: &mut usize,
) -> Result<Range<usize>> {
    let count = unit.parameter_count();
    let start = *offset;
    match bindings {
        Bindings::None => {
            if count > 0 {
                return Err(CursorError::BindingCount {
                    expected: count,
                    available: 0,
                    offset: start,
                });
            }
        }
        Bindings::Named(map) => {
            let names: Vec<(usize, String)> = unit
                .parameter_names()
                .iter()
                .enumerate()
                .filter_map(|(i, name)| name.as_ref().map(|n| (i + 1, n.clone())))
                .collect();
            if let Some(handle) = unit.handle_mut() {
                for (index, name) in names {
                    let value = map.get(bare_name(&name)).or_else(|| map.get(&name));
                    if let Some(value) = value {
                        bind_one(engine, handle, index, value)?;
                    }
                }
            }
        }
        Bindings::Positional(values) => {
            let available = values.len().saturating_sub(start);
            let enough = if unit.has_next() {
                available >= count
            } else {
                available == count
            };
            if !enough {
                return Err(CursorError::BindingCount {
                    expected: count,
                    available,
                    offset: start,
                });
            }
            if let Some(handle) = unit.handle_mut() {
                for (i, value) in values[start..start + count].iter().enumerate() {
                    bind_one(engine, handle, i + 1, value)?;
                }
            }
            *offset = start + count;
            trace!(offset = *offset, count, "bound positional values");
            return Ok(start..start + count);
        }
    }
    Ok(start..start)
}
