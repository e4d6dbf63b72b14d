//! Conversions between JSON and SQL values.

use anyhow::{bail, Result};
use oxide_cursor::{Bindings, Column, Row};
use oxide_sql_core::SqlValue;
use serde_json::{Map, Number, Value};

/// Converts one JSON scalar into a bindable value.
///
/// Booleans become integers. Arrays and objects cannot be bound.
pub fn to_sql_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => match n.as_f64() {
                Some(f) => SqlValue::Float(f),
                None => bail!("number {n} is out of range"),
            },
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => bail!("cannot bind nested value {value}"),
    })
}

/// Reads a binding set: `null` for none, an array for positional values
/// or an object for named values.
pub fn to_bindings(value: &Value) -> Result<Bindings> {
    Ok(match value {
        Value::Null => Bindings::None,
        Value::Array(values) => {
            Bindings::Positional(values.iter().map(to_sql_value).collect::<Result<_>>()?)
        }
        Value::Object(map) => Bindings::Named(
            map.iter()
                .map(|(name, value)| Ok((name.clone(), to_sql_value(value)?)))
                .collect::<Result<_>>()?,
        ),
        other => bail!("bindings must be an array or an object, got {other}"),
    })
}

/// Parses bindings from JSON text.
pub fn parse_bindings(text: &str) -> Result<Bindings> {
    to_bindings(&serde_json::from_str(text)?)
}

/// Parses one binding set per non-blank line.
pub fn parse_batch(text: &str) -> Result<Vec<Bindings>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            parse_bindings(line).map_err(|err| err.context(format!("line {}", number + 1)))
        })
        .collect()
}

/// Converts a result value to JSON. Blobs are rendered as SQL hex
/// literals; non-finite floats become `null`.
pub fn from_sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Int(i) => Value::from(*i),
        SqlValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(_) | SqlValue::ZeroBlob(_) => Value::String(value.to_string()),
    }
}

/// A row as an object keyed by column name.
pub fn row_to_json(columns: &[Column], row: &Row) -> Value {
    let mut object = Map::new();
    for (i, value) in row.values().iter().enumerate() {
        let name = columns
            .get(i)
            .map_or_else(|| format!("column{i}"), |column| column.name.clone());
        object.insert(name, from_sql_value(value));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(to_sql_value(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(to_sql_value(&json!(true)).unwrap(), SqlValue::Int(1));
        assert_eq!(to_sql_value(&json!(42)).unwrap(), SqlValue::Int(42));
        assert_eq!(to_sql_value(&json!(1.5)).unwrap(), SqlValue::Float(1.5));
        assert_eq!(
            to_sql_value(&json!("hi")).unwrap(),
            SqlValue::Text(String::from("hi"))
        );
        assert!(to_sql_value(&json!([1])).is_err());
        assert!(to_sql_value(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_bindings() {
        assert_eq!(parse_bindings("null").unwrap(), Bindings::None);
        assert_eq!(
            parse_bindings("[1, \"a\"]").unwrap(),
            Bindings::Positional(vec![SqlValue::Int(1), SqlValue::Text(String::from("a"))])
        );
        let Bindings::Named(map) = parse_bindings(r#"{"id": 7}"#).unwrap() else {
            panic!("expected named bindings");
        };
        assert_eq!(map["id"], SqlValue::Int(7));
        assert!(parse_bindings("3").is_err());
        assert!(parse_bindings("[").is_err());
    }

    #[test]
    fn test_batch_skips_blank_lines() {
        let batch = parse_batch("[1]\n\n[2]\n  \n").unwrap();
        assert_eq!(batch.len(), 2);

        let err = parse_batch("[1]\n[[2]]\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_result_values() {
        assert_eq!(from_sql_value(&SqlValue::Int(3)), json!(3));
        assert_eq!(from_sql_value(&SqlValue::Float(f64::NAN)), json!(null));
        assert_eq!(from_sql_value(&SqlValue::Blob(vec![0xAB, 0x01])), json!("X'AB01'"));

        let columns = vec![Column {
            name: String::from("x"),
            decltype: None,
        }];
        let row = Row::new(vec![SqlValue::Int(1), SqlValue::Null]);
        assert_eq!(row_to_json(&columns, &row), json!({"x": 1, "column1": null}));
    }
}
