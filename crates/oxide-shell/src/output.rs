//! Rendering cursor results.

use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use oxide_cursor::{Column, Cursor, CursorError, Row};
use oxide_sql_core::Engine;

use crate::json::row_to_json;

/// Output format for result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Column headers followed by `|`-separated rows.
    Table,
    /// One JSON object per row.
    Json,
}

/// Drains `cursor`, writing each row to `out`.
///
/// Statements of a chain may return different columns; a new header is
/// written whenever they change. Returns the number of rows written.
pub fn write_rows<E: Engine>(
    cursor: &Cursor<E>,
    format: Format,
    out: &mut impl Write,
) -> Result<usize> {
    let mut columns: Option<Vec<Column>> = None;
    let mut count = 0;
    while let Some(row) = cursor.next_row()? {
        let current = match cursor.description() {
            Ok(current) => current,
            Err(CursorError::ExecutionComplete) => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        if columns.as_ref() != Some(&current) {
            if format == Format::Table {
                write_header(&current, out)?;
            }
            columns = Some(current);
        }
        let columns = columns.as_deref().unwrap_or_default();
        match format {
            Format::Table => write_table_row(&row, out)?,
            Format::Json => writeln!(out, "{}", row_to_json(columns, &row))?,
        }
        count += 1;
    }
    Ok(count)
}

fn write_header(columns: &[Column], out: &mut impl Write) -> Result<()> {
    let names: Vec<&str> = columns.iter().map(|column| column.name.as_str()).collect();
    let line = names.join(" | ");
    writeln!(out, "{line}")?;
    writeln!(out, "{:-<width$}", "", width = line.len().max(3))?;
    Ok(())
}

fn write_table_row(row: &Row, out: &mut impl Write) -> Result<()> {
    let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
    writeln!(out, "{}", cells.join(" | "))?;
    Ok(())
}
