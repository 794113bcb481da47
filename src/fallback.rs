//! Fallback serialization: a batch rendered as safely-escaped delimited text.
//!
//! The text path is what the warehouse falls back to once the typed path has
//! failed, so it must accept anything the batch holds:
//! - every field is quoted, header included
//! - `"` and `\` inside a value are escaped with `\`
//! - `\r\n`, `\n` and `\r` each become a single space
//! - control characters other than tab are dropped
//! - null cells are written as empty fields, as are values that sanitize
//!   to nothing

use crate::sink::TextDialect;
use crate::values::render_cell;
use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use csv::{QuoteStyle, WriterBuilder};
use std::io::Write;
use tempfile::NamedTempFile;

/// Dialect of files produced by [`stage_batch`].
#[must_use]
pub fn fallback_dialect() -> TextDialect {
    TextDialect::default()
}

/// Collapse line breaks to spaces and drop control characters other than tab.
///
/// A value made only of dropped control characters sanitizes to `""`, and an
/// empty field in a fallback file loads as null. Such cells therefore arrive
/// as null on the text path.
///
/// ```
/// use warehouse_loader::fallback::sanitize_text;
///
/// assert_eq!(sanitize_text("a\r\nb\nc\u{7}d\te"), "a b cd\te");
/// ```
#[must_use]
pub fn sanitize_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push(' ');
            }
            '\n' => out.push(' '),
            '\t' => out.push('\t'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn escape_backslashes(value: &str) -> String {
    value.replace('\\', "\\\\")
}

/// Write `batch` (header first) to `writer` in the fallback dialect.
///
/// # Errors
/// Returns an error if a cell cannot be rendered or the write fails.
pub fn write_batch_text<W: Write>(batch: &RecordBatch, writer: W) -> Result<usize> {
    let dialect = fallback_dialect();
    let mut wtr = WriterBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .escape(dialect.escape)
        .double_quote(false)
        .quote_style(QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    let schema = batch.schema();
    let header: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| escape_backslashes(&sanitize_text(f.name())))
        .collect();
    wtr.write_record(&header).context("write fallback header")?;

    let mut record: Vec<String> = Vec::with_capacity(batch.num_columns());
    for row in 0..batch.num_rows() {
        record.clear();
        for column in batch.columns() {
            let cell = render_cell(column.as_ref(), row)
                .with_context(|| format!("render row {row}"))?;
            record.push(cell.map_or_else(String::new, |v| escape_backslashes(&sanitize_text(&v))));
        }
        wtr.write_record(&record)
            .with_context(|| format!("write fallback row {row}"))?;
    }
    wtr.flush().context("flush fallback text")?;
    Ok(batch.num_rows())
}

/// Write `batch` to a new temporary `.csv` file.
///
/// The file is deleted when the returned handle is dropped.
///
/// # Errors
/// Returns an error if the temp file cannot be created or written.
pub fn stage_batch(batch: &RecordBatch) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("fallback-")
        .suffix(".csv")
        .tempfile()
        .context("create fallback temp file")?;
    write_batch_text(batch, file.as_file_mut())
        .with_context(|| format!("write {}", file.path().display()))?;
    Ok(file)
}
