//! Warehouse sink abstraction and shared load helpers.
//!
//! The loader talks to a warehouse only through [`WarehouseSink`]: a
//! synchronous, thread-safe trait covering the dataset/table lifecycle, the
//! two append paths (typed record batch, delimited text file) and table
//! statistics. Two implementations ship with the crate:
//!
//! - [`MemoryWarehouse`](memory::MemoryWarehouse): in-process, with an append
//!   log and failure injection for tests
//! - [`LocalWarehouse`](local::LocalWarehouse): a directory of Parquet parts,
//!   used by the command-line binary

pub mod local;
pub mod memory;

pub use local::LocalWarehouse;
pub use memory::{AppendKind, AppendRecord, MemoryWarehouse};

use crate::schema::{ColumnType, TableSchema};
use crate::transform::coerce_column;
use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    SchemaMismatch,
    Network,
    Timeout,
    ServiceUnavailable,
    Internal,
    Other,
}

/// Categorized failure reported by a [`WarehouseSink`].
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct SinkError {
    pub kind: SinkErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn new(kind: SinkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wrap an I/O error, keeping "not found" distinguishable.
    pub fn io(context: impl fmt::Display, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => SinkErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => SinkErrorKind::AlreadyExists,
            _ => SinkErrorKind::Internal,
        };
        Self::new(kind, format!("{context}: {err}"))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == SinkErrorKind::NotFound
    }
}

pub type SinkResult<T> = Result<T, SinkError>;

// ============================================================================
// Resource identifiers
// ============================================================================

/// A dataset addressed as `catalog.dataset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub catalog: String,
    pub dataset: String,
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.catalog, self.dataset)
    }
}

/// A table addressed as `catalog.dataset.table`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub catalog: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        catalog: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    #[must_use]
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef {
            catalog: self.catalog.clone(),
            dataset: self.dataset.clone(),
        }
    }

    /// Whether every coordinate is non-blank.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [&self.catalog, &self.dataset, &self.table]
            .iter()
            .all(|part| !part.trim().is_empty())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').map(str::trim).collect();
        match parts.as_slice() {
            [catalog, dataset, table]
                if !catalog.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*catalog, *dataset, *table))
            }
            _ => Err(SinkError::new(
                SinkErrorKind::InvalidInput,
                format!("expected catalog.dataset.table, got {s:?}"),
            )),
        }
    }
}

// ============================================================================
// Load options and statistics
// ============================================================================

/// Row count and stored size of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub num_rows: u64,
    pub num_bytes: u64,
}

impl TableStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mebibytes(&self) -> f64 {
        self.num_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// How a delimited text file handed to [`WarehouseSink::append_text_file`] is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDialect {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: u8,
    pub skip_leading_rows: usize,
    pub allow_quoted_newlines: bool,
}

impl Default for TextDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: b'\\',
            skip_leading_rows: 1,
            allow_quoted_newlines: true,
        }
    }
}

// ============================================================================
// WarehouseSink
// ============================================================================

/// Operations the loader needs from a columnar warehouse.
///
/// Calls may block for as long as the backend takes; there is no timeout.
pub trait WarehouseSink: Send + Sync {
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    fn dataset_exists(&self, dataset: &DatasetRef) -> SinkResult<bool>;

    /// # Errors
    /// Returns [`SinkErrorKind::AlreadyExists`] if the dataset exists, or a
    /// backend error.
    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> SinkResult<()>;

    /// # Errors
    /// Returns an error if the backend cannot be reached.
    fn table_exists(&self, table: &TableRef) -> SinkResult<bool>;

    /// # Errors
    /// Returns [`SinkErrorKind::NotFound`] if the table does not exist.
    fn delete_table(&self, table: &TableRef) -> SinkResult<()>;

    /// # Errors
    /// Returns [`SinkErrorKind::AlreadyExists`] if the table exists, or
    /// [`SinkErrorKind::NotFound`] if its dataset does not.
    fn create_table(&self, table: &TableRef, schema: &TableSchema) -> SinkResult<()>;

    /// Structured load of one typed batch.
    ///
    /// # Errors
    /// Returns [`SinkErrorKind::SchemaMismatch`] if the batch does not match
    /// the table schema, or a backend error.
    fn append_batch(&self, table: &TableRef, batch: &RecordBatch) -> SinkResult<()>;

    /// Bulk load of a delimited text file.
    ///
    /// # Errors
    /// Returns [`SinkErrorKind::InvalidInput`] if the file does not parse
    /// under `dialect` or has the wrong width, or a backend error.
    fn append_text_file(&self, table: &TableRef, path: &Path, dialect: &TextDialect)
    -> SinkResult<()>;

    /// # Errors
    /// Returns [`SinkErrorKind::NotFound`] if the table does not exist.
    fn table_stats(&self, table: &TableRef) -> SinkResult<TableStats>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Check that `batch` has exactly the columns and Arrow types of `schema`.
///
/// # Errors
/// Returns [`SinkErrorKind::SchemaMismatch`] naming the first difference.
pub fn check_batch_schema(schema: &TableSchema, batch: &RecordBatch) -> SinkResult<()> {
    let actual = batch.schema();
    if actual.fields().len() != schema.len() {
        return Err(SinkError::new(
            SinkErrorKind::SchemaMismatch,
            format!(
                "batch has {} columns, table has {}",
                actual.fields().len(),
                schema.len()
            ),
        ));
    }
    for (field, expected) in actual.fields().iter().zip(&schema.fields) {
        let expected_type = expected.column_type.arrow_type();
        if field.name() != &expected.name || field.data_type() != &expected_type {
            return Err(SinkError::new(
                SinkErrorKind::SchemaMismatch,
                format!(
                    "column {} {} does not match table column {} {}",
                    field.name(),
                    field.data_type(),
                    expected.name,
                    expected.column_type
                ),
            ));
        }
    }
    Ok(())
}

/// Parse a delimited text file into rows of optional cells.
///
/// Unquoted empty fields read as null. Every row must have `width` fields.
///
/// # Errors
/// Returns [`SinkErrorKind::InvalidInput`] on a malformed record, a width
/// mismatch, or a quoted newline the dialect does not allow.
pub fn read_text_rows(
    path: &Path,
    dialect: &TextDialect,
    width: usize,
) -> SinkResult<Vec<Vec<Option<String>>>> {
    let file = File::open(path).map_err(|e| SinkError::io(path.display(), &e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .escape(Some(dialect.escape))
        .double_quote(false)
        .flexible(false)
        .from_reader(BufReader::new(file));

    let invalid = |line: usize, msg: String| {
        SinkError::new(
            SinkErrorKind::InvalidInput,
            format!("{} record #{line}: {msg}", path.display()),
        )
    };

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| invalid(i + 1, e.to_string()))?;
        if i < dialect.skip_leading_rows {
            continue;
        }
        if record.len() != width {
            return Err(invalid(
                i + 1,
                format!("{} fields, table has {width}", record.len()),
            ));
        }
        let mut row = Vec::with_capacity(width);
        for field in &record {
            if !dialect.allow_quoted_newlines && field.contains(['\n', '\r']) {
                return Err(invalid(i + 1, "quoted newline not allowed".to_string()));
            }
            row.push((!field.is_empty()).then(|| field.to_string()));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Build a batch in `schema`'s layout from text rows, parsing typed columns
/// the way the transformer does.
///
/// # Errors
/// Returns [`SinkErrorKind::SchemaMismatch`] if a typed column cannot hold
/// its values, or [`SinkErrorKind::Internal`] if the batch cannot be built.
pub fn text_rows_to_batch(
    schema: &TableSchema,
    rows: &[Vec<Option<String>>],
) -> SinkResult<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    for (position, field) in schema.fields.iter().enumerate() {
        let cells: Vec<Option<String>> = rows
            .iter()
            .map(|row| row.get(position).cloned().flatten())
            .collect();
        let array: ArrayRef = match field.column_type {
            ColumnType::String => Arc::new(cells.into_iter().collect::<StringArray>()),
            other => {
                let text: Vec<String> = cells.into_iter().map(Option::unwrap_or_default).collect();
                coerce_column(&text, other).map_err(|e| {
                    SinkError::new(
                        SinkErrorKind::SchemaMismatch,
                        format!("column {}: {e}", field.name),
                    )
                })?
            }
        };
        arrays.push(array);
    }
    RecordBatch::try_new(schema.to_arrow(), arrays)
        .map_err(|e| SinkError::new(SinkErrorKind::Internal, format!("build batch: {e}")))
}
