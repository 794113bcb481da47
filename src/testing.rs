//! Fixtures for testing load runs.
//!
//! - [`TempCsv`]: a source file in its own temporary directory, written from
//!   rows, raw text or raw bytes, removed on drop
//! - [`rows_as_strings`] / [`column_values`]: read a table back out of a
//!   [`MemoryWarehouse`]
//! - [`test_config`]: a [`LoaderConfig`] whose scratch directory lives next
//!   to the source
//!
//! ```no_run
//! use std::sync::Arc;
//! use warehouse_loader::testing::{TempCsv, rows_as_strings, test_config};
//! use warehouse_loader::{Loader, MemoryWarehouse, TableRef};
//!
//! # fn main() -> anyhow::Result<()> {
//! let csv = TempCsv::from_rows(&["id", "name"], &[vec!["1", "ann"], vec!["2", "bo"]])?;
//! let table = TableRef::new("cat", "ds", "people");
//! let warehouse = MemoryWarehouse::new();
//! Loader::new(test_config(&csv, table.clone()), Arc::new(warehouse.clone())).run()?;
//! assert_eq!(rows_as_strings(&warehouse, &table).len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::config::LoaderConfig;
use crate::sink::{MemoryWarehouse, TableRef};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A delimited source file inside a private temporary directory.
pub struct TempCsv {
    dir: TempDir,
    path: PathBuf,
}

impl TempCsv {
    /// Write `header` and `rows` as comma-separated text, quoting where needed.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be written.
    pub fn from_rows<S: AsRef<str>>(header: &[&str], rows: &[Vec<S>]) -> Result<Self> {
        let (dir, path) = Self::allocate()?;
        let mut wtr = csv::WriterBuilder::new()
            .from_path(&path)
            .with_context(|| format!("create {}", path.display()))?;
        wtr.write_record(header).context("write header")?;
        for (i, row) in rows.iter().enumerate() {
            wtr.write_record(row.iter().map(AsRef::<str>::as_ref))
                .with_context(|| format!("write row #{}", i + 1))?;
        }
        wtr.flush()?;
        Ok(Self { dir, path })
    }

    /// Write `text` verbatim.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be written.
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_bytes(text.as_bytes())
    }

    /// Write raw `bytes`, which need not be valid UTF-8.
    ///
    /// # Errors
    /// Returns an error if the directory or the file cannot be written.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (dir, path) = Self::allocate()?;
        fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(Self { dir, path })
    }

    fn allocate() -> Result<(TempDir, PathBuf)> {
        let dir = TempDir::new().context("create temp dir")?;
        let path = dir.path().join("source.csv");
        Ok((dir, path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The temporary directory holding the file; removed with it.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Default configuration for loading `csv` into `table`, with the scratch
/// directory inside the fixture's temp dir.
#[must_use]
pub fn test_config(csv: &TempCsv, table: TableRef) -> LoaderConfig {
    let mut config = LoaderConfig::new(csv.path(), table);
    config.scratch_dir = csv.dir().join("cache_chunks");
    config
}

/// Every row of `table`, nulls rendered as empty strings. An absent table
/// reads as no rows.
#[must_use]
pub fn rows_as_strings(warehouse: &MemoryWarehouse, table: &TableRef) -> Vec<Vec<String>> {
    warehouse
        .rows(table)
        .unwrap_or_default()
        .into_iter()
        .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
        .collect()
}

/// Values of one column of `table`, by normalized column name.
#[must_use]
pub fn column_values(warehouse: &MemoryWarehouse, table: &TableRef, column: &str) -> Vec<Option<String>> {
    let Some(position) = warehouse
        .schema(table)
        .and_then(|s| s.fields.iter().position(|f| f.name == column))
    else {
        return Vec::new();
    };
    warehouse
        .rows(table)
        .unwrap_or_default()
        .into_iter()
        .map(|row| row.get(position).cloned().flatten())
        .collect()
}
