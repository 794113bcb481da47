//! In-memory warehouse for tests and dry runs.
//!
//! Tables hold their rows rendered as text, so assertions compare plain
//! strings whatever the column types. Every successful append is recorded in
//! an append log, which is how tests observe upload order.
//!
//! Failure injection:
//! - [`MemoryWarehouse::fail_typed_append_at`]: the n-th typed append call fails
//! - [`MemoryWarehouse::fail_all_typed_appends`]: every typed append fails
//! - [`MemoryWarehouse::fail_text_loads`]: every text-file load fails
//! - [`MemoryWarehouse::fail_dataset_creation`]: dataset creation fails

use super::{
    DatasetRef, SinkError, SinkErrorKind, SinkResult, TableRef, TableStats, TextDialect,
    WarehouseSink, check_batch_schema, read_text_rows, text_rows_to_batch,
};
use crate::schema::TableSchema;
use crate::values::render_cell;
use arrow::record_batch::RecordBatch;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

type Row = Vec<Option<String>>;

/// Which load path produced an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendKind {
    Typed,
    Text,
}

/// One successful append, in the order the sink received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRecord {
    pub table: TableRef,
    pub kind: AppendKind,
    pub rows: usize,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
    num_bytes: u64,
}

#[derive(Debug, Default)]
struct Faults {
    typed_calls: usize,
    typed_fail_at: HashSet<usize>,
    all_typed: bool,
    text: bool,
    dataset: bool,
}

#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    datasets: Arc<Mutex<HashMap<DatasetRef, String>>>,
    tables: Arc<Mutex<HashMap<TableRef, MemoryTable>>>,
    log: Arc<Mutex<Vec<AppendRecord>>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryWarehouse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make typed append call number `call` (0-based, counted over the
    /// warehouse's lifetime) fail with a schema mismatch.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the fault settings is poisoned.
    pub fn fail_typed_append_at(&self, call: usize) {
        self.faults
            .lock()
            .expect("faults mutex poisoned")
            .typed_fail_at
            .insert(call);
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the fault settings is poisoned.
    pub fn fail_all_typed_appends(&self) {
        self.faults.lock().expect("faults mutex poisoned").all_typed = true;
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the fault settings is poisoned.
    pub fn fail_text_loads(&self) {
        self.faults.lock().expect("faults mutex poisoned").text = true;
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the fault settings is poisoned.
    pub fn fail_dataset_creation(&self) {
        self.faults.lock().expect("faults mutex poisoned").dataset = true;
    }

    /// Number of typed append calls received so far, failed ones included.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the fault settings is poisoned.
    #[must_use]
    pub fn typed_append_calls(&self) -> usize {
        self.faults.lock().expect("faults mutex poisoned").typed_calls
    }

    /// Rows of `table` rendered as text, `None` for null cells.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the tables is poisoned.
    #[must_use]
    pub fn rows(&self, table: &TableRef) -> Option<Vec<Row>> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .get(table)
            .map(|t| t.rows.clone())
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the tables is poisoned.
    #[must_use]
    pub fn schema(&self, table: &TableRef) -> Option<TableSchema> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .get(table)
            .map(|t| t.schema.clone())
    }

    /// Location the dataset was created in.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the datasets is poisoned.
    #[must_use]
    pub fn dataset_location(&self, dataset: &DatasetRef) -> Option<String> {
        self.datasets
            .lock()
            .expect("datasets mutex poisoned")
            .get(dataset)
            .cloned()
    }

    /// Every successful append so far, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the append log is poisoned.
    #[must_use]
    pub fn appends(&self) -> Vec<AppendRecord> {
        self.log.lock().expect("append log mutex poisoned").clone()
    }

    /// # Panics
    ///
    /// Panics if the mutex protecting the append log is poisoned.
    pub fn clear_appends(&self) {
        self.log.lock().expect("append log mutex poisoned").clear();
    }

    fn table_schema(&self, table: &TableRef) -> SinkResult<TableSchema> {
        self.schema(table)
            .ok_or_else(|| not_found(format!("table {table} not found")))
    }

    fn commit(&self, table: &TableRef, kind: AppendKind, rows: Vec<Row>) -> SinkResult<()> {
        let count = rows.len();
        let bytes: u64 = rows
            .iter()
            .flatten()
            .flatten()
            .map(|cell| cell.len() as u64)
            .sum();
        {
            let mut tables = self.tables.lock().expect("tables mutex poisoned");
            let Some(stored) = tables.get_mut(table) else {
                return Err(not_found(format!("table {table} not found")));
            };
            stored.rows.extend(rows);
            stored.num_bytes += bytes;
        }
        self.log
            .lock()
            .expect("append log mutex poisoned")
            .push(AppendRecord {
                table: table.clone(),
                kind,
                rows: count,
            });
        Ok(())
    }
}

impl WarehouseSink for MemoryWarehouse {
    fn dataset_exists(&self, dataset: &DatasetRef) -> SinkResult<bool> {
        Ok(self
            .datasets
            .lock()
            .expect("datasets mutex poisoned")
            .contains_key(dataset))
    }

    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> SinkResult<()> {
        if self.faults.lock().expect("faults mutex poisoned").dataset {
            return Err(SinkError::new(
                SinkErrorKind::ServiceUnavailable,
                format!("injected failure creating dataset {dataset}"),
            ));
        }
        let mut datasets = self.datasets.lock().expect("datasets mutex poisoned");
        if datasets.contains_key(dataset) {
            return Err(SinkError::new(
                SinkErrorKind::AlreadyExists,
                format!("dataset {dataset} already exists"),
            ));
        }
        datasets.insert(dataset.clone(), location.to_string());
        Ok(())
    }

    fn table_exists(&self, table: &TableRef) -> SinkResult<bool> {
        Ok(self
            .tables
            .lock()
            .expect("tables mutex poisoned")
            .contains_key(table))
    }

    fn delete_table(&self, table: &TableRef) -> SinkResult<()> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("table {table} not found")))
    }

    fn create_table(&self, table: &TableRef, schema: &TableSchema) -> SinkResult<()> {
        schema
            .validate()
            .map_err(|e| SinkError::new(SinkErrorKind::InvalidInput, e.to_string()))?;
        if !self.dataset_exists(&table.dataset_ref())? {
            return Err(not_found(format!(
                "dataset {} not found",
                table.dataset_ref()
            )));
        }
        let mut tables = self.tables.lock().expect("tables mutex poisoned");
        if tables.contains_key(table) {
            return Err(SinkError::new(
                SinkErrorKind::AlreadyExists,
                format!("table {table} already exists"),
            ));
        }
        tables.insert(
            table.clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
                num_bytes: 0,
            },
        );
        Ok(())
    }

    fn append_batch(&self, table: &TableRef, batch: &RecordBatch) -> SinkResult<()> {
        let schema = self.table_schema(table)?;
        {
            let mut faults = self.faults.lock().expect("faults mutex poisoned");
            let call = faults.typed_calls;
            faults.typed_calls += 1;
            if faults.all_typed || faults.typed_fail_at.contains(&call) {
                return Err(SinkError::new(
                    SinkErrorKind::SchemaMismatch,
                    format!("injected failure on typed append #{call} to {table}"),
                ));
            }
        }
        check_batch_schema(&schema, batch)?;
        self.commit(table, AppendKind::Typed, render_rows(batch)?)
    }

    fn append_text_file(
        &self,
        table: &TableRef,
        path: &Path,
        dialect: &TextDialect,
    ) -> SinkResult<()> {
        let schema = self.table_schema(table)?;
        if self.faults.lock().expect("faults mutex poisoned").text {
            return Err(SinkError::new(
                SinkErrorKind::ServiceUnavailable,
                format!("injected failure loading {} into {table}", path.display()),
            ));
        }
        let rows = read_text_rows(path, dialect, schema.len())?;
        let batch = text_rows_to_batch(&schema, &rows)?;
        self.commit(table, AppendKind::Text, render_rows(&batch)?)
    }

    fn table_stats(&self, table: &TableRef) -> SinkResult<TableStats> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .get(table)
            .map(|t| TableStats {
                num_rows: t.rows.len() as u64,
                num_bytes: t.num_bytes,
            })
            .ok_or_else(|| not_found(format!("table {table} not found")))
    }
}

fn not_found(message: String) -> SinkError {
    SinkError::new(SinkErrorKind::NotFound, message)
}

fn render_rows(batch: &RecordBatch) -> SinkResult<Vec<Row>> {
    (0..batch.num_rows())
        .map(|row| {
            batch
                .columns()
                .iter()
                .map(|col| render_cell(col.as_ref(), row))
                .collect::<anyhow::Result<Row>>()
                .map_err(|e| SinkError::new(SinkErrorKind::InvalidInput, format!("{e:#}")))
        })
        .collect()
}
