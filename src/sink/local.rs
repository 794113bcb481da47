//! Directory-backed warehouse.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<catalog>/<dataset>/_dataset.json        {"location": "..."}
//! <root>/<catalog>/<dataset>/<table>/_schema.json  TableSchema
//! <root>/<catalog>/<dataset>/<table>/part-00000.parquet
//! ```
//!
//! Each append writes one Snappy-compressed Parquet part. Text loads are
//! parsed with their dialect and stored as parts of the table's schema.
//! Table statistics come from the Parquet footers and the part file sizes.

use super::{
    DatasetRef, SinkError, SinkErrorKind, SinkResult, TableRef, TableStats, TextDialect,
    WarehouseSink, check_batch_schema, read_text_rows, text_rows_to_batch,
};
use crate::cache::segment_path;
use crate::schema::TableSchema;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const DATASET_META: &str = "_dataset.json";
const SCHEMA_FILE: &str = "_schema.json";

#[derive(Debug, Serialize, Deserialize)]
struct DatasetMeta {
    location: String,
}

/// A warehouse stored as plain files under one root directory.
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: PathBuf,
}

impl LocalWarehouse {
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> SinkResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| SinkError::io(root.display(), &e))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset: &DatasetRef) -> SinkResult<PathBuf> {
        check_component(&dataset.catalog)?;
        check_component(&dataset.dataset)?;
        Ok(self.root.join(&dataset.catalog).join(&dataset.dataset))
    }

    fn table_dir(&self, table: &TableRef) -> SinkResult<PathBuf> {
        check_component(&table.table)?;
        Ok(self.dataset_dir(&table.dataset_ref())?.join(&table.table))
    }

    /// Schema stored for `table`.
    ///
    /// # Errors
    /// Returns [`SinkErrorKind::NotFound`] if the table does not exist.
    pub fn schema(&self, table: &TableRef) -> SinkResult<TableSchema> {
        let path = self.table_dir(table)?.join(SCHEMA_FILE);
        let text = fs::read_to_string(&path).map_err(|e| SinkError::io(path.display(), &e))?;
        serde_json::from_str(&text)
            .map_err(|e| SinkError::new(SinkErrorKind::Internal, format!("{}: {e}", path.display())))
    }

    /// Part files of `table`, in append order.
    ///
    /// # Errors
    /// Returns [`SinkErrorKind::NotFound`] if the table does not exist.
    pub fn parts(&self, table: &TableRef) -> SinkResult<Vec<PathBuf>> {
        let dir = self.table_dir(table)?;
        let mut parts: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| SinkError::io(dir.display(), &e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("part-") && n.ends_with(".parquet"))
            })
            .collect();
        parts.sort();
        Ok(parts)
    }

    /// Every stored batch of `table`, in append order.
    ///
    /// # Errors
    /// Returns an error if the table does not exist or a part cannot be read.
    pub fn read_batches(&self, table: &TableRef) -> SinkResult<Vec<RecordBatch>> {
        let mut out = Vec::new();
        for part in self.parts(table)? {
            let file = File::open(&part).map_err(|e| SinkError::io(part.display(), &e))?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .and_then(|b| b.with_batch_size(64 * 1024).build())
                .map_err(|e| internal(&part, e))?;
            for batch in reader {
                out.push(batch.map_err(|e| internal(&part, e))?);
            }
        }
        Ok(out)
    }

    fn write_part(&self, table: &TableRef, batch: &RecordBatch) -> SinkResult<()> {
        let index = self.parts(table)?.len();
        let path = segment_path(&self.table_dir(table)?, index);
        let file = File::create(&path).map_err(|e| SinkError::io(path.display(), &e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer =
            ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(|e| internal(&path, e))?;
        writer.write(batch).map_err(|e| internal(&path, e))?;
        writer.close().map_err(|e| internal(&path, e))?;
        debug!(part = %path.display(), rows = batch.num_rows(), "part written");
        Ok(())
    }
}

impl WarehouseSink for LocalWarehouse {
    fn dataset_exists(&self, dataset: &DatasetRef) -> SinkResult<bool> {
        Ok(self.dataset_dir(dataset)?.join(DATASET_META).is_file())
    }

    fn create_dataset(&self, dataset: &DatasetRef, location: &str) -> SinkResult<()> {
        if self.dataset_exists(dataset)? {
            return Err(SinkError::new(
                SinkErrorKind::AlreadyExists,
                format!("dataset {dataset} already exists"),
            ));
        }
        let dir = self.dataset_dir(dataset)?;
        fs::create_dir_all(&dir).map_err(|e| SinkError::io(dir.display(), &e))?;
        let meta = serde_json::to_string_pretty(&DatasetMeta {
            location: location.to_string(),
        })
        .map_err(|e| SinkError::new(SinkErrorKind::Internal, e.to_string()))?;
        let path = dir.join(DATASET_META);
        fs::write(&path, meta).map_err(|e| SinkError::io(path.display(), &e))
    }

    fn table_exists(&self, table: &TableRef) -> SinkResult<bool> {
        Ok(self.table_dir(table)?.join(SCHEMA_FILE).is_file())
    }

    fn delete_table(&self, table: &TableRef) -> SinkResult<()> {
        let dir = self.table_dir(table)?;
        fs::remove_dir_all(&dir).map_err(|e| SinkError::io(dir.display(), &e))
    }

    fn create_table(&self, table: &TableRef, schema: &TableSchema) -> SinkResult<()> {
        schema
            .validate()
            .map_err(|e| SinkError::new(SinkErrorKind::InvalidInput, e.to_string()))?;
        if !self.dataset_exists(&table.dataset_ref())? {
            return Err(SinkError::new(
                SinkErrorKind::NotFound,
                format!("dataset {} not found", table.dataset_ref()),
            ));
        }
        let dir = self.table_dir(table)?;
        fs::create_dir(&dir).map_err(|e| SinkError::io(dir.display(), &e))?;
        let text = serde_json::to_string_pretty(schema)
            .map_err(|e| SinkError::new(SinkErrorKind::Internal, e.to_string()))?;
        let path = dir.join(SCHEMA_FILE);
        fs::write(&path, text).map_err(|e| SinkError::io(path.display(), &e))
    }

    fn append_batch(&self, table: &TableRef, batch: &RecordBatch) -> SinkResult<()> {
        let schema = self.schema(table)?;
        check_batch_schema(&schema, batch)?;
        self.write_part(table, batch)
    }

    fn append_text_file(
        &self,
        table: &TableRef,
        path: &Path,
        dialect: &TextDialect,
    ) -> SinkResult<()> {
        let schema = self.schema(table)?;
        let rows = read_text_rows(path, dialect, schema.len())?;
        let batch = text_rows_to_batch(&schema, &rows)?;
        self.write_part(table, &batch)
    }

    fn table_stats(&self, table: &TableRef) -> SinkResult<TableStats> {
        let mut stats = TableStats::default();
        for part in self.parts(table)? {
            let file = File::open(&part).map_err(|e| SinkError::io(part.display(), &e))?;
            let bytes = file
                .metadata()
                .map_err(|e| SinkError::io(part.display(), &e))?
                .len();
            let reader = SerializedFileReader::new(file).map_err(|e| internal(&part, e))?;
            let rows = reader.metadata().file_metadata().num_rows();
            stats.num_rows += u64::try_from(rows).unwrap_or_default();
            stats.num_bytes += bytes;
        }
        Ok(stats)
    }
}

/// Reject identifiers that would escape their parent directory.
fn check_component(name: &str) -> SinkResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(SinkError::new(
            SinkErrorKind::InvalidInput,
            format!("invalid identifier {name:?}"),
        ));
    }
    Ok(())
}

fn internal(path: &Path, err: impl std::fmt::Display) -> SinkError {
    SinkError::new(SinkErrorKind::Internal, format!("{}: {err}", path.display()))
}
