//! Chunk segment cache for large sources.
//!
//! The source is read once, sequentially, and each `window`-row batch is
//! written to its own Parquet segment (`part-00000.parquet`, ...) in a
//! scratch directory. Transform workers then load a chunk by opening one
//! segment instead of rescanning the source up to the chunk's offset.
//!
//! Segments keep every column as nullable UTF-8 text: typing happens later,
//! in the transformer, exactly as for uncached reads.

use crate::source::{ChunkSource, CsvSource, TextBatch};
use anyhow::{Context, Result, bail, ensure};
use arrow::array::{ArrayRef, AsArray, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{File, create_dir_all, remove_dir_all};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A scratch directory owned by one run.
///
/// [`ScratchDir::create`] wipes whatever is at the path and recreates it; the
/// directory is removed again when the value is dropped, whether the run
/// succeeded or not. Removal failures are logged and otherwise ignored.
/// Two runs must not share a scratch path.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// # Errors
    /// Returns an error if the old directory cannot be removed or the new one created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "wiped stale scratch directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("wipe scratch dir {}", path.display()));
            }
        }
        create_dir_all(&path).with_context(|| format!("mkdir -p {}", path.display()))?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove scratch directory"),
        }
    }
}

/// Path of segment `index` inside `dir`.
#[must_use]
pub fn segment_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("part-{index:05}.parquet"))
}

/// Random access to chunks materialized as Parquet segments.
#[derive(Debug)]
pub struct SegmentCache {
    dir: PathBuf,
    headers: Vec<String>,
    segments: usize,
}

impl SegmentCache {
    /// Read `source` once and write one segment per `window` rows into `scratch`.
    ///
    /// # Errors
    /// Returns an error if the source cannot be read or a segment cannot be written.
    pub fn materialize(source: &CsvSource, window: usize, scratch: &ScratchDir) -> Result<Self> {
        let headers = source.headers()?;
        let schema = text_schema(&headers);
        let dir = scratch.path().to_path_buf();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let segments = source.for_each_window(window, |index, batch| {
            let path = segment_path(&dir, index);
            write_segment(&path, &schema, &batch, props.clone())
                .with_context(|| format!("write cache segment {}", path.display()))?;
            debug!(segment = index, rows = batch.num_rows(), "cache segment written");
            Ok(())
        })?;

        info!(segments, dir = %dir.display(), "chunk cache materialized");
        Ok(Self {
            dir,
            headers,
            segments,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ChunkSource for SegmentCache {
    fn num_chunks(&self) -> usize {
        self.segments
    }

    fn read_chunk(&self, index: usize) -> Result<TextBatch> {
        if index >= self.segments {
            bail!("chunk {index} out of range ({} cached segments)", self.segments);
        }
        let path = segment_path(&self.dir, index);
        read_segment(&path, &self.headers)
            .with_context(|| format!("read cache segment {}", path.display()))
    }
}

fn text_schema(headers: &[String]) -> SchemaRef {
    Arc::new(Schema::new(
        headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

fn write_segment(
    path: &Path,
    schema: &SchemaRef,
    batch: &TextBatch,
    props: WriterProperties,
) -> Result<()> {
    let arrays: Vec<ArrayRef> = batch
        .columns
        .iter()
        .map(|col| Arc::new(StringArray::from_iter_values(col)) as ArrayRef)
        .collect();
    let record = RecordBatch::try_new(Arc::clone(schema), arrays).context("build segment batch")?;

    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, Arc::clone(schema), Some(props)).context("create ArrowWriter")?;
    writer.write(&record).context("write segment batch")?;
    writer.close().context("close ArrowWriter")?;
    Ok(())
}

fn read_segment(path: &Path, headers: &[String]) -> Result<TextBatch> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("open ParquetRecordBatchReader")?
        .with_batch_size(64 * 1024)
        .build()
        .context("build ParquetRecordBatchReader")?;

    let mut out = TextBatch::new(headers.to_vec());
    while let Some(batch) = reader.next().transpose().context("read next batch")? {
        ensure!(
            batch.num_columns() == headers.len(),
            "segment has {} columns, expected {}",
            batch.num_columns(),
            headers.len()
        );
        for (column, array) in out.columns.iter_mut().zip(batch.columns()) {
            let Some(strings) = array.as_string_opt::<i32>() else {
                bail!("segment column is {}, expected Utf8", array.data_type());
            };
            column.extend(strings.iter().map(|v| v.unwrap_or_default().to_string()));
        }
    }
    Ok(out)
}
