//! Source access: sequential reads of the delimited file and random access
//! to a chunk by index.
//!
//! This module provides:
//! - **Raw text batches**: [`TextBatch`], columns of untyped cell text
//! - **Source file access**: [`CsvSource`] for the header, a bounded sample,
//!   the row count, positional windows and a single sequential pass
//! - **Chunk planning**: [`ChunkPlan`], contiguous row windows over the data region
//! - **Random access by chunk index**: the [`ChunkSource`] trait, implemented
//!   here by [`WindowedCsv`] (re-reads the file) and by
//!   [`SegmentCache`](crate::cache::SegmentCache) (reads one cache segment)
//!
//! # Design notes
//! - Chunking is **row-count based** (header excluded), not byte-range based.
//! - The reader is strict: a record with the wrong number of fields is a
//!   source read failure, not something to skip.

use anyhow::{Context, Result, bail, ensure};
use csv::{ByteRecord, Reader, ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Rows held column-wise as raw cell text, with the header they were read under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextBatch {
    pub headers: Vec<String>,
    /// One vector per header, each `num_rows()` long.
    pub columns: Vec<Vec<String>>,
}

impl TextBatch {
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        let columns = vec![Vec::new(); headers.len()];
        Self { headers, columns }
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Append one record; its width must match the header.
    ///
    /// # Errors
    /// Returns an error when the record has a different number of fields.
    pub fn push_record(&mut self, record: &StringRecord) -> Result<()> {
        ensure!(
            record.len() == self.headers.len(),
            "record has {} fields, header has {}",
            record.len(),
            self.headers.len()
        );
        for (column, field) in self.columns.iter_mut().zip(record.iter()) {
            column.push(field.to_string());
        }
        Ok(())
    }
}

/// A delimited source file with one header row.
#[derive(Clone, Debug)]
pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvSource {
    /// Open a source and check that its header can be read.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, is not valid delimited
    /// UTF-8 text, or has an empty header.
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let source = Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
        };
        let headers = source.headers()?;
        ensure!(
            !headers.is_empty(),
            "{} has no header columns",
            source.path.display()
        );
        Ok(source)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<Reader<BufReader<File>>> {
        let f = File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        Ok(ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(false)
            .from_reader(BufReader::new(f)))
    }

    /// The header row, verbatim.
    ///
    /// # Errors
    /// Returns an error if the header cannot be read.
    pub fn headers(&self) -> Result<Vec<String>> {
        let mut rdr = self.reader()?;
        let headers = rdr
            .headers()
            .with_context(|| format!("read header of {}", self.path.display()))?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    /// Read up to `max_rows` data rows from the start of the file.
    ///
    /// # Errors
    /// Returns an error on I/O failure or a malformed record.
    pub fn read_sample(&self, max_rows: usize) -> Result<TextBatch> {
        self.read_window(0, max_rows as u64)
    }

    /// Count data rows (header excluded) with one full pass.
    ///
    /// # Errors
    /// Returns an error on I/O failure or a malformed record.
    pub fn count_rows(&self) -> Result<u64> {
        let mut rdr = self.reader()?;
        let mut record = ByteRecord::new();
        let mut total: u64 = 0;
        while rdr
            .read_byte_record(&mut record)
            .with_context(|| format!("count rows of {} at record #{}", self.path.display(), total + 1))?
        {
            total += 1;
        }
        Ok(total)
    }

    /// Read data rows `[start, end)` by re-scanning from the top of the file.
    ///
    /// Skipped rows are read as raw bytes without UTF-8 validation, so the
    /// cost is one sequential scan up to `end`.
    ///
    /// # Errors
    /// Returns an error on I/O failure or a malformed record.
    pub fn read_window(&self, start: u64, end: u64) -> Result<TextBatch> {
        let mut rdr = self.reader()?;
        let headers = rdr
            .headers()
            .with_context(|| format!("read header of {}", self.path.display()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut batch = TextBatch::new(headers);

        let mut skip = ByteRecord::new();
        for i in 0..start {
            if !rdr
                .read_byte_record(&mut skip)
                .with_context(|| format!("skip record #{} in {}", i + 1, self.path.display()))?
            {
                return Ok(batch);
            }
        }

        let mut record = StringRecord::new();
        for i in start..end {
            if !rdr
                .read_record(&mut record)
                .with_context(|| format!("parse record #{} in {}", i + 1, self.path.display()))?
            {
                break;
            }
            batch
                .push_record(&record)
                .with_context(|| format!("record #{} in {}", i + 1, self.path.display()))?;
        }
        Ok(batch)
    }

    /// One sequential pass over the whole file, handing each consecutive
    /// `window`-row batch to `sink` together with its index.
    ///
    /// Returns the number of batches produced. The final batch may be short;
    /// an empty file produces none.
    ///
    /// # Errors
    /// Returns an error on I/O failure, a malformed record, or an error from `sink`.
    pub fn for_each_window<F>(&self, window: usize, mut sink: F) -> Result<usize>
    where
        F: FnMut(usize, TextBatch) -> Result<()>,
    {
        ensure!(window > 0, "window size must be positive");
        let mut rdr = self.reader()?;
        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("read header of {}", self.path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut index = 0usize;
        let mut rows_read: u64 = 0;
        let mut batch = TextBatch::new(headers.clone());
        let mut record = StringRecord::new();
        while rdr
            .read_record(&mut record)
            .with_context(|| format!("parse record #{} in {}", rows_read + 1, self.path.display()))?
        {
            rows_read += 1;
            batch.push_record(&record)?;
            if batch.num_rows() == window {
                let full = std::mem::replace(&mut batch, TextBatch::new(headers.clone()));
                sink(index, full)?;
                index += 1;
            }
        }
        if !batch.is_empty() {
            sink(index, batch)?;
            index += 1;
        }
        Ok(index)
    }
}

/// Contiguous row windows `(start, end)` (0-based, end-exclusive) covering
/// every data row exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_rows: u64,
    pub window: usize,
    pub ranges: Vec<(u64, u64)>,
}

impl ChunkPlan {
    /// Split `total_rows` into `ceil(total_rows / window)` windows.
    /// A `window` of zero is treated as one.
    #[must_use]
    pub fn new(total_rows: u64, window: usize) -> Self {
        let w = window.max(1) as u64;
        let chunks = total_rows.div_ceil(w);
        let ranges = (0..chunks)
            .map(|i| (i * w, ((i + 1) * w).min(total_rows)))
            .collect();
        Self {
            total_rows,
            window: window.max(1),
            ranges,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[must_use]
    pub fn range(&self, index: usize) -> Option<(u64, u64)> {
        self.ranges.get(index).copied()
    }

    /// Rows per chunk, in chunk order.
    #[must_use]
    pub fn row_counts(&self) -> Vec<u64> {
        self.ranges.iter().map(|&(s, e)| e - s).collect()
    }
}

/// Random access to the rows of one chunk.
///
/// Implementations are shared read-only across transform workers.
pub trait ChunkSource: Send + Sync {
    fn num_chunks(&self) -> usize;

    /// Load chunk `index` as raw text.
    ///
    /// # Errors
    /// Returns an error if the index is out of range or the read fails.
    fn read_chunk(&self, index: usize) -> Result<TextBatch>;
}

/// Chunk access by positional re-read of the source file.
///
/// Each read rescans the file from the top, which is fine for small sources;
/// large ones go through [`SegmentCache`](crate::cache::SegmentCache) instead.
#[derive(Clone, Debug)]
pub struct WindowedCsv {
    source: CsvSource,
    plan: ChunkPlan,
}

impl WindowedCsv {
    #[must_use]
    pub fn new(source: CsvSource, plan: ChunkPlan) -> Self {
        Self { source, plan }
    }
}

impl ChunkSource for WindowedCsv {
    fn num_chunks(&self) -> usize {
        self.plan.len()
    }

    fn read_chunk(&self, index: usize) -> Result<TextBatch> {
        let Some((start, end)) = self.plan.range(index) else {
            bail!("chunk {index} out of range ({} chunks)", self.plan.len());
        };
        self.source
            .read_window(start, end)
            .with_context(|| format!("read chunk {index} (rows {start}..{end})"))
    }
}
