//! Run configuration.
//!
//! [`LoaderConfig`] is the one context object a run is built from. Every
//! field has a default, so a JSON file only needs the values it changes:
//!
//! ```json
//! {
//!   "source_path": "exports/calls.csv",
//!   "table": { "catalog": "analytics", "dataset": "raw", "table": "calls" },
//!   "location": "US",
//!   "degrade_policy": "abort"
//! }
//! ```

use crate::error::LoadError;
use crate::infer::DEFAULT_FORCED_STRING_TERMS;
use crate::sink::TableRef;
use crate::upload::DegradePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_ROWS: usize = 500_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SAMPLE_ROWS: usize = 10_000;
pub const DEFAULT_CACHE_THRESHOLD_ROWS: u64 = 1_000_000;
pub const DEFAULT_SCRATCH_DIR: &str = "./cache_chunks";
pub const DEFAULT_LOCATION: &str = "US";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Delimited source file with one header row.
    pub source_path: PathBuf,
    pub table: TableRef,
    /// Location the dataset is created in when it does not exist yet.
    pub location: String,
    /// Rows per chunk.
    pub chunk_rows: usize,
    /// Concurrent transform workers.
    pub workers: usize,
    /// Rows read for type inference.
    pub sample_rows: usize,
    /// Sources with more rows than this are split into a segment cache first.
    pub cache_threshold_rows: u64,
    pub scratch_dir: PathBuf,
    pub degrade_policy: DegradePolicy,
    /// Name fragments that force a column to STRING.
    pub forced_string_terms: Vec<String>,
    pub delimiter: char,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            table: TableRef::default(),
            location: DEFAULT_LOCATION.to_string(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            workers: DEFAULT_WORKERS,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            cache_threshold_rows: DEFAULT_CACHE_THRESHOLD_ROWS,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            degrade_policy: DegradePolicy::default(),
            forced_string_terms: DEFAULT_FORCED_STRING_TERMS
                .iter()
                .map(ToString::to_string)
                .collect(),
            delimiter: ',',
        }
    }
}

impl LoaderConfig {
    /// Defaults for everything but the source and the target table.
    pub fn new(source_path: impl Into<PathBuf>, table: TableRef) -> Self {
        Self {
            source_path: source_path.into(),
            table,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
    }

    /// The delimiter as the single byte the CSV reader expects.
    ///
    /// # Errors
    /// Returns [`LoadError::Config`] for a non-ASCII delimiter.
    pub fn delimiter_byte(&self) -> Result<u8, LoadError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| LoadError::Config(format!("delimiter {:?} is not ASCII", self.delimiter)))
    }

    /// Reject values no run can work with.
    ///
    /// # Errors
    /// Returns [`LoadError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |msg: &str| Err(LoadError::Config(msg.to_string()));
        if self.source_path.as_os_str().is_empty() {
            return invalid("source_path is not set");
        }
        if !self.table.is_complete() {
            return Err(LoadError::Config(format!(
                "table {:?} must name catalog, dataset and table",
                self.table.to_string()
            )));
        }
        if self.chunk_rows == 0 {
            return invalid("chunk_rows must be positive");
        }
        if self.workers == 0 {
            return invalid("workers must be positive");
        }
        if self.sample_rows == 0 {
            return invalid("sample_rows must be positive");
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return invalid("scratch_dir is not set");
        }
        self.check_scratch_dir()?;
        self.delimiter_byte().map(|_| ())
    }

    /// The scratch directory is wiped at the start of a cached run, so it must
    /// not contain the working directory or the source file.
    fn check_scratch_dir(&self) -> Result<(), LoadError> {
        let scratch = resolve(&self.scratch_dir);
        if let Ok(cwd) = std::env::current_dir()
            && resolve(&cwd).starts_with(&scratch)
        {
            return Err(LoadError::Config(format!(
                "scratch_dir {} contains the working directory",
                self.scratch_dir.display()
            )));
        }
        if resolve(&self.source_path).starts_with(&scratch) {
            return Err(LoadError::Config(format!(
                "scratch_dir {} contains the source file {}",
                self.scratch_dir.display(),
                self.source_path.display()
            )));
        }
        Ok(())
    }
}

/// Canonical form of `path` when it exists, its absolute form otherwise.
fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
