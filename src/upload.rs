//! Ordered upload of transformed chunks, with schema degradation.
//!
//! [`UploadSequencer::run`] walks the chunk results in ascending index order
//! on a single thread. Each non-empty chunk is appended through the typed
//! path until one typed append fails. What happens then is fixed by the
//! run's [`DegradePolicy`]:
//!
//! - [`DegradePolicy::ReplayAll`]: the table is recreated with the all-STRING
//!   schema, chunks `0..=i` are loaded again through the text path, and every
//!   later chunk goes straight to the text path. The typed path is never
//!   retried, so degradation happens at most once per run.
//! - [`DegradePolicy::Abort`]: the partially loaded table is dropped and the
//!   run fails.
//!
//! A failed text load is fatal under either policy.

use crate::error::LoadError;
use crate::fallback::{fallback_dialect, stage_batch};
use crate::lifecycle::TableLifecycle;
use crate::schema::TableSchema;
use crate::transform::ChunkBatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// What the upload stage does when a typed append fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradePolicy {
    /// Recreate the table as all-STRING and reload every chunk through the text path.
    #[default]
    ReplayAll,
    /// Drop the table and fail the run.
    Abort,
}

impl fmt::Display for DegradePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DegradePolicy::ReplayAll => "replay_all",
            DegradePolicy::Abort => "abort",
        })
    }
}

impl FromStr for DegradePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "replay_all" => Ok(DegradePolicy::ReplayAll),
            "abort" => Ok(DegradePolicy::Abort),
            other => Err(format!("unknown degrade policy {other:?} (expected replay_all or abort)")),
        }
    }
}

/// Counters describing what the upload stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    /// Chunks currently committed to the table.
    pub chunks_appended: usize,
    /// Chunks with no rows; never appended.
    pub chunks_empty: usize,
    /// Rows currently committed to the table.
    pub rows_appended: u64,
    /// Index of the chunk whose typed append failed, if any did.
    pub degraded_at: Option<usize>,
    /// Chunks reloaded through the text path after degradation.
    pub replayed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Typed,
    Degraded,
}

/// Single-threaded state machine appending chunk results in index order.
pub struct UploadSequencer<'a> {
    lifecycle: &'a TableLifecycle,
    typed_schema: TableSchema,
    policy: DegradePolicy,
    mode: Mode,
    summary: UploadSummary,
}

impl<'a> UploadSequencer<'a> {
    /// `typed_schema` is the schema the table was created with.
    #[must_use]
    pub fn new(lifecycle: &'a TableLifecycle, typed_schema: TableSchema, policy: DegradePolicy) -> Self {
        Self {
            lifecycle,
            typed_schema,
            policy,
            mode: Mode::Typed,
            summary: UploadSummary::default(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> &UploadSummary {
        &self.summary
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.mode == Mode::Degraded
    }

    /// Upload every chunk result, `results[i]` being chunk `i` (`None` when empty).
    ///
    /// # Errors
    /// Returns [`LoadError::DegradeAborted`] when a typed append fails under
    /// [`DegradePolicy::Abort`], [`LoadError::Table`] if the table cannot be
    /// recreated for degradation, or [`LoadError::FallbackUpload`] if a text
    /// load fails. Chunks after the failing one are not processed.
    pub fn run(&mut self, results: &[Option<ChunkBatch>]) -> Result<(), LoadError> {
        for (index, result) in results.iter().enumerate() {
            let Some(chunk) = result else {
                self.summary.chunks_empty += 1;
                info!(chunk = index, "empty chunk skipped");
                continue;
            };
            match self.mode {
                Mode::Degraded => self.append_text(index, chunk)?,
                Mode::Typed => self.append_typed(index, chunk, results)?,
            }
        }
        Ok(())
    }

    fn append_typed(
        &mut self,
        index: usize,
        chunk: &ChunkBatch,
        results: &[Option<ChunkBatch>],
    ) -> Result<(), LoadError> {
        let lifecycle = self.lifecycle;
        let table = lifecycle.table();
        let error = match lifecycle.sink().append_batch(table, &chunk.batch) {
            Ok(()) => {
                self.record(index, chunk, "typed");
                return Ok(());
            }
            Err(e) => e,
        };
        warn!(chunk = index, %table, error = %error, policy = %self.policy, "typed append failed");

        match self.policy {
            DegradePolicy::Abort => {
                if let Err(e) = lifecycle.drop_table() {
                    warn!(%table, error = %e, "could not drop partially loaded table");
                }
                self.summary.chunks_appended = 0;
                self.summary.rows_appended = 0;
                Err(LoadError::DegradeAborted {
                    index,
                    source: error,
                })
            }
            DegradePolicy::ReplayAll => self.degrade(index, results),
        }
    }

    /// Recreate the table as all-STRING and reload chunks `0..=failed` as text.
    fn degrade(&mut self, failed: usize, results: &[Option<ChunkBatch>]) -> Result<(), LoadError> {
        self.lifecycle.recreate_table(&self.typed_schema.degraded())?;
        self.mode = Mode::Degraded;
        self.summary.degraded_at = Some(failed);
        self.summary.chunks_appended = 0;
        self.summary.rows_appended = 0;
        warn!(chunk = failed, table = %self.lifecycle.table(), "table degraded to all-STRING schema; replaying earlier chunks");

        for (index, result) in results.iter().enumerate().take(failed + 1) {
            if let Some(chunk) = result {
                self.append_text(index, chunk)?;
                if index < failed {
                    self.summary.replayed += 1;
                }
            }
        }
        Ok(())
    }

    fn append_text(&mut self, index: usize, chunk: &ChunkBatch) -> Result<(), LoadError> {
        let fallback = |source: anyhow::Error| LoadError::FallbackUpload { index, source };
        let staged = stage_batch(&chunk.batch).map_err(fallback)?;
        self.lifecycle
            .sink()
            .append_text_file(self.lifecycle.table(), staged.path(), &fallback_dialect())
            .map_err(|e| fallback(anyhow::Error::new(e)))?;
        self.record(index, chunk, "text");
        Ok(())
    }

    fn record(&mut self, index: usize, chunk: &ChunkBatch, path: &'static str) {
        self.summary.chunks_appended += 1;
        self.summary.rows_appended += chunk.num_rows() as u64;
        info!(chunk = index, rows = chunk.num_rows(), path, "chunk appended");
    }
}
