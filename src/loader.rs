//! End-to-end load run.
//!
//! [`Loader::run`] drives one run through its phases:
//!
//! 1. open the source and infer column types from a sample
//! 2. count rows and plan chunks
//! 3. ensure the dataset, recreate the table with the typed schema
//! 4. split large sources into a segment cache
//! 5. transform every chunk on the worker pool
//! 6. upload results in chunk order, degrading if a typed append fails
//! 7. read final table statistics
//!
//! Any error ends the run; the caller gets a [`RunFailure`] with the elapsed
//! time and the number of chunks the table held at that point.

use crate::cache::{ScratchDir, SegmentCache};
use crate::config::LoaderConfig;
use crate::error::{LoadError, RunFailure};
use crate::infer::TypeInferencer;
use crate::lifecycle::TableLifecycle;
use crate::pool::{PoolError, WorkerPool};
use crate::schema::{ColumnTypeMap, TableSchema};
use crate::sink::{TableRef, TableStats, WarehouseSink};
use crate::source::{ChunkPlan, ChunkSource, CsvSource, WindowedCsv};
use crate::transform::ChunkTransformer;
use crate::upload::UploadSequencer;
use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: TableRef,
    pub total_rows: u64,
    pub chunks: usize,
    pub chunks_appended: usize,
    pub chunks_empty: usize,
    pub rows_appended: u64,
    /// Whether the segment cache was used.
    pub cached: bool,
    /// Index of the chunk that triggered degradation to the all-STRING schema.
    pub degraded_at: Option<usize>,
    pub types: ColumnTypeMap,
    pub stats: TableStats,
    pub elapsed: Duration,
}

impl LoadReport {
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.degraded_at.is_some()
    }
}

/// Runs loads described by a [`LoaderConfig`] against one warehouse.
pub struct Loader {
    config: LoaderConfig,
    sink: Arc<dyn WarehouseSink>,
}

impl Loader {
    pub fn new(config: LoaderConfig, sink: Arc<dyn WarehouseSink>) -> Self {
        Self { config, sink }
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Execute one full run.
    ///
    /// # Errors
    /// Returns a [`RunFailure`] wrapping the [`LoadError`] that stopped the run.
    pub fn run(&self) -> Result<LoadReport, RunFailure> {
        let started = Instant::now();
        let mut committed = 0usize;
        match self.execute(started, &mut committed) {
            Ok(report) => Ok(report),
            Err(error) => {
                let elapsed = started.elapsed();
                error!(
                    table = %self.config.table,
                    elapsed_ms = elapsed.as_millis(),
                    chunks_committed = committed,
                    error = %error,
                    "load failed"
                );
                Err(RunFailure {
                    error,
                    elapsed,
                    chunks_committed: committed,
                })
            }
        }
    }

    fn execute(&self, started: Instant, committed: &mut usize) -> Result<LoadReport, LoadError> {
        let config = &self.config;
        config.validate()?;
        let delimiter = config.delimiter_byte()?;

        let source = CsvSource::open(&config.source_path, delimiter).map_err(LoadError::Source)?;
        let sample = source
            .read_sample(config.sample_rows)
            .map_err(LoadError::Inference)?;
        let types = TypeInferencer::new(&config.forced_string_terms).infer(&sample);
        for column in types.iter() {
            info!(column = %column.name, source = %column.source_name, column_type = %column.column_type, "column type inferred");
        }
        let schema = TableSchema::typed(&types);
        schema.validate()?;

        let total_rows = source.count_rows().map_err(LoadError::Source)?;
        let plan = ChunkPlan::new(total_rows, config.chunk_rows);
        info!(
            source = %source.path().display(),
            total_rows,
            chunks = plan.len(),
            chunk_rows = plan.window,
            "source planned"
        );

        let lifecycle = TableLifecycle::new(
            Arc::clone(&self.sink),
            config.table.clone(),
            config.location.clone(),
        );
        lifecycle.ensure_dataset()?;
        lifecycle.recreate_table(&schema)?;

        let cached = total_rows > config.cache_threshold_rows;
        let scratch = if cached {
            Some(ScratchDir::create(&config.scratch_dir).map_err(LoadError::Cache)?)
        } else {
            None
        };
        let chunks: Box<dyn ChunkSource> = match &scratch {
            Some(dir) => {
                let cache = SegmentCache::materialize(&source, plan.window, dir)
                    .map_err(LoadError::Cache)?;
                if cache.num_chunks() != plan.len() {
                    return Err(LoadError::Cache(anyhow!(
                        "cache holds {} segments, plan has {} chunks",
                        cache.num_chunks(),
                        plan.len()
                    )));
                }
                Box::new(cache)
            }
            None => Box::new(WindowedCsv::new(source.clone(), plan.clone())),
        };

        let transformer = ChunkTransformer::new(types.clone());
        let pool = WorkerPool::new(config.workers);
        let transform_started = Instant::now();
        let results = pool
            .run(chunks.num_chunks(), |index| {
                let raw = chunks.read_chunk(index)?;
                transformer.transform(index, raw)
            })
            .map_err(|e| match e {
                PoolError::Task { index, source } => LoadError::ChunkTransform { index, source },
                PoolError::Build { source, .. } => LoadError::WorkerPool(source),
            })?;
        info!(
            chunks = results.len(),
            workers = pool.workers(),
            elapsed_ms = transform_started.elapsed().as_millis(),
            "transform phase complete"
        );
        drop(chunks);
        drop(scratch);

        let mut sequencer = UploadSequencer::new(&lifecycle, schema, config.degrade_policy);
        let uploaded = sequencer.run(&results);
        *committed = sequencer.summary().chunks_appended;
        uploaded?;
        let summary = sequencer.summary().clone();
        drop(results);

        let stats = lifecycle.final_stats()?;
        let elapsed = started.elapsed();
        info!(
            table = %config.table,
            rows = stats.num_rows,
            mib = %format!("{:.2}", stats.mebibytes()),
            chunks_appended = summary.chunks_appended,
            chunks_empty = summary.chunks_empty,
            degraded = summary.degraded_at.is_some(),
            elapsed_ms = elapsed.as_millis(),
            "load complete"
        );

        Ok(LoadReport {
            table: config.table.clone(),
            total_rows,
            chunks: plan.len(),
            chunks_appended: summary.chunks_appended,
            chunks_empty: summary.chunks_empty,
            rows_appended: summary.rows_appended,
            cached,
            degraded_at: summary.degraded_at,
            types,
            stats,
            elapsed,
        })
    }
}
