//! # Warehouse Loader
//!
//! A **chunked bulk loader** that moves a large delimited file into a
//! columnar warehouse table, keeping source row order and recovering from
//! typed-load failures by widening the table to an all-STRING schema.
//!
//! ## Key Features
//!
//! - **Type inference** from a bounded sample: STRING, INT64, FLOAT64, DATE, DATETIME
//! - **Idempotent table lifecycle** - every run drops and recreates the target
//! - **Parallel transform** of fixed-size chunks on a bounded worker pool, fail-fast
//! - **Ordered upload** - chunks reach the warehouse in ascending index order
//! - **Schema degradation** - a failed typed append falls back to an escaped text load
//! - **Segment cache** for large sources, so workers never rescan the file
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use warehouse_loader::{Loader, LoaderConfig, LocalWarehouse, TableRef};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = LoaderConfig::new("exports/calls.csv", "analytics.raw.calls".parse()?);
//! let warehouse = LocalWarehouse::open("warehouse")?;
//! let report = Loader::new(config, Arc::new(warehouse)).run()?;
//! println!("{} rows in {}", report.stats.num_rows, report.table);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module |
//! |---|---|
//! | sample and infer column types | [`source`], [`infer`], [`values`] |
//! | create dataset and table | [`lifecycle`], [`schema`] |
//! | split large sources once | [`cache`] |
//! | transform chunks concurrently | [`pool`], [`transform`] |
//! | append in order, degrade on failure | [`upload`], [`fallback`] |
//!
//! Everything a run needs comes from one [`LoaderConfig`]; the warehouse is
//! any [`WarehouseSink`].

pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod infer;
pub mod lifecycle;
pub mod loader;
pub mod pool;
pub mod schema;
pub mod sink;
pub mod source;
pub mod testing;
pub mod transform;
pub mod upload;
pub mod values;

pub use config::LoaderConfig;
pub use error::{LoadError, RunFailure};
pub use infer::TypeInferencer;
pub use lifecycle::TableLifecycle;
pub use loader::{LoadReport, Loader};
pub use pool::WorkerPool;
pub use schema::{ColumnType, ColumnTypeMap, TableSchema, normalize_column_name};
pub use sink::{
    DatasetRef, LocalWarehouse, MemoryWarehouse, SinkError, SinkErrorKind, TableRef, TableStats,
    TextDialect, WarehouseSink,
};
pub use source::{ChunkPlan, ChunkSource, CsvSource, TextBatch};
pub use transform::{ChunkBatch, ChunkTransformer};
pub use upload::{DegradePolicy, UploadSequencer, UploadSummary};
