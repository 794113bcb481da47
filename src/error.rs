//! Run-level error taxonomy.

use crate::schema::SchemaError;
use crate::sink::SinkError;
use std::time::Duration;
use thiserror::Error;

/// Why a load run stopped.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("source read failed")]
    Source(#[source] anyhow::Error),
    #[error("type inference failed")]
    Inference(#[source] anyhow::Error),
    #[error("invalid table schema")]
    Schema(#[from] SchemaError),
    #[error("dataset setup failed")]
    Dataset(#[source] SinkError),
    #[error("table setup failed")]
    Table(#[source] SinkError),
    #[error("chunk cache failed")]
    Cache(#[source] anyhow::Error),
    #[error("worker pool failed to start")]
    WorkerPool(#[source] rayon::ThreadPoolBuildError),
    #[error("transform of chunk {index} failed")]
    ChunkTransform {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("fallback load of chunk {index} failed")]
    FallbackUpload {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("typed load of chunk {index} failed and the degrade policy is abort")]
    DegradeAborted {
        index: usize,
        #[source]
        source: SinkError,
    },
    #[error("could not read final table statistics")]
    Stats(#[source] SinkError),
}

/// A failed run: the error, how long the run took to fail, and how many
/// chunks had been committed to the table at that point.
#[derive(Debug, Error)]
#[error("load failed after {:.1}s ({chunks_committed} chunks committed): {error}", .elapsed.as_secs_f64())]
pub struct RunFailure {
    #[source]
    pub error: LoadError,
    pub elapsed: Duration,
    pub chunks_committed: usize,
}
