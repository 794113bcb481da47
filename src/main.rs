use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warehouse_loader::{DegradePolicy, LoadReport, Loader, LoaderConfig, LocalWarehouse, TableRef};

#[derive(Parser)]
#[command(name = "warehouse-loader")]
#[command(about = "Load a delimited file into a warehouse table in ordered, parallel chunks")]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source file with one header row
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Target table as catalog.dataset.table
    #[arg(short, long)]
    table: Option<TableRef>,

    /// Location for a newly created dataset
    #[arg(long)]
    location: Option<String>,

    /// Rows per chunk
    #[arg(long)]
    chunk_rows: Option<usize>,

    /// Concurrent transform workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Rows sampled for type inference
    #[arg(long)]
    sample_rows: Option<usize>,

    /// Row count above which the source is split into a segment cache
    #[arg(long)]
    cache_threshold: Option<u64>,

    /// Scratch directory for the segment cache
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// What to do when a typed append fails: replay_all or abort
    #[arg(long)]
    degrade_policy: Option<DegradePolicy>,

    /// Root directory of the local warehouse
    #[arg(long, default_value = "warehouse")]
    warehouse_root: PathBuf,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(LoaderConfig, PathBuf)> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_json_file(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(v) = self.source {
            config.source_path = v;
        }
        if let Some(v) = self.table {
            config.table = v;
        }
        if let Some(v) = self.location {
            config.location = v;
        }
        if let Some(v) = self.chunk_rows {
            config.chunk_rows = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.sample_rows {
            config.sample_rows = v;
        }
        if let Some(v) = self.cache_threshold {
            config.cache_threshold_rows = v;
        }
        if let Some(v) = self.scratch_dir {
            config.scratch_dir = v;
        }
        if let Some(v) = self.degrade_policy {
            config.degrade_policy = v;
        }
        Ok((config, self.warehouse_root))
    }
}

fn log_report(report: &LoadReport) {
    info!(
        table = %report.table,
        rows = report.stats.num_rows,
        mib = %format!("{:.2}", report.stats.mebibytes()),
        chunks = report.chunks,
        empty_chunks = report.chunks_empty,
        cached = report.cached,
        degraded = report.degraded(),
        elapsed = %format!("{:.1}s", report.elapsed.as_secs_f64()),
        "import finished"
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, root) = match Args::parse().into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(error = %format!("{e:#}"), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let warehouse = match LocalWarehouse::open(&root) {
        Ok(w) => w,
        Err(e) => {
            error!(root = %root.display(), error = %e, "cannot open warehouse");
            return ExitCode::FAILURE;
        }
    };

    match Loader::new(config, Arc::new(warehouse)).run() {
        Ok(report) => {
            log_report(&report);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            error!(
                elapsed = %format!("{:.1}s", failure.elapsed.as_secs_f64()),
                chunks_committed = failure.chunks_committed,
                error = %format!("{:#}", anyhow::Error::new(failure.error)),
                "import failed"
            );
            ExitCode::FAILURE
        }
    }
}
