//! PDM Ingest - load sensor captures into TimescaleDB

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pdm_common::logging::{init_logging, LogConfig, LogLevel};
use pdm_common::SensorKind;
use pdm_ingest::catalog::{CaptureSource, CatalogRequest};
use pdm_ingest::config::IngestConfig;
use pdm_ingest::db::{self, TimescaleSink};
use pdm_ingest::download::download_captures;
use pdm_ingest::framework::{DownsamplePlan, PipelineEvent, RowSink};
use pdm_ingest::orchestrator::{OrchestratorSettings, PipelineOrchestrator, RunParams};
use pdm_ingest::storage::{LocalDirStore, ObjectStore, S3Store, StorageConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pdm-ingest")]
#[command(author, version, about = "Load raw sensor captures from S3 into TimescaleDB")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode captures and bulk-load them
    Ingest(IngestArgs),

    /// Check that storage and the database are reachable
    Check,

    /// Copy captures to a local directory
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
struct SelectionArgs {
    /// Machine id (top-level storage prefix)
    #[arg(short, long)]
    machine: String,

    /// Sensors to include
    #[arg(short, long, value_delimiter = ',', default_value = "acc,mic")]
    sensors: Vec<SensorKind>,

    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last day, inclusive (YYYY-MM-DD); defaults to the start day
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Read from a local directory laid out like the bucket
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Accept file names with a leading sequence segment
    #[arg(long)]
    legacy_names: bool,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Files per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batches decoded concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Compress closed chunks every N batches
    #[arg(long)]
    compression_interval: Option<usize>,

    /// Seconds to wait for one batch before giving up on it
    #[arg(long)]
    batch_timeout: Option<u64>,

    /// Load exactly these object keys instead of scanning the machine prefix
    #[arg(long, value_delimiter = ',')]
    files: Vec<String>,

    /// Keep only the first N samples of every second
    #[arg(long, requires = "keep_seconds")]
    keep_per_second: Option<usize>,

    /// ...for the first N seconds of each capture
    #[arg(long, requires = "keep_per_second")]
    keep_seconds: Option<usize>,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Output directory
    #[arg(short, long, default_value = "./S3_Downloads")]
    output: PathBuf,

    /// Concurrent downloads
    #[arg(short, long, default_value_t = 16)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::for_binary("pdm-ingest")
        .with_level(log_level)
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Ingest(args) => run_ingest(args).await,
        Command::Check => run_check().await,
        Command::Download(args) => run_download(args).await,
    }
}

async fn open_store(storage: &StorageConfig, local_dir: Option<PathBuf>) -> Result<Arc<dyn ObjectStore>> {
    Ok(match local_dir {
        Some(dir) => Arc::new(LocalDirStore::new(dir)),
        None => Arc::new(S3Store::new(storage).await?),
    })
}

async fn run_ingest(args: IngestArgs) -> Result<()> {
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let selection = args.selection;

    let store = open_store(&config.storage, selection.local_dir.clone()).await?;
    let sink = TimescaleSink::connect(
        &config.db,
        Some(&config.tuning),
        config.pipeline.tables.clone(),
    )
    .await
    .context("Failed to connect to the database")?;

    let mut batch = config.pipeline.batch.clone();
    if let Some(batch_size) = args.batch_size {
        batch.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        batch.worker_count = workers;
    }
    if let Some(interval) = args.compression_interval {
        batch.compression_interval = interval;
    }
    if let Some(secs) = args.batch_timeout {
        batch.batch_timeout = Duration::from_secs(secs);
    }

    let source = if args.files.is_empty() {
        CaptureSource::DirectoryScan {
            machine_id: selection.machine.clone(),
        }
    } else {
        CaptureSource::ExplicitFileList { keys: args.files }
    };

    let downsample = match (args.keep_per_second, args.keep_seconds) {
        (Some(samples_per_second), Some(seconds)) => Some(DownsamplePlan {
            samples_per_second,
            seconds,
        }),
        _ => None,
    };

    let params = RunParams {
        machine_id: selection.machine,
        sensors: selection.sensors,
        start: selection.start,
        end: selection.end.unwrap_or(selection.start),
        batch,
        downsample,
        source,
        legacy_names: selection.legacy_names,
    };

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        store,
        Arc::new(sink),
        OrchestratorSettings {
            tables: config.pipeline.tables.clone(),
            ..Default::default()
        },
    ));

    let events = tokio::spawn(log_events(orchestrator.subscribe()));

    let on_ctrl_c = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight work");
            on_ctrl_c.cancel();
        }
    });

    info!(
        machine = %params.machine_id,
        start = %params.start,
        end = %params.end,
        batch_size = params.batch.batch_size,
        workers = params.batch.worker_count,
        "Starting ingest"
    );

    let result = orchestrator.start(params).await;
    // The logger exits on `Finished`; a rejected start never sends one.
    if tokio::time::timeout(Duration::from_secs(5), events).await.is_err() {
        debug!("Event logger did not see the end of the run");
    }

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn log_events(mut rx: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PhaseChanged(phase) => info!(%phase, "Phase changed"),
            PipelineEvent::Discovered { total, per_sensor } => {
                for (sensor, files) in &per_sensor {
                    info!(%sensor, files, "Captures discovered");
                }
                info!(total, "Discovery complete");
            }
            PipelineEvent::FileSkipped { key, reason } => debug!(%key, %reason, "File skipped"),
            PipelineEvent::BatchLoaded { batch_index, rows } => {
                debug!(batch_index, rows, "Batch loaded")
            }
            PipelineEvent::BatchFailed {
                batch_index,
                table,
                reason,
            } => {
                warn!(batch_index, table = table.as_deref().unwrap_or("-"), %reason, "Batch failed")
            }
            PipelineEvent::Progress(snapshot) => info!(
                processed = snapshot.processed_files,
                skipped = snapshot.skipped_files,
                total = snapshot.total_files,
                rows = snapshot.inserted_rows,
                files_per_sec = %format!("{:.1}", snapshot.files_per_sec),
                rows_per_sec = %format!("{:.0}", snapshot.rows_per_sec),
                eta_secs = snapshot.eta_seconds.map(|eta| eta.round() as u64),
                "Progress {:.1}%",
                snapshot.percent()
            ),
            PipelineEvent::Finished(summary) => {
                info!(phase = %summary.phase, "Run finished");
                break;
            }
        }
    }
}

async fn run_check() -> Result<()> {
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let mut healthy = true;

    let store = S3Store::new(&config.storage).await?;
    match store.check().await {
        Ok(()) => info!(store = %store.describe(), "Object storage reachable"),
        Err(e) => {
            error!(store = %store.describe(), error = %e, "Object storage check failed");
            healthy = false;
        }
    }

    match db::create_pool(&config.db, None).await {
        Ok(pool) => {
            let sink = TimescaleSink::new(pool, config.pipeline.tables.clone());
            if let Err(e) = sink.check().await {
                error!(error = %e, "Database check failed");
                healthy = false;
            }
        }
        Err(e) => {
            error!(error = %e, "Database connection failed");
            healthy = false;
        }
    }

    if !healthy {
        anyhow::bail!("One or more services are unreachable");
    }
    info!("All services reachable");
    Ok(())
}

async fn run_download(args: DownloadArgs) -> Result<()> {
    let storage = StorageConfig::from_env()?;
    storage.validate()?;
    let selection = args.selection;
    let store = open_store(&storage, selection.local_dir.clone()).await?;

    let request = CatalogRequest {
        source: CaptureSource::DirectoryScan {
            machine_id: selection.machine.clone(),
        },
        sensors: selection.sensors,
        start: selection.start,
        end: selection.end.unwrap_or(selection.start),
        legacy_names: selection.legacy_names,
    };

    let output = args.output.join(&selection.machine);
    let stats = download_captures(store.as_ref(), &request, &output, args.concurrency).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if stats.failed > 0 {
        anyhow::bail!("{} captures failed to download", stats.failed);
    }
    Ok(())
}
