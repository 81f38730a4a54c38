//! vidx CLI - Command-line interface
//!
//! Usage:
//!   vidx worker
//!   vidx ingest <path> [--wait]
//!   vidx search <video_id> <query> [--top-k N]
//!   vidx status <job_id> | --video <video_id>
//!   vidx cancel <job_id>
//!   vidx delete <video_id>
//!   vidx check

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidx_core::{AppConfig, JobStore, ProcessingJob, VideoAsset, VidxError};
use vidx_media::{safe_file_name, validate_source, SourceLimits};
use vidx_pipeline::{create_job_store, CancelOutcome, Services};
use vidx_search::{CacheConfig, QueryEmbeddingCache, SearchEngine};

#[derive(Parser)]
#[command(name = "vidx")]
#[command(about = "Video indexing and semantic search")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long, env = "VIDX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run indexing workers until interrupted
    Worker {
        /// Number of concurrent jobs (defaults to config)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Submit a local video for indexing
    Ingest {
        /// Path to the video file
        path: PathBuf,
        /// Process in this process and wait for the result
        #[arg(long)]
        wait: bool,
    },
    /// Search a video for a moment
    Search {
        video_id: Uuid,
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Show a job's status
    Status {
        /// Job ID
        #[arg(required_unless_present = "video")]
        job_id: Option<Uuid>,
        /// Latest job of this video instead
        #[arg(long, conflicts_with = "job_id")]
        video: Option<Uuid>,
    },
    /// Cancel a pending or processing job
    Cancel { job_id: Uuid },
    /// Delete a video and everything indexed from it
    Delete { video_id: Uuid },
    /// Validate config and probe every backend
    Check,
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,vidx={level}", level = config.logging.level).into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Worker { workers } => run_workers(&config, workers).await,
        Commands::Ingest { path, wait } => ingest(&config, &path, wait).await,
        Commands::Search {
            video_id,
            query,
            top_k,
        } => {
            let services = Services::from_config(&config).await?;
            let cache = QueryEmbeddingCache::with_config(&CacheConfig::from_ai_config(&config.ai));
            let engine = SearchEngine::new(
                services.gateway.clone(),
                services.index.clone(),
                config.search.clone(),
            )
            .with_cache(cache);
            print_json(&engine.search(video_id, &query, top_k).await?)
        }
        Commands::Status { job_id, video } => {
            let store = create_job_store(&config).await?;
            let job = match (job_id, video) {
                (Some(job_id), _) => store.get_job(job_id).await?,
                (None, Some(video_id)) => store.latest_job_for_video(video_id).await?,
                (None, None) => None,
            };
            let job = job.ok_or_else(|| VidxError::NotFound("Job".to_string()))?;
            print_json(&job)
        }
        Commands::Cancel { job_id } => {
            let services = Services::from_config(&config).await?;
            match services.orchestrator.cancel(job_id).await? {
                CancelOutcome::Cancelled(job) => print_json(&job),
                CancelOutcome::NotFound => anyhow::bail!("Job {job_id} not found"),
                CancelOutcome::AlreadyTerminal(job) => {
                    anyhow::bail!("Job {job_id} is already {}", job.status)
                }
            }
        }
        Commands::Delete { video_id } => {
            let services = Services::from_config(&config).await?;
            print_json(&services.orchestrator.delete_video(video_id).await?)
        }
        Commands::Check => check(&config).await,
    }
}

async fn run_workers(config: &AppConfig, workers: Option<usize>) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let count = workers.unwrap_or(config.jobs.workers);

    let shutdown = CancellationToken::new();
    let handles =
        services
            .orchestrator
            .spawn_workers(count, config.jobs.poll_interval(), shutdown.clone());
    tracing::info!(workers = count, "Workers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Stopping after current jobs");
    shutdown.cancel();
    for handle in handles {
        handle.await?;
    }
    Ok(())
}

async fn ingest(config: &AppConfig, path: &Path, wait: bool) -> anyhow::Result<()> {
    let limits = SourceLimits::from_config(&config.media);
    let size = validate_source(path, &limits).await?;

    let services = Services::from_config(config).await?;

    let original = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = safe_file_name(&original);
    let video_id = Uuid::new_v4();
    tokio::fs::create_dir_all(&config.server.upload_dir)
        .await
        .context("Failed to create upload directory")?;
    let dest = config
        .server
        .upload_dir
        .join(format!("{video_id}_{file_name}"));
    tokio::fs::copy(path, &dest)
        .await
        .with_context(|| format!("Failed to copy {} into uploads", path.display()))?;

    let job = services
        .orchestrator
        .submit(VideoAsset::new(video_id, dest, file_name, size))
        .await?;
    if !wait {
        return print_json(&job);
    }

    let shutdown = CancellationToken::new();
    let handles = services.orchestrator.spawn_workers(
        config.jobs.workers,
        config.jobs.poll_interval(),
        shutdown.clone(),
    );
    let job = wait_for(&services, job.job_id).await;
    shutdown.cancel();
    for handle in handles {
        handle.await?;
    }
    print_json(&job?)
}

/// Poll until the job reaches a terminal state, logging progress
async fn wait_for(
    services: &Services,
    job_id: Uuid,
) -> anyhow::Result<ProcessingJob> {
    let orchestrator = Arc::clone(&services.orchestrator);
    let mut last_progress = -1.0f32;
    loop {
        let job = orchestrator.status(job_id).await?;
        if job.progress > last_progress {
            last_progress = job.progress;
            tracing::info!(
                job_id = %job_id,
                status = %job.status,
                percent = (job.progress * 100.0).round() as u32,
                frames = job.frames_processed,
                total_frames = job.total_frames,
                "Indexing"
            );
        }
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn check(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let services = Services::from_config(config).await?;

    let vector_store = services.index.health_check().await;
    let job_queue = services.orchestrator.queue_healthy().await;
    let media_tools = services.decomposer.is_available().await;
    let capabilities = services.gateway.capabilities()?;

    print_json(&json!({
        "config": "ok",
        "embedding_dimension": services.gateway.dimension(),
        "capabilities": capabilities,
        "vector_store": vector_store,
        "job_queue": job_queue,
        "media_tools": media_tools,
    }))?;

    if !(vector_store && job_queue && media_tools) {
        anyhow::bail!("One or more backends are unavailable");
    }
    Ok(())
}
