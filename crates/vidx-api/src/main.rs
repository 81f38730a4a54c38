//! vidx API Server
//!
//! REST API plus an in-process worker pool draining the job queue.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vidx_api::{create_router, state::AppState};
use vidx_core::{AppConfig, LoggingConfig};
use vidx_pipeline::Services;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "vidx_api={level},vidx_pipeline={level},vidx_ai={level},vidx_vector={level},vidx_media={level},vidx_search={level},tower_http=debug",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("VIDX_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let services = Services::from_config(&config).await?;

    let shutdown = CancellationToken::new();
    let workers = services.orchestrator.spawn_workers(
        config.jobs.workers,
        config.jobs.poll_interval(),
        shutdown.clone(),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, services));
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("vidx API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    let serve_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_state.set_ready(false);
            tracing::info!("Shutdown requested, draining workers");
        })
        .await?;

    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    tracing::info!(requests = state.get_request_count(), "vidx API Server stopped");
    Ok(())
}
