//! Service wiring from configuration
//!
//! Builds the store, decomposer, gateway and index manager the binaries
//! share, and runs the startup checks that must pass before any job is
//! accepted.

use crate::orchestrator::Orchestrator;
use crate::runner::{JobRunner, RunnerSettings};
use std::sync::Arc;
use vidx_ai::AiGateway;
use vidx_core::{
    AppConfig, JobBackend, JobStore, MemoryJobStore, PgJobStore, Result, RetryPolicy, VidxError,
};
use vidx_media::{Decomposer, FfmpegConfig, FfmpegDecomposer};
use vidx_vector::{create_vector_index, IndexManager};

/// Shared handles for a running process
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn JobStore>,
    pub decomposer: Arc<dyn Decomposer>,
    pub gateway: Arc<AiGateway>,
    pub index: Arc<IndexManager>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Create the configured job store, migrating PostgreSQL if selected
pub async fn create_job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    match config.jobs.backend {
        JobBackend::Postgres => {
            let store = PgJobStore::new(
                &config.database.postgres_url,
                config.database.postgres_pool_size,
            )
            .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        JobBackend::Memory => Ok(Arc::new(MemoryJobStore::new())),
    }
}

impl Services {
    /// Assemble services from already-built parts
    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        decomposer: Arc<dyn Decomposer>,
        gateway: Arc<AiGateway>,
        index: Arc<IndexManager>,
    ) -> Self {
        let runner = JobRunner::new(
            store.clone(),
            decomposer.clone(),
            gateway.clone(),
            index.clone(),
            RunnerSettings::from_config(config),
        );
        let orchestrator = Arc::new(
            Orchestrator::new(store.clone(), runner).with_stale_after(config.jobs.stale_after()),
        );
        Self {
            store,
            decomposer,
            gateway,
            index,
            orchestrator,
        }
    }

    /// Build every backend from config.
    ///
    /// The embedding provider is probed live; a dimension that differs from
    /// the configured one aborts startup.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| VidxError::Configuration(e.to_string()))?;

        let gateway = Arc::new(AiGateway::from_config(&config.ai)?);
        let live = gateway.verify_dimension().await?;
        tracing::info!(
            capabilities = ?gateway.capabilities()?,
            live_dimension = live,
            "AI gateway ready"
        );

        let backend = create_vector_index(&config.database).await?;
        let index = Arc::new(
            IndexManager::new(backend, config.ai.embedding_dimension)
                .with_retry(RetryPolicy::from_config(&config.ai.retry))
                .with_call_timeout(config.database.vector_timeout()),
        );

        let decomposer: Arc<dyn Decomposer> = Arc::new(FfmpegDecomposer::with_config(
            FfmpegConfig::from_media_config(&config.media),
        ));
        if !decomposer.is_available().await {
            tracing::warn!(decomposer = decomposer.name(), "Media tools not found on PATH");
        }

        let store = create_job_store(config).await?;
        tracing::info!(
            job_backend = ?config.jobs.backend,
            vector_backend = index.backend(),
            "Services initialized"
        );
        Ok(Self::assemble(config, store, decomposer, gateway, index))
    }
}
