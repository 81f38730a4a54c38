//! In-process application for tests
//!
//! Memory job store, memory vector index, scripted media and hash
//! embeddings: no network, ffmpeg or databases involved. The scripted video
//! is ten seconds long and shows a red car for its first three seconds.

use crate::create_router;
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use vidx_ai::testing::{HashEmbedder, ScriptedDescriber};
use vidx_ai::AiGateway;
use vidx_core::{AppConfig, JobBackend, MemoryJobStore, RetryPolicy, VectorBackend};
use vidx_media::testing::ScriptedDecomposer;
use vidx_pipeline::Services;
use vidx_vector::{IndexManager, MemoryIndex};

/// Embedding dimension of the test stack
pub const TEST_DIMENSION: usize = 256;

/// Config rooted in a fresh scratch directory
pub fn test_config() -> AppConfig {
    let root = std::env::temp_dir().join(format!("vidx-api-test-{}", uuid::Uuid::new_v4()));

    let mut config = AppConfig::default();
    config.server.upload_dir = root.join("uploads");
    config.server.thumbnails_dir = root.join("thumbnails");
    config.jobs.backend = JobBackend::Memory;
    config.jobs.temp_dir = Some(root.join("scratch"));
    config.database.vector_backend = VectorBackend::Memory;
    config.ai.embedding_dimension = TEST_DIMENSION;
    config.media.max_video_size_mb = 1;
    config
}

/// State over in-memory services
pub fn test_state() -> Arc<AppState> {
    test_state_with_index(Arc::new(MemoryIndex::new()))
}

/// State over a caller-held vector index, e.g. to simulate an outage
pub fn test_state_with_index(vector_index: Arc<MemoryIndex>) -> Arc<AppState> {
    let config = test_config();
    let retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2));

    let decomposer = ScriptedDecomposer::new(10.0).with_scene(|ts| {
        if ts < 3.0 {
            "a red car parked on the street".to_string()
        } else {
            "an empty room".to_string()
        }
    });
    let gateway = AiGateway::new(Arc::new(HashEmbedder::new(TEST_DIMENSION)), TEST_DIMENSION)
        .expect("hash embedder matches its dimension")
        .with_describer(Arc::new(ScriptedDescriber::new()))
        .with_retry(retry.clone());
    let index = IndexManager::new(vector_index, TEST_DIMENSION).with_retry(retry);

    let services = Services::assemble(
        &config,
        Arc::new(MemoryJobStore::new()),
        Arc::new(decomposer),
        Arc::new(gateway),
        Arc::new(index),
    );
    Arc::new(AppState::new(config, services))
}

/// Router over [`test_state`]
pub fn create_router_for_testing() -> Router {
    create_router(test_state())
}
