//! vidx API - REST server
//!
//! Upload videos, poll indexing jobs, cancel or delete them, and search a
//! video for the moments matching a free-text query.
//!
//! Author: hephaex@gmail.com

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(feature = "test-utils")]
pub mod testing;

#[cfg(feature = "test-utils")]
pub use testing::{create_router_for_testing, test_state, test_state_with_index};

use crate::middleware::metrics_middleware;
use crate::state::AppState;
use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use vidx_core::ServerConfig;

/// OpenAPI document
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vidx API",
        description = "Video indexing and semantic search"
    ),
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::health::prometheus_metrics,
        handlers::videos::upload_video,
        handlers::videos::get_video,
        handlers::videos::video_status,
        handlers::videos::delete_video,
        handlers::jobs::get_job,
        handlers::jobs::cancel_job,
        handlers::search::search_video,
    ),
    components(schemas(
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::videos::UploadVideoForm,
        handlers::videos::UploadVideoResponse,
        handlers::videos::VideoInfoResponse,
        handlers::videos::DeleteVideoResponse,
        handlers::jobs::JobStatusResponse,
        handlers::search::SearchRequest,
        handlers::search::SearchResultItem,
        handlers::search::SearchResponseBody,
    )),
    tags(
        (name = "health", description = "Liveness, readiness and metrics"),
        (name = "videos", description = "Video upload and management"),
        (name = "jobs", description = "Indexing job status and cancellation"),
        (name = "search", description = "Semantic search within a video")
    )
)]
pub struct ApiDoc;

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    let api = routes::api_routes(
        state.config.media.max_video_size_bytes(),
        Duration::from_secs(server.request_timeout_secs),
    );

    let mut app = Router::new()
        .merge(routes::health_routes())
        .nest("/api/v1", api)
        .nest_service("/thumbnails", ServeDir::new(&server.thumbnails_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    if server.cors_enabled {
        app = app.layer(build_cors_layer(server));
    }

    app.with_state(state)
}

/// CORS layer from the configured origins; `*` allows any origin
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
