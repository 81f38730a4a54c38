//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::handlers::{health, jobs, search, videos};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Multipart framing allowance on top of the video size cap
const UPLOAD_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Health and metrics routes, mounted at the root
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::prometheus_metrics))
}

/// Create API v1 routes.
///
/// Uploads run without the request timeout and with a body limit sized to
/// the video cap; everything else is bounded by `request_timeout`.
pub fn api_routes(max_video_bytes: u64, request_timeout: Duration) -> Router<Arc<AppState>> {
    let upload_limit = usize::try_from(max_video_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(UPLOAD_OVERHEAD_BYTES);

    let uploads = Router::new()
        .route("/videos", post(videos::upload_video))
        .layer(DefaultBodyLimit::max(upload_limit));

    let bounded = Router::new()
        // Video endpoints
        .route(
            "/videos/:id",
            get(videos::get_video).delete(videos::delete_video),
        )
        .route("/videos/:id/status", get(videos::video_status))
        // Job endpoints
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        // Search
        .route("/search", post(search::search_video))
        .layer(TimeoutLayer::new(request_timeout));

    Router::new().merge(uploads).merge(bounded)
}
