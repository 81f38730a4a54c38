//! Health check and metrics handlers
//!
//! Author: hephaex@gmail.com

use crate::state::{AppState, EndpointMetrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use utoipa::ToSchema;

/// Dependency health
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// healthy or degraded
    #[schema(example = "healthy")]
    pub status: String,
    /// Vector store answered
    pub vector_store: bool,
    /// Job store answered
    pub job_queue: bool,
    #[schema(example = "1.4.2")]
    pub version: String,
    pub timestamp: String,
}

/// Health probe. Each dependency is checked independently.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "All dependencies reachable", body = HealthResponse),
        (status = 503, description = "A dependency is down", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (vector_store, job_queue) = tokio::join!(
        state.index().health_check(),
        state.orchestrator().queue_healthy()
    );
    let healthy = vector_store && job_queue;

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        vector_store,
        job_queue,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        tracing::warn!(vector_store, job_queue, "Health check degraded");
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub uptime_seconds: u64,
}

/// Readiness probe - false while shutting down
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready"),
        (status = 503, description = "Service not ready")
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = ReadinessResponse {
        ready: state.is_ready(),
        uptime_seconds: state.uptime_secs(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus-compatible metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Prometheus text exposition", content_type = "text/plain")
    )
)]
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.uptime_secs();
    let total_requests = state.get_request_count();
    let cache = state.search.cache_stats();

    let mut output = String::new();

    output.push_str("# HELP vidx_uptime_seconds Time since server start\n");
    output.push_str("# TYPE vidx_uptime_seconds gauge\n");
    output.push_str(&format!("vidx_uptime_seconds {uptime}\n\n"));

    output.push_str("# HELP vidx_requests_total Total number of API requests handled\n");
    output.push_str("# TYPE vidx_requests_total counter\n");
    output.push_str(&format!("vidx_requests_total {total_requests}\n\n"));

    output.push_str("# HELP vidx_ready Whether the server accepts traffic\n");
    output.push_str("# TYPE vidx_ready gauge\n");
    output.push_str(&format!("vidx_ready {}\n\n", u8::from(state.is_ready())));

    output.push_str("# HELP vidx_build_info Build information\n");
    output.push_str("# TYPE vidx_build_info gauge\n");
    output.push_str(&format!(
        "vidx_build_info{{version=\"{}\"}} 1\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    output.push_str("# HELP vidx_query_cache_hits_total Query embedding cache hits\n");
    output.push_str("# TYPE vidx_query_cache_hits_total counter\n");
    output.push_str(&format!("vidx_query_cache_hits_total {}\n\n", cache.hits));

    output.push_str("# HELP vidx_query_cache_misses_total Query embedding cache misses\n");
    output.push_str("# TYPE vidx_query_cache_misses_total counter\n");
    output.push_str(&format!("vidx_query_cache_misses_total {}\n\n", cache.misses));

    if cache.hits + cache.misses > 0 {
        output.push_str("# HELP vidx_query_cache_hit_rate Cache hit rate (0.0 to 1.0)\n");
        output.push_str("# TYPE vidx_query_cache_hit_rate gauge\n");
        output.push_str(&format!("vidx_query_cache_hit_rate {:.4}\n\n", cache.hit_rate));
    }

    let metrics = state.metrics.read().await;
    let mut endpoints: Vec<_> = metrics.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));

    output.push_str("# HELP vidx_http_requests_total HTTP requests by endpoint and status\n");
    output.push_str("# TYPE vidx_http_requests_total counter\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        let mut statuses: Vec<_> = endpoint_metrics.status_counts.iter().collect();
        statuses.sort();
        for (status, count) in statuses {
            output.push_str(&format!(
                "vidx_http_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}\n"
            ));
        }
    }
    output.push('\n');

    output.push_str("# HELP vidx_http_request_duration_seconds HTTP request latency\n");
    output.push_str("# TYPE vidx_http_request_duration_seconds histogram\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        write_histogram(&mut output, endpoint, endpoint_metrics);
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

fn write_histogram(output: &mut String, endpoint: &str, metrics: &EndpointMetrics) {
    if metrics.latency_count == 0 {
        return;
    }

    let buckets = &metrics.latency_buckets;
    let mut cumulative = 0u64;
    for (le, count) in [
        ("0.01", buckets.under_10ms),
        ("0.05", buckets.ms_10_50),
        ("0.1", buckets.ms_50_100),
        ("0.5", buckets.ms_100_500),
        ("1.0", buckets.ms_500_1000),
        ("+Inf", buckets.over_1s),
    ] {
        cumulative += count;
        let _ = writeln!(
            output,
            "vidx_http_request_duration_seconds_bucket{{endpoint=\"{endpoint}\",le=\"{le}\"}} {cumulative}"
        );
    }

    let _ = writeln!(
        output,
        "vidx_http_request_duration_seconds_sum{{endpoint=\"{endpoint}\"}} {:.6}",
        metrics.total_latency_us as f64 / 1_000_000.0
    );
    let _ = writeln!(
        output,
        "vidx_http_request_duration_seconds_count{{endpoint=\"{endpoint}\"}} {}",
        metrics.latency_count
    );
}
