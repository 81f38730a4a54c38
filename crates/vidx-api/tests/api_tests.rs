//! API Integration Tests
//!
//! Everything runs in-process against the memory-backed test state.
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use vidx_api::state::AppState;
use vidx_api::{create_router, create_router_for_testing, test_state, test_state_with_index};
use vidx_core::JobStatus;
use vidx_vector::MemoryIndex;

const BOUNDARY: &str = "vidx-test-boundary";

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to create a single-field multipart upload
fn create_upload_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/videos")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn app_with_state() -> (Router, Arc<AppState>) {
    let state = test_state();
    (create_router(state.clone()), state)
}

/// Upload a small file and return the response JSON
async fn upload(app: &Router) -> Value {
    let response = app
        .clone()
        .oneshot(create_upload_request("file", "street clip.mp4", b"fake video bytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["vector_store"], true);
    assert_eq!(json["job_queue"], true);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_check_vector_store_down() {
    let index = Arc::new(MemoryIndex::new());
    index.set_available(false);
    let app = create_router(test_state_with_index(index));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["vector_store"], false);
    assert_eq!(json["job_queue"], true);
}

#[tokio::test]
async fn test_readiness_check() {
    let (app, state) = app_with_state();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.set_ready(false);
    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let text = body_text(response).await;
    assert!(text.contains("# TYPE vidx_uptime_seconds gauge"));
    assert!(text.contains("vidx_requests_total 0"));
    assert!(text.contains("vidx_query_cache_hits_total 0"));
    assert!(text.contains("vidx_build_info{version="));
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/api/v1/search"].is_object());
    assert!(json["paths"]["/api/v1/jobs/{id}/cancel"].is_object());
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_upload_queues_job() {
    let (app, state) = app_with_state();

    let json = upload(&app).await;
    assert_eq!(json["status"], "pending");
    let job_id = json["job_id"].as_str().unwrap().to_string();
    let video_id: Uuid = json["video_id"].as_str().unwrap().parse().unwrap();

    let stored = state.config.server.upload_dir.join(format!("{video_id}_street_clip.mp4"));
    assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"fake video bytes");

    let response = app
        .clone()
        .oneshot(create_json_request("GET", &format!("/api/v1/jobs/{job_id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["status"], "pending");
    assert_eq!(job["progress"], 0.0);
    assert!(job["error"].is_null());

    let response = app
        .oneshot(create_json_request(
            "GET",
            &format!("/api/v1/videos/{video_id}/status"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["job_id"], job_id.as_str());
}

#[tokio::test]
async fn test_upload_unsupported_format() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_upload_request("file", "notes.txt", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(json["message"].as_str().unwrap().contains("mp4"));
}

#[tokio::test]
async fn test_upload_missing_file_field() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_upload_request("video", "clip.mp4", b"bytes"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_empty_file() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_upload_request("file", "clip.mp4", b""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_too_large() {
    let (app, state) = app_with_state();
    let oversized = vec![0u8; 1024 * 1024 + 16];

    let response = app
        .oneshot(create_upload_request("file", "clip.mp4", &oversized))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], "PAYLOAD_TOO_LARGE");

    // The partial file is removed
    let leftovers = std::fs::read_dir(&state.config.server.upload_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

// =============================================================================
// Job Tests
// =============================================================================

#[tokio::test]
async fn test_get_unknown_job() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "GET",
            &format!("/api/v1/jobs/{}", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_job_invalid_id() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request("GET", "/api/v1/jobs/not-a-uuid", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "POST",
            &format!("/api/v1/jobs/{}/cancel", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_pending_job_then_conflict() {
    let app = create_router_for_testing();
    let job_id = upload(&app).await["job_id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/jobs/{job_id}/cancel");

    let response = app
        .clone()
        .oneshot(create_json_request("POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error_kind"], "cancelled");
    assert_eq!(job["retriable"], true);

    let response = app
        .oneshot(create_json_request("POST", &uri, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

// =============================================================================
// Search Tests
// =============================================================================

#[tokio::test]
async fn test_search_empty_query() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "video_id": Uuid::new_v4(), "query": "   " })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_search_top_k_out_of_range() {
    let app = create_router_for_testing();

    for top_k in [0, 21] {
        let response = app
            .clone()
            .oneshot(create_json_request(
                "POST",
                "/api/v1/search",
                Some(json!({ "video_id": Uuid::new_v4(), "query": "red car", "top_k": top_k })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "top_k = {top_k}");
    }
}

#[tokio::test]
async fn test_search_unindexed_video() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "video_id": Uuid::new_v4(), "query": "red car" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// End-to-end
// =============================================================================

#[tokio::test]
async fn test_upload_index_search_delete() {
    let (app, state) = app_with_state();
    let uploaded = upload(&app).await;
    let video_id = uploaded["video_id"].as_str().unwrap().to_string();
    let job_id = uploaded["job_id"].as_str().unwrap().to_string();

    let report = state.orchestrator().run_next().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.frames_processed, 10);

    let response = app
        .clone()
        .oneshot(create_json_request("GET", &format!("/api/v1/jobs/{job_id}"), None))
        .await
        .unwrap();
    let job = body_json(response).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 1.0);
    assert_eq!(job["total_frames"], 10);

    // Red car on screen for seconds 0-2; duplicates within 2s collapse
    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "video_id": video_id, "query": "red car" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let found = body_json(response).await;
    assert_eq!(found["total_results"], 1);
    let hit = &found["results"][0];
    assert_eq!(hit["timestamp"], 0.0);
    assert_eq!(hit["type"], "visual");
    let thumbnail = hit["thumbnail_url"].as_str().unwrap().to_string();
    assert_eq!(thumbnail, format!("/thumbnails/{video_id}_0.0.jpg"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri(&thumbnail).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(create_json_request("GET", &format!("/api/v1/videos/{video_id}"), None))
        .await
        .unwrap();
    let info = body_json(response).await;
    assert_eq!(info["visual_segments"], 10);
    assert_eq!(info["audio_segments"], 0);
    assert_eq!(info["has_audio"], false);

    let response = app
        .clone()
        .oneshot(create_json_request("DELETE", &format!("/api/v1/videos/{video_id}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let deleted = body_json(response).await;
    assert_eq!(deleted["points_deleted"], 10);
    assert_eq!(deleted["thumbnails_deleted"], 10);
    assert_eq!(deleted["file_deleted"], true);
    assert_eq!(deleted["job_cancelled"], false);

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/api/v1/search",
            Some(json!({ "video_id": video_id, "query": "red car" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_unknown_video() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(create_json_request(
            "DELETE",
            &format!("/api/v1/videos/{}", Uuid::new_v4()),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
