//! Semantic search handler
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use vidx_core::{SearchResponse, SearchResult};

/// Search request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// Video to search in
    pub video_id: Uuid,

    /// Free-text query
    #[schema(example = "a red car")]
    pub query: String,

    /// Number of results (defaults to the configured value)
    #[schema(example = 5)]
    pub top_k: Option<usize>,
}

/// One timestamp match
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResultItem {
    /// Seconds from the start of the video
    #[schema(example = 12.0)]
    pub timestamp: f64,
    /// Similarity in [0, 1]
    #[schema(example = 0.62)]
    pub score: f32,
    /// visual or audio
    #[serde(rename = "type")]
    #[schema(example = "visual")]
    pub modality: String,
    #[schema(example = "/thumbnails/550e8400-e29b-41d4-a716-446655440000_12.0.jpg")]
    pub thumbnail_url: Option<String>,
    pub transcript_snippet: Option<String>,
}

impl From<SearchResult> for SearchResultItem {
    fn from(result: SearchResult) -> Self {
        Self {
            timestamp: result.timestamp,
            score: result.score,
            modality: result.modality.as_str().to_string(),
            thumbnail_url: result.thumbnail_url,
            transcript_snippet: result.transcript_snippet,
        }
    }
}

/// Ranked matches
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponseBody {
    pub query: String,
    pub video_id: Uuid,
    pub results: Vec<SearchResultItem>,
    pub total_results: usize,
}

impl From<SearchResponse> for SearchResponseBody {
    fn from(response: SearchResponse) -> Self {
        Self {
            query: response.query,
            video_id: response.video_id,
            results: response.results.into_iter().map(Into::into).collect(),
            total_results: response.total_results,
        }
    }
}

/// Search one video for moments matching a query
#[utoipa::path(
    post,
    path = "/api/v1/search",
    tag = "search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Search results", body = SearchResponseBody),
        (status = 400, description = "Invalid query or top_k", body = crate::error::ApiError),
        (status = 404, description = "Video not indexed", body = crate::error::ApiError),
        (status = 502, description = "Embedding provider failed", body = crate::error::ApiError)
    )
)]
pub async fn search_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.increment_requests();

    let response = state
        .search
        .search(req.video_id, &req.query, req.top_k)
        .await?;
    Ok(Json(SearchResponseBody::from(response)))
}
