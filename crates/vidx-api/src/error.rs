//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vidx_core::VidxError;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    #[schema(example = "NOT_FOUND")]
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    PayloadTooLarge(String),
    Conflict(String),
    UnprocessableMedia(String),
    Provider(String),
    Unavailable(String),
    Configuration(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(&msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ApiError::new("PAYLOAD_TOO_LARGE", msg),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::UnprocessableMedia(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("MEDIA_ERROR", msg),
            ),
            AppError::Provider(msg) => (
                StatusCode::BAD_GATEWAY,
                ApiError::new("PROVIDER_ERROR", "AI provider request failed").with_details(msg),
            ),
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("SERVICE_UNAVAILABLE", msg),
            ),
            AppError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("CONFIGURATION_ERROR", "Server is misconfigured").with_details(msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal_error().with_details(msg),
            ),
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<VidxError> for AppError {
    fn from(err: VidxError) -> Self {
        // Provider bodies stay in the logs; clients get the normalized summary
        if matches!(err, VidxError::Provider { .. } | VidxError::Other(_)) {
            tracing::warn!(error = %err, "Request failed");
        }
        let message = err.user_message();

        match err {
            VidxError::NotFound(msg) => AppError::NotFound(msg),
            VidxError::Validation(_) => AppError::BadRequest(message),
            VidxError::Media(_) => AppError::UnprocessableMedia(message),
            VidxError::Conflict(_) | VidxError::Cancelled => AppError::Conflict(message),
            VidxError::Provider { .. } => AppError::Provider(message),
            VidxError::Infrastructure { .. } => AppError::Unavailable(message),
            VidxError::Configuration(_) | VidxError::DimensionMismatch { .. } => {
                AppError::Configuration(message)
            }
            VidxError::Other(_) => AppError::Internal(message),
        }
    }
}
