//! HTTP response classification shared by all provider clients
//!
//! Raw response bodies are logged at debug level only; errors carry a short
//! status summary so nothing provider-specific reaches API users.

use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use vidx_core::{ProviderErrorKind, Result, VidxError};

/// Map an HTTP status to a provider error kind
pub fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderErrorKind::Timeout,
        s if s.is_server_error() => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::Rejected,
    }
}

/// `Retry-After` in delta-seconds form
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Pass through a successful response, classify anything else
pub async fn check_status(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(provider, status = status.as_u16(), body = %body, "Provider error response");

    Err(VidxError::Provider {
        kind: classify_status(status),
        message: format!("{provider} returned HTTP {}", status.as_u16()),
        retry_after,
    })
}

/// Classify a transport-level failure
pub fn transport_error(provider: &str, err: reqwest::Error) -> VidxError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_decode() {
        ProviderErrorKind::Malformed
    } else {
        ProviderErrorKind::Unavailable
    };
    tracing::debug!(provider, error = %err, "Provider request failed");
    VidxError::provider(kind, format!("{provider} request failed: {kind}"))
}

/// Decode a JSON body; an unexpected shape is a malformed response
pub async fn decode_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(provider, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(provider, error = %e, "Undecodable provider response");
        VidxError::provider(
            ProviderErrorKind::Malformed,
            format!("Failed to parse {provider} response: {e}"),
        )
    })
}
