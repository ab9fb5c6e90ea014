//! API error types
//!
//! Every failure leaves the server as `{ "message": ..., "error": ... }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coindash::error::RefreshError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request parameters
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong bearer token
    #[error("missing or invalid API token")]
    Unauthorized,

    /// Upstream failed while a fresh fetch was required
    #[error("{0}")]
    Upstream(String),

    /// Nothing live and nothing stored
    #[error("{0}")]
    NoData(String),

    /// A cycle holds the lock and this path does not wait
    #[error("refresh already in progress")]
    Busy,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NoData(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Busy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::NoData(_) => "NO_DATA_AVAILABLE",
            Self::Busy => "BUSY",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn invalid_asset_id(asset_id: &str) -> Self {
        Self::BadRequest(format!("invalid asset id '{asset_id}'"))
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NoFallbackDataAvailable(_) => Self::NoData(err.to_string()),
            RefreshError::UpstreamTimeout(_) | RefreshError::UpstreamUnavailable(_) => {
                Self::Upstream(err.to_string())
            }
            RefreshError::CycleInProgress => Self::Busy,
            RefreshError::StoreWriteFailure(_) | RefreshError::Store(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            message: self.to_string(),
            error: self.code(),
        };

        if status.is_server_error() {
            tracing::error!(error_code = body.error, error_message = %body.message, "API error");
        } else {
            tracing::warn!(error_code = body.error, error_message = %body.message, "API error");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coindash::error::UpstreamError;

    fn upstream() -> UpstreamError {
        UpstreamError::Status {
            endpoint: "coingecko-primary".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn refresh_errors_map_to_statuses() {
        let cases = [
            (
                RefreshError::NoFallbackDataAvailable(upstream()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RefreshError::UpstreamUnavailable(upstream()),
                StatusCode::BAD_GATEWAY,
            ),
            (RefreshError::CycleInProgress, StatusCode::SERVICE_UNAVAILABLE),
            (
                RefreshError::Store(anyhow::anyhow!("unreadable")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn no_data_message_is_passed_through() {
        let err = ApiError::from(RefreshError::NoFallbackDataAvailable(upstream()));
        assert!(err
            .to_string()
            .starts_with("Both price APIs failed and no stored data is available"));
        assert_eq!(err.code(), "NO_DATA_AVAILABLE");
    }
}
