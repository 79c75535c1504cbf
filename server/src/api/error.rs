//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorBody;

/// Failures in the HTTP adapter itself, outside the proxy core
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid upstream status code: {0}")]
    InvalidStatus(u16),

    #[error("Failed to build response: {0}")]
    Response(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Failed to convert proxy response");

        let mut response = (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new(self.to_string())),
        )
            .into_response();

        for (name, value) in crate::proxy::cors_headers() {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::try_from(name),
                axum::http::HeaderValue::try_from(value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

impl From<axum::http::Error> for ApiError {
    fn from(err: axum::http::Error) -> Self {
        ApiError::Response(err.to_string())
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::Response(err.to_string())
    }
}
