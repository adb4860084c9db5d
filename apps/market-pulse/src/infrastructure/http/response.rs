//! HTTP response DTOs and error mapping.

use std::collections::BTreeSet;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::application::services::EngineError;
use crate::domain::quote::Ticker;

/// Tickers the caller now watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickersResponse {
    /// Watched set after the call.
    pub tickers: BTreeSet<Ticker>,
}

/// API error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine-readable code, e.g. `UNAUTHORIZED`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// Engine rejected the call.
    Engine(EngineError),
    /// Body or path could not be decoded.
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Engine(EngineError::Unauthorized(_)) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Engine(EngineError::InvalidRequest(_)) | Self::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
            }
            Self::Engine(EngineError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Engine(EngineError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::Engine(e) => e.to_string(),
            Self::BadRequest(message) => message.clone(),
        };

        if status.is_server_error() {
            tracing::error!(code, message = %message, "Request failed");
        }

        (
            status,
            Json(ApiErrorResponse {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
