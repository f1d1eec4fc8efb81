//! Error types for the serving stack.
//!
//! Layer code works in `candle_core::Result`; everything is converted into
//! [`ServeError`] at the worker and adapter boundaries.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    /// The model could not be constructed. Fatal at startup.
    #[error("failed to load model `{model_id}`: {reason}")]
    Load { model_id: String, reason: String },

    /// The request body could not be turned into a prompt batch.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Tokenization, a forward pass or decoding failed for this request.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ServeError {
    pub fn load(model_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ServeError::Load {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ServeError::MalformedRequest(msg.into())
    }

    pub fn generation(msg: impl std::fmt::Display) -> Self {
        ServeError::Generation(msg.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServeError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ServeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServeError::Load { .. } | ServeError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServeError>;
