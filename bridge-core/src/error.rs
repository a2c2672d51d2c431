//! Centralized error types for the bridge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the bridge.
///
/// Variants line up with the error categories the bridge must be able to
/// recover from without crashing the process: a failing socket closes one
/// leg, a malformed frame is dropped, a storage hiccup falls back to a
/// fresh session.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// Transport failure on either leg (socket read/write, unexpected close).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame, unknown mandatory field, or out-of-order control message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Audio resampling or base64 decode failure.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Commit attempted below the minimum accumulated-audio threshold.
    #[error("Commit suppressed: {0}")]
    Commit(String),

    /// Function dispatch failed (unknown name, callable exception, JSON error).
    #[error("Function dispatch error: {0}")]
    FunctionDispatch(String),

    /// Session storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The AI service emitted an `error` event.
    #[error("AI service error: {0}")]
    AiService(String),

    /// Requested session does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but the requested transition/operation is invalid for its state.
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Protocol(_) => "protocol_error",
            Self::Audio(_) => "audio_error",
            Self::Commit(_) => "commit_suppressed",
            Self::FunctionDispatch(_) => "function_dispatch_error",
            Self::Storage(_) => "storage_error",
            Self::AiService(_) => "ai_service_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidSessionState(_) => "invalid_session_state",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::InvalidSessionState(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for BridgeError {
    fn code(&self) -> &'static str {
        BridgeError::code(self)
    }
}

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<redis::RedisError> for BridgeError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<hound::Error> for BridgeError {
    fn from(err: hound::Error) -> Self {
        Self::Internal(format!("wav writer: {err}"))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_returns_correct_code() {
        let err = BridgeError::SessionNotFound("c1".into());
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn configuration_error_is_service_unavailable() {
        let err = BridgeError::Configuration("missing ai_model_id".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
