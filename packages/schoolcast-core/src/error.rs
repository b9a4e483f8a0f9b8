//! Centralized error types for the Schoolcast core library.
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

use crate::audio::AudioError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for AudioError {
    fn code(&self) -> &'static str {
        match self {
            Self::Generation(_) => "audio_generation_failed",
            Self::Playback(_) => "playback_failed",
            Self::Io(_) => "audio_io_failed",
        }
    }
}

/// Error type returned by every core broadcast operation.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BroadcastError {
    /// A target token matched neither a device nor a group.
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// The receiver protocol cannot address the device's grid position.
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Requested preview or job does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with the current lifecycle state.
    ///
    /// Typically a concurrent double approve/reject of the same preview.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The audio collaborator failed to produce the preview audio.
    #[error("Preview generation failed: {0}")]
    PreviewGeneration(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client is not admitted by the access gate.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Startup configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BroadcastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTarget(_) => "unknown_target",
            Self::UnsupportedDevice(_) => "unsupported_device",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::PreviewGeneration(_) => "preview_generation_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Forbidden(_) => "forbidden",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownTarget(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::PreviewGeneration(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnsupportedDevice(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for BroadcastError {
    fn code(&self) -> &'static str {
        BroadcastError::code(self)
    }
}

/// Convenient Result alias for broadcast operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BroadcastError {
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

impl From<AudioError> for BroadcastError {
    fn from(err: AudioError) -> Self {
        Self::PreviewGeneration(err.to_string())
    }
}
