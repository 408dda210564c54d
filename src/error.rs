//! Error types for Bastion Core.
//!
//! Defines a unified error type that maps cleanly to HTTP responses.
//! Per-pipeline execution failures are a separate typed error
//! (`pipeline::PipelineExecutionError`); they are contained by the
//! orchestrator and never surface here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Unified error type for Bastion Core operations.
#[derive(Debug, Error)]
pub enum BastionError {
    /// The requested flow is not registered.
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    /// A flow references a pipeline absent from the live registry. This is
    /// a configuration-integrity error, surfaced before any pipeline runs.
    #[error("Flow '{flow}' references unknown pipeline '{pipeline}'")]
    UnknownPipeline { flow: String, pipeline: String },

    /// No manager with this identifier exists.
    #[error("Unknown manager: {0}")]
    UnknownManager(String),

    /// The backend identifier is not registered with the manager.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// The target backend failed its liveness probe at switch time.
    #[error("Backend '{id}' is unavailable: {reason}")]
    BackendUnavailable { id: String, reason: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body for API clients.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for BastionError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            BastionError::UnknownFlow(_) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_FLOW", self.to_string(), None)
            }
            BastionError::UnknownPipeline { .. } => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_PIPELINE",
                self.to_string(),
                None,
            ),
            BastionError::UnknownManager(_) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_MANAGER",
                self.to_string(),
                None,
            ),
            BastionError::UnknownBackend(_) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_BACKEND",
                self.to_string(),
                None,
            ),
            BastionError::BackendUnavailable { .. } => (
                StatusCode::CONFLICT,
                "BACKEND_UNAVAILABLE",
                self.to_string(),
                None,
            ),
            BastionError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            BastionError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                "Configuration error".to_string(),
                Some(msg.clone()),
            ),
            BastionError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for Bastion operations.
pub type BastionResult<T> = Result<T, BastionError>;
