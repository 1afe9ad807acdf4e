//! Error types for refdesk-assist.

use crate::gateway::GatewayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Step of session creation at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStep {
    Upload,
    ResolveProfile,
    CreateIndex,
    CreateSession,
    SeedContext,
    Store,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::ResolveProfile => "resolve_profile",
            Self::CreateIndex => "create_index",
            Self::CreateSession => "create_session",
            Self::SeedContext => "seed_context",
            Self::Store => "store",
        };
        f.write_str(name)
    }
}

/// Service errors.
#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("A run is already in progress for session {0}")]
    RunInProgress(String),

    #[error("Provider call '{operation}' failed: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("Run {run_id} failed: {reason}")]
    RunFailed { run_id: String, reason: String },

    #[error("Run {run_id} on session {session_id} timed out after {elapsed_secs}s")]
    Timeout {
        session_id: String,
        run_id: String,
        elapsed_secs: u64,
    },

    #[error("Response did not contain a valid answer list: {0}")]
    Parse(String),

    #[error("Session creation failed at step '{step}': {source}")]
    Upload {
        step: UploadStep,
        #[source]
        source: Box<AssistError>,
    },
}

impl AssistError {
    pub(crate) fn upstream(operation: &'static str, source: GatewayError) -> Self {
        Self::Upstream { operation, source }
    }

    /// Stable error code for callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SessionNotFound(_) => "NOT_FOUND",
            Self::SessionExists(_) => "CONFLICT",
            Self::RunInProgress(_) => "RUN_IN_PROGRESS",
            Self::Upstream { .. } | Self::RunFailed { .. } => "UPSTREAM_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Upload { .. } => "UPLOAD_ERROR",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExists(_) | Self::RunInProgress(_) => StatusCode::CONFLICT,
            Self::Upstream { .. } | Self::RunFailed { .. } | Self::Parse(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upload { source, .. } => source.status_code(),
        }
    }
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<UploadStep>,
}

impl IntoResponse for AssistError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let step = match &self {
            AssistError::Upload { step, .. } => Some(*step),
            _ => None,
        };

        let body = serde_json::json!({
            "success": false,
            "error": ApiError {
                code: self.kind().to_string(),
                message: self.to_string(),
                step,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AssistError::SessionNotFound("thread_abc".to_string());
        assert_eq!(err.to_string(), "Session not found: thread_abc");
    }

    #[test]
    fn test_upload_error_names_step() {
        let err = AssistError::Upload {
            step: UploadStep::CreateIndex,
            source: Box::new(AssistError::upstream(
                "create_index",
                GatewayError::Transport("connection reset".into()),
            )),
        };
        assert!(err.to_string().contains("'create_index'"));
        assert_eq!(err.kind(), "UPLOAD_ERROR");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_into_response() {
        let response = AssistError::Validation("empty document".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AssistError::RunInProgress("thread_1".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AssistError::Timeout {
            session_id: "thread_1".into(),
            run_id: "run_1".into(),
            elapsed_secs: 120,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
