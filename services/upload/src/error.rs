use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors that can end an upload request
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed id, disallowed content type, missing or oversized body
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer credential
    #[error("{0}")]
    Unauthorized(String),

    /// Caller is not the owner of the record
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Failed to probe video: {0}")]
    Probe(String),

    #[error("Failed to remux video for fast start: {0}")]
    Remux(String),

    /// Object store write, presign or metadata write failure
    #[error("{context}: {detail}")]
    Storage {
        context: &'static str,
        detail: String,
    },

    #[error("Failed to stage upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn storage(context: &'static str, detail: impl ToString) -> Self {
        Self::Storage {
            context,
            detail: detail.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            // Ownership failures answer 401, same as a bad credential
            Self::Unauthorized(_) | Self::Forbidden(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Probe(_)
            | Self::Remux(_)
            | Self::Storage { .. }
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the client. Server-side failures keep
    /// their detail (tool stderr, SQL errors) out of the response.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg) => msg.clone(),
            Self::Probe(_) => "Failed to get aspect ratio".to_string(),
            Self::Remux(_) => "Failed to convert for fast start".to_string(),
            Self::Storage { context, .. } => (*context).to_string(),
            Self::Io(_) => "Failed to store a file".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PipelineError::Validation("invalid media type".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::Forbidden("User is not owner of video".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PipelineError::NotFound("Couldn't find the video".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PipelineError::Remux("exit status 1".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = PipelineError::storage("Failed to store the video in s3", "AccessDenied: bucket policy");
        assert_eq!(err.public_message(), "Failed to store the video in s3");
        assert!(err.to_string().contains("AccessDenied"));

        let err = PipelineError::Probe("moov atom not found".into());
        assert_eq!(err.public_message(), "Failed to get aspect ratio");
        assert!(!err.is_client_error());
    }
}
