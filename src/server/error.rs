use crate::error::{ErrorCategory, GatewayError, PdfJobError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// An error on its way to the client: a status and a short message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Input => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Forbidden => StatusCode::FORBIDDEN,
        ErrorCategory::Tool
        | ErrorCategory::Naming
        | ErrorCategory::Filesystem
        | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PdfJobError> for ApiError {
    fn from(e: PdfJobError) -> Self {
        let status = status_for(e.category());
        if status.is_server_error() {
            // Full chain, including captured tool output, stays in the log.
            let detail = match &e {
                PdfJobError::ToolFailed { source, .. } => source.output().to_string(),
                _ => String::new(),
            };
            error!("Request failed: {} {}", e, detail);
        }
        Self {
            status,
            message: e.public_message(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let message = match &e {
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::NotFound { .. } => "file not found",
            GatewayError::Materialize(inner) => {
                error!("Preview render failed: {}", inner);
                "failed to render preview"
            }
        };
        Self {
            status: status_for(e.category()),
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
