use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{info, warn};

use crate::{models::file::AvStatus, services::strategy::GatewayError};

/// HTTP error envelope returned by every handler.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// File the error refers to, when there is one.
    pub id: Option<String>,
    pub av_status: Option<AvStatus>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            id: None,
            av_status: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::new(StatusCode::NOT_FOUND, format!("file `{}` not found", id))
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(id) = self.id {
            body["id"] = json!(id);
        }
        if let Some(av_status) = self.av_status {
            body["avStatus"] = json!(av_status);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::NotFound { id } => {
                info!(id = %id, "file not found");
                AppError::not_found(&id)
            }
            GatewayError::NotClean { id, status } => {
                info!(id = %id, %status, "download refused, file not clean");
                AppError {
                    id: Some(id),
                    av_status: Some(status),
                    ..AppError::new(StatusCode::FORBIDDEN, message)
                }
            }
            GatewayError::InvalidMimeType(mime) => {
                info!(mime = %mime, "rejected upload");
                AppError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
            }
            GatewayError::PayloadTooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, message)
            }
            GatewayError::InvalidUpload(reason) => {
                warn!("invalid upload: {}", reason);
                AppError::new(StatusCode::BAD_REQUEST, message)
            }
            // Logged with context where they are raised.
            GatewayError::UnknownAvStatus(_) | GatewayError::StorageFault(_) => {
                AppError::internal(message)
            }
        }
    }
}
