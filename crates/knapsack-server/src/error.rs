//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use knapsack_common::KnapsackError;
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Import error: {0}")]
    Import(#[from] KnapsackError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Fetch(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Import(KnapsackError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            },
            AppError::Import(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            AppError::Import(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(message) | AppError::NotFound(message) => message,
            AppError::Fetch(message) => {
                tracing::error!("Fetch error: {}", message);
                message
            },
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                message
            },
            AppError::Import(e) => {
                if status.is_server_error() {
                    tracing::error!("Import error: {:?}", e);
                }
                e.to_string()
            },
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
