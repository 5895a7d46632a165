use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::registry::ConnectionId;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection {0} is no longer registered")]
    Unregistered(ConnectionId),
    #[error("connection {0} writer has closed")]
    Closed(ConnectionId),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an account for {0} already exists")]
    DuplicateEmail(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),
}

/// Errors surfaced by the HTTP handlers. The message of each variant is what
/// clients see in the `detail` field.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("User with this email exists")]
    EmailTaken,
    #[error("User not found")]
    UserNotFound,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Invalid token")]
    InvalidToken,
    #[error("no user")]
    UnknownToken,
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(_) => ApiError::EmailTaken,
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::EmailTaken | ApiError::UserNotFound => StatusCode::BAD_REQUEST,
            ApiError::IncorrectPassword | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::UnknownToken => StatusCode::NOT_FOUND,
            ApiError::Hashing(_) | ApiError::Task(_) | ApiError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status.is_server_error() {
            error!(error = ?self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
