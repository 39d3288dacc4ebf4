use crate::services::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP-facing error: a status code and a message rendered as JSON.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Conflict { .. } | StoreError::InUse { .. } => StatusCode::CONFLICT,
            StoreError::Invalid { .. } | StoreError::InvalidBundle(_) => StatusCode::BAD_REQUEST,
            StoreError::Sqlx(sqlx_err) => {
                tracing::error!(error = %sqlx_err, "storage failure");
                return Self::internal("internal storage error");
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let conflict = AppError::from(StoreError::Conflict {
            entity: "endpoint",
            name: "llama".into(),
        });
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.message, "endpoint `llama` already exists");

        let invalid = AppError::from(StoreError::invalid("trigger", "bad cron"));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let storage = AppError::from(StoreError::Sqlx(sqlx::Error::PoolTimedOut));
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!storage.message.contains("pool"));
    }
}
