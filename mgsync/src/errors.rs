use crate::db::errors::DbError;
use crate::sync::scheduler::TriggerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    NotFound { resource: String, id: String },

    /// A sync cycle did not complete, usually because Model Garden could not be fetched
    #[error("sync failed: {message}")]
    SyncFailed { message: String },

    /// The background worker refused a trigger
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::SyncFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::Trigger(TriggerError::QueueFull) => StatusCode::TOO_MANY_REQUESTS,
            Error::Trigger(TriggerError::Stopped) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { .. } => self.to_string(),
            Error::SyncFailed { message } => format!("Sync failed: {message}"),
            Error::Trigger(e) => e.to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::SyncFailed { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Database(_) | Error::Trigger(_) => {
                tracing::warn!("Request rejected: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = json!({ "message": self.user_message() });
        (status, axum::response::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_sync_is_bad_gateway() {
        let err = Error::SyncFailed {
            message: "upstream returned 503 Service Unavailable: maintenance".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.user_message(), "Sync failed: upstream returned 503 Service Unavailable: maintenance");
    }

    #[test]
    fn test_database_errors_do_not_leak_details() {
        let err = Error::Database(DbError::Other(anyhow::anyhow!("connection refused at 10.0.0.3")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Database error occurred");

        let err = Error::Database(DbError::unique("projects", "duplicate key"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_trigger_errors() {
        assert_eq!(Error::Trigger(TriggerError::QueueFull).status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Error::Trigger(TriggerError::Stopped).status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
