use service_core::error::AppError;
use thiserror::Error;

use crate::models::NotificationStatus;

/// Failures of store, dispatch and inbox operations.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error("Notification {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("Notification id already exists: {0}")]
    DuplicateId(String),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),
}

impl From<mongodb::error::Error> for NotificationError {
    fn from(err: mongodb::error::Error) -> Self {
        NotificationError::Storage(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for NotificationError {
    fn from(err: validator::ValidationErrors) -> Self {
        NotificationError::Validation(err.to_string())
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            NotificationError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            NotificationError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            NotificationError::DuplicateId(_) => {
                AppError::InternalError(anyhow::anyhow!(err.to_string()))
            }
            NotificationError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}
