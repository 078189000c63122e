//! # Messaging Error Types

use thiserror::Error;
use uuid::Uuid;

/// Dispatch queue failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Dispatch job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    #[error("Dispatch job {job_id} is {state} and cannot be {operation}")]
    InvalidJobState {
        job_id: Uuid,
        state: String,
        operation: &'static str,
    },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn job_not_found(job_id: Uuid) -> Self {
        Self::JobNotFound { job_id }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the queue operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseQuery { .. })
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
