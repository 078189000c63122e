use thiserror::Error;
use uuid::Uuid;

/// Failures of the unit-of-work coordinator and the stores behind it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to begin unit of work: {0}")]
    Begin(String),

    #[error("Failed to commit unit of work: {0}")]
    Commit(String),

    #[error("Failed to roll back unit of work: {0}")]
    Rollback(String),

    #[error("Query failed during {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: Uuid },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: Uuid },

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Map a driver error raised during `operation`
    pub fn from_sqlx(operation: &str) -> impl FnOnce(sqlx::Error) -> Self + '_ {
        move |err| Self::query(operation, err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
