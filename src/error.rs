//! # Error Types
//!
//! Crate-wide error taxonomy. Synchronous callers see validation, not-found
//! and conflict failures directly; background failures end up on the task as
//! its `Error` status and `last_error`.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::database::StorageError;
use crate::locks::LockError;
use crate::messaging::MessagingError;
use crate::provider::ProviderError;
use crate::state_machine::StateMachineError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The resource is busy or in a state that forbids the request
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Lock error: {0}")]
    LockTimeout(LockError),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Whether the dispatcher should requeue the attempt that raised this
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            Self::Storage(_) | Self::LockTimeout(_) => true,
            Self::Messaging(err) => err.is_transient(),
            Self::Validation { .. }
            | Self::NotFound { .. }
            | Self::Conflict(_)
            | Self::StateTransition(_)
            | Self::Configuration(_)
            | Self::Cancelled(_)
            | Self::Internal(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled(_) | Self::LockTimeout(LockError::Cancelled { .. })
        )
    }
}

impl From<LockError> for CoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Cancelled { key } => Self::Cancelled(format!("waiting for lock {key}")),
            timeout @ LockError::Timeout { .. } => Self::LockTimeout(timeout),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
