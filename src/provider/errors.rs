use thiserror::Error;

/// Failures talking to the completion provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Provider returned HTTP {status} during {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Provider returned no usable identifier for {operation}")]
    EmptyIdentifier { operation: String },

    #[error("Provider payload for {operation} could not be decoded: {message}")]
    InvalidPayload { operation: String, message: String },

    #[error("Run {run_id} finished with status {status}")]
    RunFailed { run_id: String, status: String },

    #[error("Thread {thread_id} has no answer to read")]
    EmptyResponse { thread_id: String },

    #[error("Run {run_id} did not finish within {timeout_seconds}s")]
    Timeout { run_id: String, timeout_seconds: u64 },
}

impl ProviderError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub fn empty_identifier(operation: impl Into<String>) -> Self {
        Self::EmptyIdentifier {
            operation: operation.into(),
        }
    }

    pub fn invalid_payload(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a later attempt might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::EmptyIdentifier { .. }
            | Self::RunFailed { .. }
            | Self::EmptyResponse { .. }
            | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidPayload { .. } => false,
        }
    }

    /// The remote resource does not exist (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
