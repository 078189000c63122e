//! # Completion Provider Client
//!
//! Boundary to the remote completion service. The orchestration workflow
//! calls these operations in order: create a session and a thread, post the
//! question, trigger a run, poll it, then read the newest message.
//!
//! Implementations must report "no usable identifier" as
//! [`ProviderError::EmptyIdentifier`] rather than returning an empty string.

pub mod errors;
pub mod http_client;
pub mod types;

use async_trait::async_trait;

pub use errors::{ProviderError, ProviderResult};
pub use http_client::{HttpCompletionProvider, HttpProviderConfig};
pub use types::{Role, RunHandle, RunStatus, SessionSpec, ThreadMessage};

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Establish a configured remote session, returning its identifier
    async fn create_session(&self, spec: &SessionSpec) -> ProviderResult<String>;

    /// Open a remote conversation context
    async fn create_thread(&self) -> ProviderResult<String>;

    /// Append content to a thread, returning the remote message identifier
    async fn post_message(&self, thread_id: &str, role: Role, content: &str)
        -> ProviderResult<String>;

    /// Ask the provider to produce a response on the thread
    async fn trigger_run(&self, thread_id: &str, session_id: &str) -> ProviderResult<RunHandle>;

    /// Check run status; the caller owns the polling cadence
    async fn poll_run(&self, thread_id: &str, run_id: &str) -> ProviderResult<RunStatus>;

    /// Messages on the thread, newest first
    async fn list_messages(&self, thread_id: &str) -> ProviderResult<Vec<ThreadMessage>>;

    async fn delete_session(&self, session_id: &str) -> ProviderResult<()>;

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()>;
}

/// Reject blank identifiers coming back from a provider
pub fn require_identifier(operation: &str, id: Option<String>) -> ProviderResult<String> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(ProviderError::empty_identifier(operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_identifier() {
        assert_eq!(
            require_identifier("create_thread", Some("thread_1".to_string())).unwrap(),
            "thread_1"
        );
        assert_eq!(
            require_identifier("create_thread", Some("  ".to_string())),
            Err(ProviderError::empty_identifier("create_thread"))
        );
        assert!(require_identifier("create_thread", None).is_err());
    }
}
