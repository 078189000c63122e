//! # Orchestration
//!
//! Drives tasks through the completion provider. The [`TaskService`] accepts
//! work synchronously, the [`BackgroundDispatcher`] schedules it, and the
//! [`CompletionWorkflow`] performs one turn per attempt under the task lock.

pub mod backoff;
pub mod dispatcher;
pub mod system;
pub mod task_service;
pub mod workflow;

pub use backoff::BackoffPolicy;
pub use dispatcher::BackgroundDispatcher;
pub use system::{OrchestrationSystem, SystemStatus};
pub use task_service::{CreateTaskRequest, SubmitMessageRequest, TaskService};
pub use workflow::{
    CompletionWorkflow, ExecutionAttempt, FailureDisposition, WorkflowConfig, WorkflowFailure,
    WorkflowOutcome,
};
