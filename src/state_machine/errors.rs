use thiserror::Error;

use super::{ResourceEvent, ResourceStatus};

/// Errors raised by the resource state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid {entity} transition from {from} on {event}")]
    InvalidTransition {
        entity: &'static str,
        from: ResourceStatus,
        event: &'static str,
    },

    #[error("Remote session already bound for task {task_id}")]
    RemoteSessionAlreadyBound { task_id: uuid::Uuid },

    #[error("Task {task_id} already has a message awaiting a response")]
    PendingResponse { task_id: uuid::Uuid },

    #[error("Task {task_id} is {status} and cannot accept messages")]
    NotAcceptingMessages {
        task_id: uuid::Uuid,
        status: ResourceStatus,
    },
}

impl StateMachineError {
    pub fn invalid_transition(
        entity: &'static str,
        from: ResourceStatus,
        event: &ResourceEvent,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from,
            event: event.event_type(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
