use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::{ResourceEvent, ResourceStatus, StateMachineResult, Stateful};

/// One turn of content within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub status: ResourceStatus,
    /// True when the provider produced this content, false for end-user input
    pub from_provider: bool,
    /// Remote identifier, set only once the content exists remotely
    pub remote_message_id: Option<String>,
    /// Remote run producing this message, recorded so a retry can resume it
    pub remote_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A question submitted by the end user. It is usable immediately.
    pub fn question(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            status: ResourceStatus::Active,
            from_provider: false,
            remote_message_id: None,
            remote_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Placeholder for the provider's answer, filled in by orchestration
    pub fn pending_answer() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: String::new(),
            status: ResourceStatus::Queued,
            from_provider: true,
            remote_message_id: None,
            remote_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Awaiting a provider response that has not been recorded yet
    pub fn is_pending_response(&self) -> bool {
        self.from_provider && self.status.is_pending() && self.remote_message_id.is_none()
    }

    /// Store the produced answer and move the message to `Active`
    pub fn complete_with(
        &mut self,
        content: impl Into<String>,
        remote_message_id: impl Into<String>,
    ) -> StateMachineResult<()> {
        self.apply(&ResourceEvent::Complete)?;
        self.content = content.into();
        self.remote_message_id = Some(remote_message_id.into());
        Ok(())
    }
}

impl Stateful for Message {
    const ENTITY: &'static str = "message";

    fn status(&self) -> ResourceStatus {
        self.status
    }

    fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
