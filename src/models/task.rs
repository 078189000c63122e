use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::{Actor, AuditInfo};
use super::message::Message;
use crate::state_machine::{ResourceStatus, StateMachineError, StateMachineResult, Stateful};

/// One orchestrated unit of work tying a configuration to a remote session
/// and an ordered list of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Sequential number unique within the tenant
    pub public_id: i64,
    pub configuration_id: Uuid,
    pub remote_session_id: Option<String>,
    pub remote_thread_id: Option<String>,
    pub status: ResourceStatus,
    pub messages: Vec<Message>,
    /// Reason for the most recent failed turn
    pub last_error: Option<String>,
    pub audit: AuditInfo,
}

/// Remote identifiers bound to a task for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBinding {
    pub session_id: String,
    pub thread_id: String,
}

impl Task {
    /// A freshly created task holding the question and a placeholder for its answer
    pub fn new(
        tenant_id: Uuid,
        public_id: i64,
        configuration_id: Uuid,
        question: impl Into<String>,
        actor: &Actor,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            public_id,
            configuration_id,
            remote_session_id: None,
            remote_thread_id: None,
            status: ResourceStatus::Queued,
            messages: vec![Message::question(question), Message::pending_answer()],
            last_error: None,
            audit: AuditInfo::created_by(actor),
        }
    }

    pub fn remote_binding(&self) -> Option<RemoteBinding> {
        match (&self.remote_session_id, &self.remote_thread_id) {
            (Some(session_id), Some(thread_id)) => Some(RemoteBinding {
                session_id: session_id.clone(),
                thread_id: thread_id.clone(),
            }),
            _ => None,
        }
    }

    /// Bind the remote session. A binding, once set, is never reassigned.
    pub fn bind_remote(&mut self, binding: &RemoteBinding) -> StateMachineResult<()> {
        if self.remote_session_id.is_some() || self.remote_thread_id.is_some() {
            return Err(StateMachineError::RemoteSessionAlreadyBound { task_id: self.id });
        }
        self.remote_session_id = Some(binding.session_id.clone());
        self.remote_thread_id = Some(binding.thread_id.clone());
        self.audit.touch_system();
        Ok(())
    }

    /// Index of the message awaiting a provider response
    pub fn pending_message_index(&self) -> Option<usize> {
        self.messages.iter().position(Message::is_pending_response)
    }

    pub fn pending_message(&self) -> Option<&Message> {
        self.pending_message_index().map(|idx| &self.messages[idx])
    }

    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// The end-user question a provider message answers: the closest
    /// preceding message that did not come from the provider
    pub fn question_for(&self, message_id: Uuid) -> Option<&Message> {
        let idx = self.messages.iter().position(|m| m.id == message_id)?;
        self.messages[..idx].iter().rev().find(|m| !m.from_provider)
    }

    /// Append a follow-up question and its pending answer. Rejected while a
    /// previous question is still being answered or the task is not active.
    pub fn push_question(
        &mut self,
        content: impl Into<String>,
        actor: &Actor,
    ) -> StateMachineResult<(Uuid, Uuid)> {
        if self.pending_message_index().is_some() {
            return Err(StateMachineError::PendingResponse { task_id: self.id });
        }
        if self.status != ResourceStatus::Active {
            return Err(StateMachineError::NotAcceptingMessages {
                task_id: self.id,
                status: self.status,
            });
        }

        let question = Message::question(content);
        let answer = Message::pending_answer();
        let ids = (question.id, answer.id);
        self.messages.push(question);
        self.messages.push(answer);
        self.audit.touch(actor);
        Ok(ids)
    }
}

impl Stateful for Task {
    const ENTITY: &'static str = "task";

    fn status(&self) -> ResourceStatus {
        self.status
    }

    fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.audit.touch_system();
    }
}
