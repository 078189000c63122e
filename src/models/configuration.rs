use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::{Actor, AuditInfo};
use crate::provider::SessionSpec;
use crate::state_machine::ResourceStatus;

/// Prompt and model parameters a task runs against. Referenced, never
/// mutated, by in-flight tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub temperature: Option<f32>,
    /// Reference material the remote session is pre-loaded with
    pub reference_file_ids: Vec<String>,
    /// Remote assistant this configuration was trained against. When set,
    /// tasks run against it instead of creating a session of their own.
    pub remote_assistant_id: Option<String>,
    pub status: ResourceStatus,
    pub audit: AuditInfo,
}

/// Request shape for creating a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConfiguration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub reference_file_ids: Vec<String>,
    pub remote_assistant_id: Option<String>,
}

impl Configuration {
    pub fn from_request(request: NewConfiguration, actor: &Actor) -> Self {
        Self {
            id: request.id,
            tenant_id: request.tenant_id,
            name: request.name,
            model: request.model,
            instructions: request.instructions,
            temperature: request.temperature,
            reference_file_ids: request.reference_file_ids,
            remote_assistant_id: request.remote_assistant_id,
            status: ResourceStatus::Active,
            audit: AuditInfo::created_by(actor),
        }
    }

    /// Existing remote session every task of this configuration shares
    pub fn shared_session_id(&self) -> Option<&str> {
        self.remote_assistant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Build the spec used to create a task's remote session
    pub fn session_spec(&self, task_id: Uuid) -> SessionSpec {
        SessionSpec {
            name: format!("{}-{}", self.name, task_id),
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            reference_file_ids: self.reference_file_ids.clone(),
        }
    }
}
