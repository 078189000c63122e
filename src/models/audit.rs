use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The end user a mutation is performed on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    /// Address the originating request came from, if known
    pub ip: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id, ip: None }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Created/modified bookkeeping carried by every persisted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub created_from_ip: Option<String>,
    pub modified_by: Uuid,
    pub modified_at: DateTime<Utc>,
    pub modified_from_ip: Option<String>,
}

impl AuditInfo {
    pub fn created_by(actor: &Actor) -> Self {
        let now = Utc::now();
        Self {
            created_by: actor.user_id,
            created_at: now,
            created_from_ip: actor.ip.clone(),
            modified_by: actor.user_id,
            modified_at: now,
            modified_from_ip: actor.ip.clone(),
        }
    }

    pub fn touch(&mut self, actor: &Actor) {
        self.modified_by = actor.user_id;
        self.modified_at = Utc::now();
        self.modified_from_ip = actor.ip.clone();
    }

    /// Record a modification made by the orchestration engine itself
    pub fn touch_system(&mut self) {
        self.modified_at = Utc::now();
    }
}
