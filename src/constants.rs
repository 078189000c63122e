//! # System Constants
//!
//! Lock-key prefixes, status codes and operational defaults shared by the
//! orchestration engine.

use std::time::Duration;

pub use crate::state_machine::{ResourceEvent, ResourceStatus};

/// Lock key prefixes. Each prefix names one locking concern; keys built from
/// different prefixes never contend with each other.
pub mod lock_prefixes {
    /// Serializes orchestration and mutation of a single task document
    pub const TASK: &str = "task";
    /// Serializes public id assignment for tasks created under one tenant
    pub const TENANT_CREATE: &str = "tenant-create";
    /// Serializes get-or-create of configurations under one tenant
    pub const CONFIGURATION_CREATE: &str = "configuration-create";
}

/// Persisted status codes (`SMALLINT` columns)
pub mod status_codes {
    pub const ACTIVE: i16 = 1;
    pub const ARCHIVED: i16 = 2;
    pub const QUEUED: i16 = 3;
    pub const PROCESSING: i16 = 4;
    pub const ERROR: i16 = 5;
}

/// Operational defaults used when configuration omits a value
pub mod defaults {
    use super::Duration;

    /// Interval between run status polls
    pub const POLL_INTERVAL: Duration = Duration::from_secs(25);
    /// Upper bound on waiting for a single remote run
    pub const RUN_DEADLINE: Duration = Duration::from_secs(600);
    /// How long synchronous callers wait for a task lock before giving up
    pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(250);
    /// Number of provider messages requested when reading the answer
    pub const LIST_MESSAGES_LIMIT: u32 = 20;
    pub const WORKER_COUNT: usize = 4;
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(900);
    pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Role names understood by the completion provider
pub mod roles {
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
}
