//! # Domain Models
//!
//! Documents owned by the orchestration engine. Tasks embed their messages
//! and are persisted as one unit.

pub mod audit;
pub mod configuration;
pub mod message;
pub mod task;

pub use audit::{Actor, AuditInfo};
pub use configuration::{Configuration, NewConfiguration};
pub use message::Message;
pub use task::{RemoteBinding, Task};
