//! # Messaging Module
//!
//! Durable dispatch queue feeding the background worker pool. Jobs carry only
//! a task id; everything else is read from storage when the job runs.

pub mod dispatch_queue;
pub mod errors;
pub mod in_memory;
pub mod pg_queue;

pub use dispatch_queue::{DispatchJob, DispatchQueue, JobState};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryDispatchQueue;
pub use pg_queue::PgDispatchQueue;
