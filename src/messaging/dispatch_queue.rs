//! # Dispatch Queue
//!
//! Durable queue of orchestration requests consumed by the background worker
//! pool. A claimed job stays invisible to other workers until its visibility
//! timeout passes; a worker that dies mid-attempt therefore hands the job
//! back automatically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::errors::MessagingResult;

/// Lifecycle of a dispatch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed, or claimed and in flight
    Pending,
    Completed,
    /// Gave up after exhausting attempts or on a permanent failure
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(format!("Unknown job state: {other}")),
        }
    }
}

/// One request to run the orchestration workflow for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Attempts started so far, including the current one once claimed
    pub attempts: u32,
    pub state: JobState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Add a job for `task_id`, visible immediately
    async fn enqueue(&self, task_id: Uuid) -> MessagingResult<Uuid>;

    /// Claim the oldest visible job and count a new attempt against it
    async fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<DispatchJob>>;

    async fn complete(&self, job_id: Uuid) -> MessagingResult<()>;

    /// Hand the job back, visible again after `delay`
    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> MessagingResult<()>;

    /// Hand the job back immediately without counting the interrupted attempt
    async fn release(&self, job_id: Uuid) -> MessagingResult<()>;

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> MessagingResult<()>;

    async fn dead_letters(&self) -> MessagingResult<Vec<DispatchJob>>;

    /// Jobs still pending, claimed or not
    async fn pending_count(&self) -> MessagingResult<usize>;
}
