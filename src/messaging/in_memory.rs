//! # In-Memory Dispatch Queue
//!
//! Queue for tests and single-process deployments with visibility-timeout
//! semantics matching the PostgreSQL queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::dispatch_queue::{DispatchJob, DispatchQueue, JobState};
use super::errors::{MessagingError, MessagingResult};

#[derive(Debug, Clone)]
struct QueuedJob {
    job: DispatchJob,
    available_at: DateTime<Utc>,
    claimed_by: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
}

impl QueuedJob {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.job.state == JobState::Pending
            && self.available_at <= now
            && self.claimed_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDispatchQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl InMemoryDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a job regardless of state
    pub async fn job(&self, job_id: Uuid) -> Option<DispatchJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .find(|queued| queued.job.id == job_id)
            .map(|queued| queued.job.clone())
    }

    pub async fn jobs_for_task(&self, task_id: Uuid) -> Vec<DispatchJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|queued| queued.job.task_id == task_id)
            .map(|queued| queued.job.clone())
            .collect()
    }

    async fn with_pending<F>(
        &self,
        job_id: Uuid,
        operation: &'static str,
        apply: F,
    ) -> MessagingResult<()>
    where
        F: FnOnce(&mut QueuedJob),
    {
        let mut jobs = self.jobs.lock().await;
        let queued = jobs
            .iter_mut()
            .find(|queued| queued.job.id == job_id)
            .ok_or_else(|| MessagingError::job_not_found(job_id))?;
        if queued.job.state != JobState::Pending {
            return Err(MessagingError::InvalidJobState {
                job_id,
                state: queued.job.state.to_string(),
                operation,
            });
        }
        apply(queued);
        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, task_id: Uuid) -> MessagingResult<Uuid> {
        let now = Utc::now();
        let job = DispatchJob {
            id: Uuid::new_v4(),
            task_id,
            attempts: 0,
            state: JobState::Pending,
            last_error: None,
            created_at: now,
        };
        let job_id = job.id;
        self.jobs.lock().await.push(QueuedJob {
            job,
            available_at: now,
            claimed_by: None,
            claimed_until: None,
        });
        debug!(job_id = %job_id, task_id = %task_id, "Dispatch job enqueued");
        Ok(job_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<DispatchJob>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        let next = jobs
            .iter_mut()
            .filter(|queued| queued.is_claimable(now))
            .min_by_key(|queued| (queued.available_at, queued.job.created_at));

        Ok(next.map(|queued| {
            queued.job.attempts += 1;
            queued.claimed_by = Some(worker_id.to_string());
            queued.claimed_until = Some(after(now, visibility_timeout));
            queued.job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid) -> MessagingResult<()> {
        self.with_pending(job_id, "completed", |queued| {
            queued.job.state = JobState::Completed;
            queued.claimed_by = None;
            queued.claimed_until = None;
        })
        .await
    }

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> MessagingResult<()> {
        let available_at = after(Utc::now(), delay);
        self.with_pending(job_id, "retried", |queued| {
            queued.job.last_error = Some(error.to_string());
            queued.available_at = available_at;
            queued.claimed_by = None;
            queued.claimed_until = None;
        })
        .await
    }

    async fn release(&self, job_id: Uuid) -> MessagingResult<()> {
        let now = Utc::now();
        self.with_pending(job_id, "released", |queued| {
            queued.job.attempts = queued.job.attempts.saturating_sub(1);
            queued.available_at = now;
            queued.claimed_by = None;
            queued.claimed_until = None;
        })
        .await
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> MessagingResult<()> {
        self.with_pending(job_id, "dead-lettered", |queued| {
            queued.job.state = JobState::Dead;
            queued.job.last_error = Some(error.to_string());
            queued.claimed_by = None;
            queued.claimed_until = None;
        })
        .await
    }

    async fn dead_letters(&self) -> MessagingResult<Vec<DispatchJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|queued| queued.job.state == JobState::Dead)
            .map(|queued| queued.job.clone())
            .collect())
    }

    async fn pending_count(&self) -> MessagingResult<usize> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|queued| queued.job.state == JobState::Pending)
            .count())
    }
}
