//! # PostgreSQL Dispatch Queue
//!
//! Durable queue over the `dispatch_jobs` table. Workers claim atomically with
//! `FOR UPDATE SKIP LOCKED`, so several orchestrator processes can share one
//! table without double-claiming a job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::dispatch_queue::{DispatchJob, DispatchQueue, JobState};
use super::errors::{MessagingError, MessagingResult};

#[derive(Debug, Clone)]
pub struct PgDispatchQueue {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    task_id: Uuid,
    attempts: i32,
    state: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> MessagingResult<DispatchJob> {
        Ok(DispatchJob {
            id: self.id,
            task_id: self.task_id,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            state: self
                .state
                .parse::<JobState>()
                .map_err(MessagingError::internal)?,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

fn query_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> MessagingError {
    move |err| MessagingError::database_query(operation, err.to_string())
}

impl PgDispatchQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a state change touched no row
    async fn ensure_updated(
        &self,
        operation: &'static str,
        job_id: Uuid,
        rows_affected: u64,
    ) -> MessagingResult<()> {
        if rows_affected > 0 {
            return Ok(());
        }
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM dispatch_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error(operation))?;
        Err(match state {
            Some(state) => MessagingError::InvalidJobState {
                job_id,
                state,
                operation,
            },
            None => MessagingError::job_not_found(job_id),
        })
    }
}

#[async_trait]
impl DispatchQueue for PgDispatchQueue {
    #[instrument(skip(self))]
    async fn enqueue(&self, task_id: Uuid) -> MessagingResult<Uuid> {
        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO dispatch_jobs (id, task_id, attempts, state, available_at)
            VALUES ($1, $2, 0, 'pending', NOW())
            "#,
        )
        .bind(job_id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("enqueue"))?;

        debug!(job_id = %job_id, "Dispatch job enqueued");
        Ok(job_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<DispatchJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE dispatch_jobs
            SET attempts = attempts + 1,
                claimed_by = $1,
                claimed_until = NOW() + make_interval(secs => $2),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM dispatch_jobs
                WHERE state = 'pending'
                  AND available_at <= NOW()
                  AND (claimed_until IS NULL OR claimed_until <= NOW())
                ORDER BY available_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, task_id, attempts, state, last_error, created_at
            "#,
        )
        .bind(worker_id)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("claim"))?;

        row.map(JobRow::into_job).transpose()
    }

    async fn complete(&self, job_id: Uuid) -> MessagingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_jobs
            SET state = 'completed', claimed_by = NULL, claimed_until = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("complete"))?;
        self.ensure_updated("completed", job_id, result.rows_affected())
            .await
    }

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> MessagingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_jobs
            SET available_at = NOW() + make_interval(secs => $2),
                last_error = $3,
                claimed_by = NULL,
                claimed_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(query_error("retry"))?;
        self.ensure_updated("retried", job_id, result.rows_affected())
            .await
    }

    async fn release(&self, job_id: Uuid) -> MessagingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_jobs
            SET attempts = GREATEST(attempts - 1, 0),
                available_at = NOW(),
                claimed_by = NULL,
                claimed_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("release"))?;
        self.ensure_updated("released", job_id, result.rows_affected())
            .await
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> MessagingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_jobs
            SET state = 'dead',
                last_error = $2,
                claimed_by = NULL,
                claimed_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(query_error("dead_letter"))?;
        self.ensure_updated("dead-lettered", job_id, result.rows_affected())
            .await
    }

    async fn dead_letters(&self) -> MessagingResult<Vec<DispatchJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, task_id, attempts, state, last_error, created_at
            FROM dispatch_jobs
            WHERE state = 'dead'
            ORDER BY updated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("dead_letters"))?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn pending_count(&self) -> MessagingResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_jobs WHERE state = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(query_error("pending_count"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
