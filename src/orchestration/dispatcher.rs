//! # Background Dispatcher
//!
//! Detaches orchestration from the request path. Callers enqueue a job and
//! return at once; a bounded pool of workers claims jobs from the durable
//! queue and runs the workflow. Failed attempts are requeued with backoff or
//! dead-lettered; shutdown cancels in-flight attempts, which hand their jobs
//! back to the queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::workflow::{CompletionWorkflow, ExecutionAttempt, FailureDisposition, WorkflowOutcome};
use crate::config::DispatcherConfig;
use crate::error::{CoreError, CoreResult};
use crate::messaging::{DispatchJob, DispatchQueue};

/// Owns the worker pool consuming the dispatch queue
pub struct BackgroundDispatcher {
    queue: Arc<dyn DispatchQueue>,
    workflow: CompletionWorkflow,
    backoff: BackoffPolicy,
    config: DispatcherConfig,
    wakeup: Arc<Notify>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl std::fmt::Debug for BackgroundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackgroundDispatcher {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        workflow: CompletionWorkflow,
        backoff: BackoffPolicy,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            workflow,
            backoff,
            config,
            wakeup: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            running: RwLock::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<dyn DispatchQueue> {
        &self.queue
    }

    /// Spawn the worker pool. A dispatcher that has been shut down cannot be
    /// started again.
    pub async fn start(&self) -> CoreResult<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(CoreError::conflict("Dispatcher is already running"));
        }
        if self.shutdown.is_cancelled() {
            return Err(CoreError::conflict("Dispatcher has been shut down"));
        }

        info!(
            workers = self.config.worker_count,
            "🚀 DISPATCHER: Starting worker pool"
        );

        let mut workers = self.workers.lock().await;
        for index in 0..self.config.worker_count {
            let worker = Worker {
                id: format!("dispatcher-worker-{index}"),
                queue: self.queue.clone(),
                workflow: self.workflow.clone(),
                backoff: self.backoff.clone(),
                config: self.config.clone(),
                wakeup: self.wakeup.clone(),
                token: self.shutdown.child_token(),
            };
            workers.push(tokio::spawn(worker.run()));
        }

        *running = true;
        info!("✅ DISPATCHER: Worker pool started");
        Ok(())
    }

    /// Enqueue orchestration for `task_id` and wake an idle worker
    #[instrument(skip(self))]
    pub async fn dispatch(&self, task_id: Uuid) -> CoreResult<Uuid> {
        let job_id = self.queue.enqueue(task_id).await?;
        self.wakeup.notify_one();
        debug!(job_id = %job_id, "Dispatched task");
        Ok(job_id)
    }

    /// Cancel workers and in-flight attempts, waiting up to `timeout` for
    /// them to hand their jobs back
    pub async fn shutdown(&self, timeout: Duration) -> CoreResult<()> {
        let mut running = self.running.write().await;
        self.shutdown.cancel();
        if !*running {
            info!("DISPATCHER: Already stopped");
            return Ok(());
        }

        info!("🛑 DISPATCHER: Stopping worker pool");
        self.wakeup.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        *running = false;

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        error!(error = %err, "Dispatcher worker ended abnormally");
                    }
                }
                info!("✅ DISPATCHER: Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "DISPATCHER: Workers did not stop in time and were aborted"
                );
                Err(CoreError::Internal(format!(
                    "dispatcher workers did not stop within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

struct Worker {
    id: String,
    queue: Arc<dyn DispatchQueue>,
    workflow: CompletionWorkflow,
    backoff: BackoffPolicy,
    config: DispatcherConfig,
    wakeup: Arc<Notify>,
    token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        while !self.token.is_cancelled() {
            match self
                .queue
                .claim(&self.id, self.config.visibility_timeout())
                .await
            {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.idle().await,
                Err(err) => {
                    error!(worker_id = %self.id, error = %err, "Failed to claim dispatch job");
                    self.idle().await;
                }
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.wakeup.notified() => {}
            _ = tokio::time::sleep(self.config.idle_poll_interval()) => {}
        }
    }

    async fn process(&self, job: DispatchJob) {
        let attempt = ExecutionAttempt::new(job.attempts, self.config.max_attempts);
        debug!(
            worker_id = %self.id,
            job_id = %job.id,
            task_id = %job.task_id,
            attempt = attempt.number,
            "Processing dispatch job"
        );

        let settled = match self.workflow.execute(job.task_id, attempt, &self.token).await {
            Ok(outcome) => {
                if let WorkflowOutcome::Completed { message_id } = outcome {
                    info!(
                        task_id = %job.task_id,
                        message_id = %message_id,
                        "✅ DISPATCHER: Task turn completed"
                    );
                }
                self.queue.complete(job.id).await
            }
            Err(failure) => match failure.disposition {
                FailureDisposition::Retry => {
                    let delay = self.backoff.delay_for(attempt.number);
                    debug!(
                        job_id = %job.id,
                        delay_ms = delay.as_millis() as u64,
                        "Requeueing dispatch job"
                    );
                    self.queue
                        .retry(job.id, delay, &failure.error.to_string())
                        .await
                }
                FailureDisposition::Failed => {
                    warn!(
                        job_id = %job.id,
                        task_id = %job.task_id,
                        error = %failure.error,
                        "DISPATCHER: Dead-lettering dispatch job"
                    );
                    self.queue
                        .dead_letter(job.id, &failure.error.to_string())
                        .await
                }
                FailureDisposition::Released => self.queue.release(job.id).await,
            },
        };

        if let Err(err) = settled {
            error!(
                job_id = %job.id,
                task_id = %job.task_id,
                error = %err,
                "Failed to settle dispatch job; it becomes visible again after its timeout"
            );
        }
    }
}
