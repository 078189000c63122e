//! # Completion Workflow
//!
//! Drives one task turn through the completion provider while holding the
//! task's keyed lock: open the remote session if the task has none, post the
//! question, trigger a run, poll it until it finishes, then store the newest
//! answer.
//!
//! Progress is committed step by step. Remote session and thread ids, the
//! posted question's remote id and the run id are persisted as soon as they
//! exist, so a later attempt resumes instead of creating duplicates. Ids
//! returned during an attempt that aborts before persisting them are deleted
//! best-effort.
//!
//! Every terminal failure leaves the pending message, and a task still in
//! `Processing`, in `Error` before the lock is released.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::OrchestrationConfig;
use crate::database::UnitOfWork;
use crate::error::{CoreError, CoreResult};
use crate::locks::{lock_keys, KeyedLockManager};
use crate::logging::{log_provider_operation, log_task_operation};
use crate::models::{Configuration, RemoteBinding, Task};
use crate::provider::{CompletionProvider, ProviderError, Role, RunStatus};
use crate::state_machine::{ResourceEvent, ResourceStatus, Stateful};

/// Timing of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub poll_interval: Duration,
    /// Give up on a run that has not finished after this long
    pub run_deadline: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self::from_config(&OrchestrationConfig::default())
    }
}

impl WorkflowConfig {
    pub fn from_config(config: &OrchestrationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            run_deadline: config.run_deadline(),
        }
    }
}

/// Position of the current attempt within the retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionAttempt {
    pub number: u32,
    pub max_attempts: u32,
}

impl ExecutionAttempt {
    pub fn new(number: u32, max_attempts: u32) -> Self {
        Self {
            number,
            max_attempts,
        }
    }

    /// An attempt with no retries behind it
    pub fn only() -> Self {
        Self::new(1, 1)
    }

    pub fn is_final(&self) -> bool {
        self.number >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// The pending message received its answer
    Completed { message_id: Uuid },
    /// Nothing on the task awaited a response
    NothingPending,
}

/// What the caller should do with the job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeue with backoff; the task was left as is
    Retry,
    /// Terminal; the task and its pending message were marked `Error`
    Failed,
    /// Interrupted by cancellation; hand the job back untouched
    Released,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("workflow attempt failed ({disposition:?}): {error}")]
pub struct WorkflowFailure {
    pub error: CoreError,
    pub disposition: FailureDisposition,
}

/// Remote ids created during this attempt and not yet stored on the task
#[derive(Debug, Default)]
struct UnpersistedRemote {
    session_id: Option<String>,
    thread_id: Option<String>,
}

impl UnpersistedRemote {
    fn clear(&mut self) {
        self.session_id = None;
        self.thread_id = None;
    }
}

fn ensure_active(token: &CancellationToken, step: &str) -> CoreResult<()> {
    if token.is_cancelled() {
        return Err(CoreError::Cancelled(format!("before {step}")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CompletionWorkflow {
    locks: Arc<KeyedLockManager>,
    uow: UnitOfWork,
    provider: Arc<dyn CompletionProvider>,
    config: WorkflowConfig,
}

impl std::fmt::Debug for CompletionWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWorkflow")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompletionWorkflow {
    pub fn new(
        locks: Arc<KeyedLockManager>,
        uow: UnitOfWork,
        provider: Arc<dyn CompletionProvider>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            locks,
            uow,
            provider,
            config,
        }
    }

    /// Run one attempt for `task_id`
    #[instrument(skip(self, token), fields(attempt = attempt.number))]
    pub async fn execute(
        &self,
        task_id: Uuid,
        attempt: ExecutionAttempt,
        token: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowFailure> {
        let key = lock_keys::task(task_id);
        let guard = match self.locks.lock_cancellable(&key, token).await {
            Ok(guard) => guard,
            Err(err) => {
                return Err(WorkflowFailure {
                    error: err.into(),
                    disposition: FailureDisposition::Released,
                })
            }
        };

        let mut unpersisted = UnpersistedRemote::default();
        let outcome = match self.drive(task_id, token, &mut unpersisted).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.compensate(task_id, &unpersisted).await;
                Err(self.handle_failure(task_id, error, attempt).await)
            }
        };

        guard.unlock();
        outcome
    }

    async fn drive(
        &self,
        task_id: Uuid,
        token: &CancellationToken,
        unpersisted: &mut UnpersistedRemote,
    ) -> CoreResult<WorkflowOutcome> {
        let (mut task, configuration) = self.load(task_id).await?;

        let Some(pending_idx) = task.pending_message_index() else {
            debug!(task_id = %task_id, "No message awaiting a response");
            return Ok(WorkflowOutcome::NothingPending);
        };
        let message_id = task.messages[pending_idx].id;

        let mut started = false;
        if task.status == ResourceStatus::Queued {
            task.apply(&ResourceEvent::Start)?;
            started = true;
        }
        if task.messages[pending_idx].status == ResourceStatus::Queued {
            task.messages[pending_idx].apply(&ResourceEvent::Start)?;
            started = true;
        }
        if started {
            self.persist(&task).await?;
            log_task_operation("start", task_id, Some(task.tenant_id), task.status, None);
        }

        let binding = match task.remote_binding() {
            Some(binding) => binding,
            None => {
                let binding = self
                    .open_remote_session(&task, &configuration, token, unpersisted)
                    .await?;
                task.bind_remote(&binding)?;
                self.persist(&task).await?;
                unpersisted.clear();
                binding
            }
        };

        let question = task.question_for(message_id).ok_or_else(|| {
            CoreError::Internal(format!("message {message_id} has no question to answer"))
        })?;
        if question.remote_message_id.is_none() {
            let question_id = question.id;
            let content = question.content.clone();
            ensure_active(token, "post_message")?;
            let remote_id = self
                .provider
                .post_message(&binding.thread_id, Role::User, &content)
                .await?;
            if let Some(question) = task.message_mut(question_id) {
                question.remote_message_id = Some(remote_id);
            }
            self.persist(&task).await?;
        }

        let (run_id, status) = match task.messages[pending_idx].remote_run_id.clone() {
            Some(run_id) => {
                debug!(task_id = %task_id, run_id = %run_id, "Resuming existing run");
                let status = self.provider.poll_run(&binding.thread_id, &run_id).await?;
                (run_id, status)
            }
            None => {
                ensure_active(token, "trigger_run")?;
                let handle = self
                    .provider
                    .trigger_run(&binding.thread_id, &binding.session_id)
                    .await?;
                log_provider_operation(
                    "trigger_run",
                    task_id,
                    Some(&handle.run_id),
                    "accepted",
                    None,
                );
                task.messages[pending_idx].remote_run_id = Some(handle.run_id.clone());
                self.persist(&task).await?;
                (handle.run_id, handle.status)
            }
        };

        if let Err(err) = self
            .wait_for_run(&binding.thread_id, &run_id, status, token)
            .await
        {
            // A failed run cannot be resumed; the next attempt triggers a new one
            if matches!(err, CoreError::Provider(ProviderError::RunFailed { .. })) {
                task.messages[pending_idx].remote_run_id = None;
                if let Err(persist_err) = self.persist(&task).await {
                    warn!(task_id = %task_id, error = %persist_err, "Could not clear failed run id");
                }
            }
            return Err(err);
        }

        ensure_active(token, "list_messages")?;
        let answer = self
            .provider
            .list_messages(&binding.thread_id)
            .await?
            .into_iter()
            .next()
            .filter(|message| message.role == Role::Assistant)
            .ok_or_else(|| ProviderError::EmptyResponse {
                thread_id: binding.thread_id.clone(),
            })?;

        task.messages[pending_idx].complete_with(answer.content, answer.id)?;
        if task.status == ResourceStatus::Processing {
            task.apply(&ResourceEvent::Complete)?;
        }
        task.last_error = None;
        self.persist(&task).await?;

        log_task_operation("complete", task_id, Some(task.tenant_id), task.status, None);
        Ok(WorkflowOutcome::Completed { message_id })
    }

    async fn open_remote_session(
        &self,
        task: &Task,
        configuration: &Configuration,
        token: &CancellationToken,
        unpersisted: &mut UnpersistedRemote,
    ) -> CoreResult<RemoteBinding> {
        // A trained assistant is shared by every task of the configuration
        // and is never compensated
        let session_id = match configuration.shared_session_id() {
            Some(assistant_id) => {
                log_provider_operation("create_session", task.id, Some(assistant_id), "reused", None);
                assistant_id.to_string()
            }
            None => {
                ensure_active(token, "create_session")?;
                let session_id = self
                    .provider
                    .create_session(&configuration.session_spec(task.id))
                    .await?;
                unpersisted.session_id = Some(session_id.clone());
                log_provider_operation("create_session", task.id, Some(&session_id), "created", None);
                session_id
            }
        };

        ensure_active(token, "create_thread")?;
        let thread_id = self.provider.create_thread().await?;
        unpersisted.thread_id = Some(thread_id.clone());
        log_provider_operation("create_thread", task.id, Some(&thread_id), "created", None);

        Ok(RemoteBinding {
            session_id,
            thread_id,
        })
    }

    /// Poll until the run finishes, the deadline passes or `token` is cancelled
    async fn wait_for_run(
        &self,
        thread_id: &str,
        run_id: &str,
        initial: RunStatus,
        token: &CancellationToken,
    ) -> CoreResult<()> {
        let deadline = Instant::now() + self.config.run_deadline;
        let mut status = initial;

        loop {
            if status == RunStatus::Completed {
                return Ok(());
            }
            if status.is_failed() {
                return Err(ProviderError::RunFailed {
                    run_id: run_id.to_string(),
                    status: status.to_string(),
                }
                .into());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProviderError::Timeout {
                    run_id: run_id.to_string(),
                    timeout_seconds: self.config.run_deadline.as_secs(),
                }
                .into());
            }

            let nap = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(CoreError::Cancelled(format!("polling run {run_id}")));
                }
                _ = tokio::time::sleep(nap) => {}
            }

            status = self.provider.poll_run(thread_id, run_id).await?;
            debug!(run_id = run_id, status = %status, "Polled run");
        }
    }

    async fn load(&self, task_id: Uuid) -> CoreResult<(Task, Configuration)> {
        self.uow
            .read(move |session| {
                Box::pin(async move {
                    let task = session
                        .get_task(task_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("task", task_id))?;
                    let configuration = session
                        .get_configuration(task.configuration_id)
                        .await?
                        .ok_or_else(|| {
                            CoreError::not_found("configuration", task.configuration_id)
                        })?;
                    Ok::<_, CoreError>((task, configuration))
                })
            })
            .await
    }

    async fn persist(&self, task: &Task) -> CoreResult<()> {
        let snapshot = task.clone();
        self.uow
            .run(move |session| {
                Box::pin(async move {
                    session
                        .update_task(&snapshot)
                        .await
                        .map_err(CoreError::from)
                })
            })
            .await
    }

    async fn handle_failure(
        &self,
        task_id: Uuid,
        error: CoreError,
        attempt: ExecutionAttempt,
    ) -> WorkflowFailure {
        let disposition = if error.is_cancelled() {
            FailureDisposition::Released
        } else if error.is_retryable() && !attempt.is_final() {
            FailureDisposition::Retry
        } else {
            FailureDisposition::Failed
        };

        match disposition {
            FailureDisposition::Released => {
                info!(
                    task_id = %task_id,
                    error = %error,
                    "🛑 WORKFLOW: Attempt interrupted, releasing task"
                );
            }
            FailureDisposition::Retry => {
                warn!(
                    task_id = %task_id,
                    attempt = attempt.number,
                    max_attempts = attempt.max_attempts,
                    error = %error,
                    "⚠️ WORKFLOW: Attempt failed, will retry"
                );
            }
            FailureDisposition::Failed => {
                error!(
                    task_id = %task_id,
                    attempt = attempt.number,
                    error = %error,
                    "❌ WORKFLOW: Attempt failed permanently"
                );
                match self.mark_failed(task_id, &error.to_string()).await {
                    Ok(true) => {
                        log_task_operation(
                            "fail",
                            task_id,
                            None,
                            ResourceStatus::Error,
                            Some(&error.to_string()),
                        );
                    }
                    Ok(false) => {}
                    Err(mark_err) => {
                        error!(
                            task_id = %task_id,
                            error = %mark_err,
                            "❌ WORKFLOW: Could not record failure on task"
                        );
                    }
                }
            }
        }

        WorkflowFailure { error, disposition }
    }

    /// Move the pending message, and the task if it is mid-turn, to `Error`.
    /// Returns whether any status changed.
    async fn mark_failed(&self, task_id: Uuid, reason: &str) -> CoreResult<bool> {
        let reason = reason.to_string();
        self.uow
            .run(move |session| {
                Box::pin(async move {
                    let Some(mut task) = session.get_task(task_id).await? else {
                        return Ok(false);
                    };

                    let mut changed = false;
                    if let Some(idx) = task.pending_message_index() {
                        changed |= task.messages[idx].fail_pending(&reason)?;
                    }
                    changed |= task.fail_pending(&reason)?;
                    task.last_error = Some(reason);

                    session.update_task(&task).await?;
                    Ok::<_, CoreError>(changed)
                })
            })
            .await
    }

    /// Best-effort deletion of remote resources the task never recorded
    async fn compensate(&self, task_id: Uuid, unpersisted: &UnpersistedRemote) {
        if let Some(thread_id) = &unpersisted.thread_id {
            match self.provider.delete_thread(thread_id).await {
                Ok(()) => info!(
                    task_id = %task_id,
                    thread_id = %thread_id,
                    "🧹 WORKFLOW: Deleted orphaned thread"
                ),
                Err(err) => warn!(
                    task_id = %task_id,
                    thread_id = %thread_id,
                    error = %err,
                    "Failed to delete orphaned thread"
                ),
            }
        }
        if let Some(session_id) = &unpersisted.session_id {
            match self.provider.delete_session(session_id).await {
                Ok(()) => info!(
                    task_id = %task_id,
                    session_id = %session_id,
                    "🧹 WORKFLOW: Deleted orphaned session"
                ),
                Err(err) => warn!(
                    task_id = %task_id,
                    session_id = %session_id,
                    error = %err,
                    "Failed to delete orphaned session"
                ),
            }
        }
    }
}
