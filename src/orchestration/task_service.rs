//! # Task Service
//!
//! Synchronous entry points for tasks and configurations. Mutations commit
//! in a unit of work and return immediately; remote work is handed to the
//! [`BackgroundDispatcher`].
//!
//! Two lock concerns are kept apart: `tenant-create:{tenant}` serializes
//! public id assignment, `task:{id}` serializes mutation of one task.
//! Mutating calls wait only briefly for a task lock held by a running turn
//! and report the task as busy instead of queueing behind it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::dispatcher::BackgroundDispatcher;
use crate::database::{TaskFilter, UnitOfWork};
use crate::error::{CoreError, CoreResult};
use crate::locks::{lock_keys, KeyedLockGuard, KeyedLockManager};
use crate::logging::log_task_operation;
use crate::models::{Actor, Configuration, NewConfiguration, Task};
use crate::provider::{CompletionProvider, ProviderResult};
use crate::state_machine::{ResourceEvent, ResourceStatus, Stateful};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub tenant_id: Uuid,
    pub configuration_id: Uuid,
    pub question: String,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitMessageRequest {
    pub task_id: Uuid,
    pub content: String,
    pub actor: Actor,
}

pub struct TaskService {
    locks: Arc<KeyedLockManager>,
    uow: UnitOfWork,
    provider: Arc<dyn CompletionProvider>,
    dispatcher: Arc<BackgroundDispatcher>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

fn require_text(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// A resource the provider no longer knows about counts as released
fn released(resource: &str, id: &str, result: ProviderResult<()>) -> CoreResult<()> {
    match result {
        Err(err) if err.is_not_found() => {
            debug!(resource = resource, id = id, "Remote resource already gone");
            Ok(())
        }
        other => other.map_err(CoreError::from),
    }
}

impl TaskService {
    pub fn new(
        locks: Arc<KeyedLockManager>,
        uow: UnitOfWork,
        provider: Arc<dyn CompletionProvider>,
        dispatcher: Arc<BackgroundDispatcher>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            locks,
            uow,
            provider,
            dispatcher,
            lock_timeout,
        }
    }

    async fn lock_task(&self, task_id: Uuid) -> CoreResult<KeyedLockGuard<'_>> {
        self.locks
            .lock_timeout(&lock_keys::task(task_id), self.lock_timeout)
            .await
            .map_err(|_| CoreError::conflict(format!("task {task_id} is busy")))
    }

    /// Create a task holding the question and schedule its first turn
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create_task(&self, request: CreateTaskRequest) -> CoreResult<Task> {
        require_text("question", &request.question)?;

        let guard = self
            .locks
            .lock(&lock_keys::tenant_create(request.tenant_id))
            .await;
        let task = self
            .uow
            .run(move |session| {
                Box::pin(async move {
                    let configuration = session
                        .get_configuration(request.configuration_id)
                        .await?
                        .filter(|c| c.tenant_id == request.tenant_id)
                        .ok_or_else(|| {
                            CoreError::not_found("configuration", request.configuration_id)
                        })?;
                    if configuration.status != ResourceStatus::Active {
                        return Err(CoreError::conflict(format!(
                            "configuration {} is {}",
                            configuration.id, configuration.status
                        )));
                    }

                    let public_id = session.max_public_id(request.tenant_id).await? + 1;
                    let task = Task::new(
                        request.tenant_id,
                        public_id,
                        configuration.id,
                        request.question,
                        &request.actor,
                    );
                    session.create_task(&task).await?;
                    Ok::<_, CoreError>(task)
                })
            })
            .await?;
        guard.unlock();

        log_task_operation("create", task.id, Some(task.tenant_id), task.status, None);
        if let Err(err) = self.dispatcher.dispatch(task.id).await {
            let answer_id = task.messages[1].id;
            self.fail_undispatched(task.id, answer_id, &err).await;
            return Err(err);
        }
        Ok(task)
    }

    /// Append a follow-up question to an active task and schedule its turn
    #[instrument(skip(self, request), fields(task_id = %request.task_id))]
    pub async fn submit_message(&self, request: SubmitMessageRequest) -> CoreResult<Task> {
        require_text("content", &request.content)?;
        let task_id = request.task_id;

        let guard = self.lock_task(task_id).await?;
        let (task, answer_id) = self
            .uow
            .run(move |session| {
                Box::pin(async move {
                    let mut task = session
                        .get_task(request.task_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("task", request.task_id))?;
                    let (_, answer_id) = task.push_question(request.content, &request.actor)?;
                    session.update_task(&task).await?;
                    Ok::<_, CoreError>((task, answer_id))
                })
            })
            .await?;

        log_task_operation("submit_message", task_id, Some(task.tenant_id), task.status, None);
        // Still holding the task lock so no turn can pick up the message
        // before a failed enqueue is recorded
        if let Err(err) = self.dispatcher.dispatch(task_id).await {
            self.fail_undispatched(task_id, answer_id, &err).await;
            guard.unlock();
            return Err(err);
        }
        guard.unlock();
        Ok(task)
    }

    /// Record a committed turn that never reached the queue as failed, so
    /// the task does not wait on a job that does not exist
    async fn fail_undispatched(&self, task_id: Uuid, message_id: Uuid, cause: &CoreError) {
        let reason = format!("could not schedule turn: {cause}");
        let result = self
            .uow
            .run(move |session| {
                Box::pin(async move {
                    let Some(mut task) = session.get_task(task_id).await? else {
                        return Ok(None);
                    };
                    if let Some(message) = task.message_mut(message_id) {
                        message.fail_pending(&reason)?;
                    }
                    task.fail_pending(&reason)?;
                    task.last_error = Some(reason);
                    session.update_task(&task).await?;
                    Ok::<_, CoreError>(Some((task.tenant_id, task.status)))
                })
            })
            .await;

        match result {
            Ok(Some((tenant_id, status))) => log_task_operation(
                "dispatch_failed",
                task_id,
                Some(tenant_id),
                status,
                Some(&cause.to_string()),
            ),
            Ok(None) => {}
            Err(mark_err) => error!(
                task_id = %task_id,
                error = %mark_err,
                cause = %cause,
                "❌ TASK: Could not record failed dispatch"
            ),
        }
    }

    /// Current committed state of a task
    pub async fn get_task(&self, task_id: Uuid) -> CoreResult<Task> {
        self.uow
            .read(move |session| {
                Box::pin(async move {
                    session
                        .get_task(task_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("task", task_id))
                })
            })
            .await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> CoreResult<Vec<Task>> {
        self.uow
            .read(move |session| {
                Box::pin(async move { session.list_tasks(&filter).await.map_err(CoreError::from) })
            })
            .await
    }

    /// Soft-delete a settled task
    #[instrument(skip(self, actor))]
    pub async fn archive_task(&self, task_id: Uuid, actor: Actor) -> CoreResult<Task> {
        let guard = self.lock_task(task_id).await?;
        let task = self
            .uow
            .run(move |session| {
                Box::pin(async move {
                    let mut task = session
                        .get_task(task_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("task", task_id))?;
                    if task.pending_message_index().is_some() {
                        return Err(CoreError::conflict(format!(
                            "task {task_id} is awaiting a response"
                        )));
                    }
                    task.apply(&ResourceEvent::Archive)?;
                    task.audit.touch(&actor);
                    session.update_task(&task).await?;
                    Ok::<_, CoreError>(task)
                })
            })
            .await?;
        guard.unlock();

        log_task_operation("archive", task_id, Some(task.tenant_id), task.status, None);
        Ok(task)
    }

    /// Release the task's remote thread and session, then remove the record.
    /// Each released id is cleared as soon as the provider lets go of it, so
    /// a delete that fails halfway can be retried. A session shared through
    /// the configuration's `remote_assistant_id` is never deleted.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: Uuid) -> CoreResult<()> {
        let guard = self.lock_task(task_id).await?;
        let (task, shared_session) = self
            .uow
            .read(move |session| {
                Box::pin(async move {
                    let task = session
                        .get_task(task_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("task", task_id))?;
                    let shared_session = session
                        .get_configuration(task.configuration_id)
                        .await?
                        .and_then(|configuration| {
                            configuration.shared_session_id().map(str::to_string)
                        });
                    Ok::<_, CoreError>((task, shared_session))
                })
            })
            .await?;

        if let Some(thread_id) = &task.remote_thread_id {
            released("thread", thread_id, self.provider.delete_thread(thread_id).await)?;
            self.forget_remote(task_id, |task| task.remote_thread_id = None)
                .await?;
        }
        if let Some(session_id) = &task.remote_session_id {
            if shared_session.as_deref() != Some(session_id.as_str()) {
                released(
                    "session",
                    session_id,
                    self.provider.delete_session(session_id).await,
                )?;
            }
            self.forget_remote(task_id, |task| task.remote_session_id = None)
                .await?;
        }

        self.uow
            .run(move |session| {
                Box::pin(async move {
                    session.delete_task(task_id).await?;
                    Ok::<_, CoreError>(())
                })
            })
            .await?;
        guard.unlock();

        info!(task_id = %task_id, "🗑️ TASK: Deleted task and released remote resources");
        Ok(())
    }

    async fn forget_remote(&self, task_id: Uuid, clear: fn(&mut Task)) -> CoreResult<()> {
        self.uow
            .run(move |session| {
                Box::pin(async move {
                    if let Some(mut task) = session.get_task(task_id).await? {
                        clear(&mut task);
                        task.audit.touch_system();
                        session.update_task(&task).await?;
                    }
                    Ok::<_, CoreError>(())
                })
            })
            .await
    }

    /// Return the configuration with the request's id, creating it first if
    /// it does not exist yet
    #[instrument(skip(self, request, actor), fields(configuration_id = %request.id))]
    pub async fn ensure_configuration(
        &self,
        request: NewConfiguration,
        actor: Actor,
    ) -> CoreResult<Configuration> {
        require_text("name", &request.name)?;
        require_text("model", &request.model)?;
        require_text("instructions", &request.instructions)?;
        if let Some(temperature) = request.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(CoreError::validation(
                    "temperature",
                    "must be between 0.0 and 2.0",
                ));
            }
        }

        let guard = self
            .locks
            .lock(&lock_keys::configuration_create(request.tenant_id))
            .await;
        let configuration = self
            .uow
            .run(move |session| {
                Box::pin(async move {
                    if let Some(existing) = session.get_configuration(request.id).await? {
                        if existing.tenant_id != request.tenant_id {
                            return Err(CoreError::conflict(format!(
                                "configuration {} belongs to another tenant",
                                request.id
                            )));
                        }
                        return Ok(existing);
                    }

                    let configuration = Configuration::from_request(request, &actor);
                    session.create_configuration(&configuration).await?;
                    Ok::<_, CoreError>(configuration)
                })
            })
            .await?;
        guard.unlock();

        Ok(configuration)
    }

    pub async fn get_configuration(&self, configuration_id: Uuid) -> CoreResult<Configuration> {
        self.uow
            .read(move |session| {
                Box::pin(async move {
                    session
                        .get_configuration(configuration_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("configuration", configuration_id))
                })
            })
            .await
    }
}
