mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::*;
use completion_core::database::{InMemoryStore, TaskFilter};
use completion_core::locks::lock_keys;
use completion_core::messaging::{
    DispatchJob, DispatchQueue, InMemoryDispatchQueue, MessagingError, MessagingResult,
};
use completion_core::models::Actor;
use completion_core::orchestration::{
    CreateTaskRequest, ExecutionAttempt, OrchestrationSystem, SubmitMessageRequest,
};
use completion_core::provider::ProviderError;
use completion_core::state_machine::{ResourceStatus, StateMachineError};
use completion_core::CoreError;

fn follow_up(harness: &TestHarness, task_id: Uuid, content: &str) -> SubmitMessageRequest {
    SubmitMessageRequest {
        task_id,
        content: content.to_string(),
        actor: harness.actor.clone(),
    }
}

async fn answered_task(harness: &TestHarness) -> Uuid {
    let task = harness
        .system
        .service()
        .create_task(harness.create_request("What is the return policy?"))
        .await
        .unwrap();
    harness
        .fast_workflow()
        .execute(task.id, ExecutionAttempt::only(), &CancellationToken::new())
        .await
        .unwrap();
    task.id
}

#[tokio::test]
async fn test_create_task_validates_input() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();

    let err = service
        .create_task(harness.create_request("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "question"));

    let mut unknown = harness.create_request("What is the return policy?");
    unknown.configuration_id = Uuid::new_v4();
    let err = service.create_task(unknown).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "configuration", .. }));

    let mut foreign = harness.create_request("What is the return policy?");
    foreign.tenant_id = Uuid::new_v4();
    let err = service.create_task(foreign).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    assert_eq!(harness.store.committed_task_count(), 0);
    assert_eq!(harness.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_task_records_audit_fields() {
    let harness = TestHarness::new().await;
    let task = harness
        .system
        .service()
        .create_task(harness.create_request("What is the return policy?"))
        .await
        .unwrap();

    assert_eq!(task.tenant_id, harness.tenant_id);
    assert_eq!(task.configuration_id, harness.configuration.id);
    assert_eq!(task.audit.created_by, harness.actor.user_id);
    assert_eq!(task.audit.created_from_ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(task.messages[0].content, "What is the return policy?");
    assert!(!task.messages[0].from_provider);
    assert!(task.messages[1].from_provider);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_public_ids_are_sequential_per_tenant() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();

    let requests = (0..20).map(|n| {
        let request = harness.create_request(&format!("Question {n}"));
        async move { service.create_task(request).await }
    });
    let mut ids: Vec<i64> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|result| result.unwrap().public_id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());

    let other_tenant = Uuid::new_v4();
    let configuration = service
        .ensure_configuration(new_configuration(other_tenant), harness.actor.clone())
        .await
        .unwrap();
    let mut request = harness.create_request("First question elsewhere");
    request.tenant_id = other_tenant;
    request.configuration_id = configuration.id;
    assert_eq!(service.create_task(request).await.unwrap().public_id, 1);
}

#[tokio::test]
async fn test_only_one_message_may_await_a_response() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let task = service
        .create_task(harness.create_request("What is the return policy?"))
        .await
        .unwrap();

    let err = service
        .submit_message(follow_up(&harness, task.id, "Hello?"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::StateTransition(StateMachineError::PendingResponse { .. })
    ));

    harness
        .fast_workflow()
        .execute(task.id, ExecutionAttempt::only(), &CancellationToken::new())
        .await
        .unwrap();

    let updated = service
        .submit_message(follow_up(&harness, task.id, "Does that include sale items?"))
        .await
        .unwrap();
    assert_eq!(updated.status, ResourceStatus::Active);
    assert_eq!(updated.messages.len(), 4);
    assert_eq!(updated.messages[3].status, ResourceStatus::Queued);
    assert_eq!(harness.queue.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_submit_rejects_empty_content_and_unknown_task() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();

    let err = service
        .submit_message(follow_up(&harness, Uuid::new_v4(), ""))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));

    let err = service
        .submit_message(follow_up(&harness, Uuid::new_v4(), "Anyone there?"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "task", .. }));
}

#[tokio::test]
async fn test_busy_task_rejects_mutation() {
    let harness = TestHarness::new().await;
    let task_id = answered_task(&harness).await;

    let held = harness.system.locks().lock(&lock_keys::task(task_id)).await;
    let err = harness
        .system
        .service()
        .submit_message(follow_up(&harness, task_id, "Does that include sale items?"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    held.unlock();

    harness
        .system
        .service()
        .submit_message(follow_up(&harness, task_id, "Does that include sale items?"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_archive_settled_task() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let pending = service
        .create_task(harness.create_request("What is the return policy?"))
        .await
        .unwrap();

    let err = service
        .archive_task(pending.id, harness.actor.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let task_id = answered_task(&harness).await;
    let archiver = Actor::new(Uuid::new_v4());
    let archived = service.archive_task(task_id, archiver.clone()).await.unwrap();
    assert_eq!(archived.status, ResourceStatus::Archived);
    assert_eq!(archived.audit.modified_by, archiver.user_id);

    let err = service
        .submit_message(follow_up(&harness, task_id, "One more thing"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::StateTransition(StateMachineError::NotAcceptingMessages { .. })
    ));

    let err = service
        .archive_task(task_id, harness.actor.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StateTransition(_)));
}

#[tokio::test]
async fn test_delete_releases_remote_resources() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let task_id = answered_task(&harness).await;
    let task = service.get_task(task_id).await.unwrap();

    service.delete_task(task_id).await.unwrap();

    assert_eq!(harness.provider.deleted_threads(), vec![task.remote_thread_id.unwrap()]);
    assert_eq!(harness.provider.deleted_sessions(), vec![task.remote_session_id.unwrap()]);
    assert!(harness.store.committed_task(task_id).is_none());
    assert!(matches!(
        service.get_task(task_id).await,
        Err(CoreError::NotFound { entity: "task", .. })
    ));
}

#[tokio::test]
async fn test_delete_keeps_record_when_release_fails() {
    let harness = TestHarness::new().await;
    let task_id = answered_task(&harness).await;
    harness.provider.fail_next(
        "delete_thread",
        ProviderError::transport("delete_thread", "timed out"),
    );

    let err = harness.system.service().delete_task(task_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Provider(_)));
    assert!(harness.store.committed_task(task_id).is_some());
    assert!(harness.provider.deleted_sessions().is_empty());
}

#[tokio::test]
async fn test_delete_task_never_bound_remotely() {
    let harness = TestHarness::new().await;
    let task = harness
        .system
        .service()
        .create_task(harness.create_request("What is the return policy?"))
        .await
        .unwrap();

    harness.system.service().delete_task(task.id).await.unwrap();
    assert_eq!(harness.provider.calls("delete_thread"), 0);
    assert_eq!(harness.provider.calls("delete_session"), 0);
    assert_eq!(harness.store.committed_task_count(), 0);
}

#[tokio::test]
async fn test_delete_resumes_after_partial_release() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let task_id = answered_task(&harness).await;
    let task = service.get_task(task_id).await.unwrap();
    let thread_id = task.remote_thread_id.clone().unwrap();
    let session_id = task.remote_session_id.clone().unwrap();
    harness.provider.fail_next(
        "delete_session",
        ProviderError::transport("delete_session", "timed out"),
    );

    let err = service.delete_task(task_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Provider(_)));
    let kept = harness.store.committed_task(task_id).unwrap();
    assert_eq!(kept.remote_thread_id, None);
    assert_eq!(kept.remote_session_id.as_deref(), Some(session_id.as_str()));

    service.delete_task(task_id).await.unwrap();
    assert_eq!(harness.provider.deleted_threads(), vec![thread_id]);
    assert_eq!(harness.provider.deleted_sessions(), vec![session_id]);
    assert_eq!(harness.provider.calls("delete_thread"), 1);
    assert!(harness.store.committed_task(task_id).is_none());
}

#[tokio::test]
async fn test_delete_treats_missing_remote_resources_as_released() {
    let harness = TestHarness::new().await;
    let task_id = answered_task(&harness).await;
    harness.provider.fail_next(
        "delete_thread",
        ProviderError::status("delete_thread", 404, "No thread found"),
    );
    harness.provider.fail_next(
        "delete_session",
        ProviderError::status("delete_session", 404, "No assistant found"),
    );

    harness.system.service().delete_task(task_id).await.unwrap();
    assert!(harness.store.committed_task(task_id).is_none());
}

#[tokio::test]
async fn test_delete_keeps_shared_trained_assistant() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let mut trained = new_configuration(harness.tenant_id);
    trained.remote_assistant_id = Some("asst_trained".to_string());
    let configuration = service
        .ensure_configuration(trained, harness.actor.clone())
        .await
        .unwrap();
    let mut request = harness.create_request("What is the return policy?");
    request.configuration_id = configuration.id;
    let task = service.create_task(request).await.unwrap();
    harness
        .fast_workflow()
        .execute(task.id, ExecutionAttempt::only(), &CancellationToken::new())
        .await
        .unwrap();
    let thread_id = service.get_task(task.id).await.unwrap().remote_thread_id;

    service.delete_task(task.id).await.unwrap();
    assert_eq!(harness.provider.deleted_threads(), vec![thread_id.unwrap()]);
    assert_eq!(harness.provider.calls("delete_session"), 0);
    assert!(harness.store.committed_task(task.id).is_none());
}

/// Queue whose `enqueue` can be switched to fail
struct RejectingQueue {
    inner: InMemoryDispatchQueue,
    rejecting: AtomicBool,
}

impl RejectingQueue {
    fn new(rejecting: bool) -> Self {
        Self {
            inner: InMemoryDispatchQueue::new(),
            rejecting: AtomicBool::new(rejecting),
        }
    }

    fn reject(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl DispatchQueue for RejectingQueue {
    async fn enqueue(&self, task_id: Uuid) -> MessagingResult<Uuid> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(MessagingError::database_query("enqueue", "connection refused"));
        }
        self.inner.enqueue(task_id).await
    }

    async fn claim(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> MessagingResult<Option<DispatchJob>> {
        self.inner.claim(worker_id, visibility_timeout).await
    }

    async fn complete(&self, job_id: Uuid) -> MessagingResult<()> {
        self.inner.complete(job_id).await
    }

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> MessagingResult<()> {
        self.inner.retry(job_id, delay, error).await
    }

    async fn release(&self, job_id: Uuid) -> MessagingResult<()> {
        self.inner.release(job_id).await
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> MessagingResult<()> {
        self.inner.dead_letter(job_id, error).await
    }

    async fn dead_letters(&self) -> MessagingResult<Vec<DispatchJob>> {
        self.inner.dead_letters().await
    }

    async fn pending_count(&self) -> MessagingResult<usize> {
        self.inner.pending_count().await
    }
}

async fn system_with_queue(
    queue: Arc<RejectingQueue>,
) -> (OrchestrationSystem, Actor, Uuid, Uuid) {
    let system = OrchestrationSystem::new(
        &test_config(),
        Arc::new(InMemoryStore::new()),
        queue,
        ScriptedProvider::new().shared(),
    );
    let tenant_id = Uuid::new_v4();
    let actor = Actor::new(Uuid::new_v4());
    let configuration = system
        .service()
        .ensure_configuration(new_configuration(tenant_id), actor.clone())
        .await
        .unwrap();
    (system, actor, tenant_id, configuration.id)
}

#[tokio::test]
async fn test_failed_enqueue_marks_new_task_failed() {
    let queue = Arc::new(RejectingQueue::new(true));
    let (system, actor, tenant_id, configuration_id) = system_with_queue(queue.clone()).await;
    let service = system.service();

    let err = service
        .create_task(CreateTaskRequest {
            tenant_id,
            configuration_id,
            question: "What is the return policy?".to_string(),
            actor,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Messaging(_)));

    let tasks = service
        .list_tasks(TaskFilter::for_tenant(tenant_id))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.status, ResourceStatus::Error);
    assert_eq!(task.messages[1].status, ResourceStatus::Error);
    assert!(task.pending_message().is_none());
    assert!(task
        .last_error
        .as_deref()
        .is_some_and(|reason| reason.contains("could not schedule turn")));
    assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_enqueue_fails_only_the_follow_up() {
    let queue = Arc::new(RejectingQueue::new(false));
    let (system, actor, tenant_id, configuration_id) = system_with_queue(queue.clone()).await;
    let service = system.service();

    let task = service
        .create_task(CreateTaskRequest {
            tenant_id,
            configuration_id,
            question: "What is the return policy?".to_string(),
            actor: actor.clone(),
        })
        .await
        .unwrap();
    system
        .workflow()
        .execute(task.id, ExecutionAttempt::only(), &CancellationToken::new())
        .await
        .unwrap();

    queue.reject(true);
    let follow_up = |content: &str| SubmitMessageRequest {
        task_id: task.id,
        content: content.to_string(),
        actor: actor.clone(),
    };
    let err = service
        .submit_message(follow_up("Does that include sale items?"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Messaging(_)));

    let stored = service.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Active);
    assert_eq!(stored.messages.len(), 4);
    assert_eq!(stored.messages[3].status, ResourceStatus::Error);
    assert!(stored.last_error.is_some());
    assert!(!task_locked(&system, task.id));

    // the failed follow-up no longer blocks the conversation
    queue.reject(false);
    let resumed = service
        .submit_message(follow_up("Does that include sale items?"))
        .await
        .unwrap();
    assert_eq!(resumed.messages.len(), 6);
    assert_eq!(resumed.messages[5].status, ResourceStatus::Queued);
}

fn task_locked(system: &OrchestrationSystem, task_id: Uuid) -> bool {
    system.locks().is_locked(&lock_keys::task(task_id))
}

#[tokio::test]
async fn test_list_tasks_pages_by_public_id() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    for n in 0..3 {
        service
            .create_task(harness.create_request(&format!("Question {n}")))
            .await
            .unwrap();
    }

    let filter = TaskFilter::for_tenant(harness.tenant_id);
    let first_page = service.list_tasks(filter.clone().with_limit(2)).await.unwrap();
    assert_eq!(
        first_page.iter().map(|t| t.public_id).collect::<Vec<_>>(),
        vec![1, 2]
    );
    let second_page = service.list_tasks(filter.clone().with_offset(2)).await.unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].public_id, 3);

    let active = service
        .list_tasks(filter.with_status(ResourceStatus::Active))
        .await
        .unwrap();
    assert!(active.is_empty());
    assert!(service
        .list_tasks(TaskFilter::for_tenant(Uuid::new_v4()))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_ensure_configuration_is_idempotent() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();
    let request = new_configuration(harness.tenant_id);

    let first = service
        .ensure_configuration(request.clone(), harness.actor.clone())
        .await
        .unwrap();
    let second = service
        .ensure_configuration(request.clone(), harness.actor.clone())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, ResourceStatus::Active);
    // one from the harness, one from this test
    assert_eq!(harness.store.operation_counts().configuration_creates, 2);
    assert_eq!(service.get_configuration(request.id).await.unwrap(), first);

    let mut foreign = request;
    foreign.tenant_id = Uuid::new_v4();
    let err = service
        .ensure_configuration(foreign, harness.actor.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_ensure_configuration_validates_input() {
    let harness = TestHarness::new().await;
    let service = harness.system.service();

    let mut hot = new_configuration(harness.tenant_id);
    hot.temperature = Some(2.5);
    let err = service
        .ensure_configuration(hot, harness.actor.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "temperature"));

    let mut unnamed = new_configuration(harness.tenant_id);
    unnamed.name = String::new();
    assert!(service
        .ensure_configuration(unnamed, harness.actor.clone())
        .await
        .is_err());

    assert!(matches!(
        service.get_configuration(Uuid::new_v4()).await,
        Err(CoreError::NotFound { entity: "configuration", .. })
    ));
}
