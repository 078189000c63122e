//! Fixture builders wiring an in-memory orchestration system

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use completion_core::config::{CoreConfig, StorageBackend};
use completion_core::database::{InMemoryStore, UnitOfWork};
use completion_core::locks::KeyedLockManager;
use completion_core::messaging::InMemoryDispatchQueue;
use completion_core::models::{Actor, Configuration, NewConfiguration, Task};
use completion_core::orchestration::{
    CompletionWorkflow, CreateTaskRequest, OrchestrationSystem, WorkflowConfig,
};
use completion_core::state_machine::ResourceStatus;

use super::scripted_provider::ScriptedProvider;

/// Configuration with fast backoff and a small worker pool
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.database.backend = StorageBackend::Memory;
    config.orchestration.poll_interval_seconds = 1;
    config.orchestration.run_deadline_seconds = 5;
    config.orchestration.lock_acquire_timeout_ms = 50;
    config.dispatcher.worker_count = 2;
    config.dispatcher.max_attempts = 3;
    config.dispatcher.idle_poll_interval_ms = 10;
    config.dispatcher.shutdown_timeout_seconds = 5;
    config.backoff.initial_delay_ms = 10;
    config.backoff.max_delay_seconds = 1;
    config
}

pub fn fast_workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        poll_interval: Duration::from_millis(10),
        run_deadline: Duration::from_millis(200),
    }
}

pub fn new_configuration(tenant_id: Uuid) -> NewConfiguration {
    NewConfiguration {
        id: Uuid::new_v4(),
        tenant_id,
        name: "returns-desk".to_string(),
        model: "gpt-4o".to_string(),
        instructions: "Answer questions about the store's policies.".to_string(),
        temperature: Some(0.2),
        reference_file_ids: vec!["file_policies".to_string()],
        remote_assistant_id: None,
    }
}

/// An orchestration system over in-memory storage and a scripted provider
pub struct TestHarness {
    pub system: OrchestrationSystem,
    pub store: InMemoryStore,
    pub queue: Arc<InMemoryDispatchQueue>,
    pub provider: ScriptedProvider,
    pub tenant_id: Uuid,
    pub actor: Actor,
    pub configuration: Configuration,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: CoreConfig) -> Self {
        let store = InMemoryStore::new();
        let queue = Arc::new(InMemoryDispatchQueue::new());
        let provider = ScriptedProvider::new();
        let system = OrchestrationSystem::new(
            &config,
            Arc::new(store.clone()),
            queue.clone(),
            provider.shared(),
        );

        let tenant_id = Uuid::new_v4();
        let actor = Actor::new(Uuid::new_v4()).with_ip("203.0.113.7");
        let configuration = system
            .service()
            .ensure_configuration(new_configuration(tenant_id), actor.clone())
            .await
            .expect("seed configuration");

        Self {
            system,
            store,
            queue,
            provider,
            tenant_id,
            actor,
            configuration,
        }
    }

    pub fn create_request(&self, question: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            tenant_id: self.tenant_id,
            configuration_id: self.configuration.id,
            question: question.to_string(),
            actor: self.actor.clone(),
        }
    }

    /// Workflow sharing this harness's store and provider with fast polling
    pub fn fast_workflow(&self) -> CompletionWorkflow {
        CompletionWorkflow::new(
            Arc::new(KeyedLockManager::new()),
            UnitOfWork::new(Arc::new(self.store.clone())),
            self.provider.shared(),
            fast_workflow_config(),
        )
    }

    /// Poll committed state until the task reaches `status`
    pub async fn wait_for_status(&self, task_id: Uuid, status: ResourceStatus) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(task) = self.store.committed_task(task_id) {
                if task.status == status {
                    return task;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {task_id} never reached {status}: {:?}",
                self.store.committed_task(task_id)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll committed state until `predicate` holds
    pub async fn wait_until(&self, task_id: Uuid, predicate: impl Fn(&Task) -> bool) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(task) = self.store.committed_task(task_id) {
                if predicate(&task) {
                    return task;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition never held for task {task_id}: {:?}",
                self.store.committed_task(task_id)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
