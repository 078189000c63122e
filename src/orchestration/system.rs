//! # Orchestration System
//!
//! Wires the lock manager, unit of work, workflow, dispatcher and task
//! service together from a [`CoreConfig`] and owns their lifecycle.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use super::backoff::BackoffPolicy;
use super::dispatcher::BackgroundDispatcher;
use super::task_service::TaskService;
use super::workflow::{CompletionWorkflow, WorkflowConfig};
use crate::config::CoreConfig;
use crate::database::{TransactionalStore, UnitOfWork};
use crate::error::CoreResult;
use crate::locks::KeyedLockManager;
use crate::messaging::DispatchQueue;
use crate::provider::CompletionProvider;

/// Point-in-time view of the running system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub worker_count: usize,
    pub pending_jobs: usize,
    pub dead_letters: usize,
    pub held_locks: usize,
}

pub struct OrchestrationSystem {
    config: CoreConfig,
    locks: Arc<KeyedLockManager>,
    workflow: CompletionWorkflow,
    dispatcher: Arc<BackgroundDispatcher>,
    service: TaskService,
}

impl std::fmt::Debug for OrchestrationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSystem")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl OrchestrationSystem {
    pub fn new(
        config: &CoreConfig,
        store: Arc<dyn TransactionalStore>,
        queue: Arc<dyn DispatchQueue>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        let locks = Arc::new(KeyedLockManager::new());
        let uow = UnitOfWork::new(store);

        let workflow = CompletionWorkflow::new(
            locks.clone(),
            uow.clone(),
            provider.clone(),
            WorkflowConfig::from_config(&config.orchestration),
        );
        let dispatcher = Arc::new(BackgroundDispatcher::new(
            queue,
            workflow.clone(),
            BackoffPolicy::from_config(&config.backoff),
            config.dispatcher.clone(),
        ));
        let service = TaskService::new(
            locks.clone(),
            uow,
            provider,
            dispatcher.clone(),
            config.orchestration.lock_acquire_timeout(),
        );

        Self {
            config: config.clone(),
            locks,
            workflow,
            dispatcher,
            service,
        }
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    pub fn workflow(&self) -> &CompletionWorkflow {
        &self.workflow
    }

    pub fn dispatcher(&self) -> &Arc<BackgroundDispatcher> {
        &self.dispatcher
    }

    pub fn locks(&self) -> &Arc<KeyedLockManager> {
        &self.locks
    }

    #[instrument(skip(self))]
    pub async fn start(&self) -> CoreResult<()> {
        info!("🚀 SYSTEM: Starting orchestration system");
        self.dispatcher.start().await
    }

    /// Stop the dispatcher, waiting at most `dispatcher.shutdown_timeout_seconds`
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> CoreResult<()> {
        self.dispatcher
            .shutdown(self.config.dispatcher.shutdown_timeout())
            .await?;
        info!("🛑 SYSTEM: Orchestration system stopped");
        Ok(())
    }

    pub async fn status(&self) -> CoreResult<SystemStatus> {
        let queue = self.dispatcher.queue();
        Ok(SystemStatus {
            running: self.dispatcher.is_running().await,
            worker_count: self.config.dispatcher.worker_count,
            pending_jobs: queue.pending_count().await?,
            dead_letters: queue.dead_letters().await?.len(),
            held_locks: self.locks.active_keys(),
        })
    }
}
