//! # In-Memory Store
//!
//! Thread-safe store for tests and single-process deployments. Each session
//! stages its writes privately and applies them to the committed state in
//! one step on commit, so aborted sessions leave no trace.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::unit_of_work::{StoreSession, TaskFilter, TransactionalStore};
use crate::models::{Configuration, Task};

#[derive(Debug, Default)]
struct CommittedState {
    tasks: HashMap<Uuid, Task>,
    configurations: HashMap<Uuid, Configuration>,
}

#[derive(Debug, Default)]
struct Counters {
    task_creates: AtomicUsize,
    configuration_creates: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Snapshot of the operations a store has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub task_creates: usize,
    pub configuration_creates: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_begin: bool,
    fail_next_commit: bool,
}

/// Store keeping all documents in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<CommittedState>>,
    counters: Arc<Counters>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        OperationCounts {
            task_creates: self.counters.task_creates.load(Ordering::SeqCst),
            configuration_creates: self.counters.configuration_creates.load(Ordering::SeqCst),
            commits: self.counters.commits.load(Ordering::SeqCst),
            rollbacks: self.counters.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Committed copy of a task, bypassing any session
    pub fn committed_task(&self, task_id: Uuid) -> Option<Task> {
        self.state.read().tasks.get(&task_id).cloned()
    }

    pub fn committed_task_count(&self) -> usize {
        self.state.read().tasks.len()
    }

    /// Make the next `begin` fail as if storage were unreachable
    pub fn fail_next_begin(&self) {
        self.faults.lock().fail_next_begin = true;
    }

    /// Make the next `commit` fail; its staged writes are discarded
    pub fn fail_next_commit(&self) {
        self.faults.lock().fail_next_commit = true;
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreSession>> {
        let fail_commit = {
            let mut faults = self.faults.lock();
            if std::mem::take(&mut faults.fail_next_begin) {
                return Err(StorageError::Begin("injected begin failure".to_string()));
            }
            std::mem::take(&mut faults.fail_next_commit)
        };

        Ok(Box::new(InMemorySession {
            state: self.state.clone(),
            counters: self.counters.clone(),
            staged_tasks: HashMap::new(),
            staged_configurations: HashMap::new(),
            fail_commit,
        }))
    }
}

struct InMemorySession {
    state: Arc<RwLock<CommittedState>>,
    counters: Arc<Counters>,
    /// `None` marks a staged delete
    staged_tasks: HashMap<Uuid, Option<Task>>,
    staged_configurations: HashMap<Uuid, Configuration>,
    fail_commit: bool,
}

impl InMemorySession {
    fn visible_task(&self, task_id: Uuid) -> Option<Task> {
        match self.staged_tasks.get(&task_id) {
            Some(staged) => staged.clone(),
            None => self.state.read().tasks.get(&task_id).cloned(),
        }
    }

    /// Committed tasks overlaid with this session's staged writes
    fn visible_tasks(&self) -> Vec<Task> {
        let state = self.state.read();
        let mut tasks: HashMap<Uuid, Task> = state
            .tasks
            .iter()
            .map(|(id, task)| (*id, task.clone()))
            .collect();
        drop(state);

        for (id, staged) in &self.staged_tasks {
            match staged {
                Some(task) => {
                    tasks.insert(*id, task.clone());
                }
                None => {
                    tasks.remove(id);
                }
            }
        }
        tasks.into_values().collect()
    }
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn create_task(&mut self, task: &Task) -> StorageResult<()> {
        if self.visible_task(task.id).is_some() {
            return Err(StorageError::Duplicate {
                entity: "task",
                id: task.id,
            });
        }
        self.counters.task_creates.fetch_add(1, Ordering::SeqCst);
        self.staged_tasks.insert(task.id, Some(task.clone()));
        Ok(())
    }

    async fn get_task(&mut self, task_id: Uuid) -> StorageResult<Option<Task>> {
        Ok(self.visible_task(task_id))
    }

    async fn update_task(&mut self, task: &Task) -> StorageResult<()> {
        if self.visible_task(task.id).is_none() {
            return Err(StorageError::Missing {
                entity: "task",
                id: task.id,
            });
        }
        self.staged_tasks.insert(task.id, Some(task.clone()));
        Ok(())
    }

    async fn delete_task(&mut self, task_id: Uuid) -> StorageResult<bool> {
        let existed = self.visible_task(task_id).is_some();
        if existed {
            self.staged_tasks.insert(task_id, None);
        }
        Ok(existed)
    }

    async fn list_tasks(&mut self, filter: &TaskFilter) -> StorageResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .visible_tasks()
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect();
        tasks.sort_by_key(|task| task.public_id);

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(tasks.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn max_public_id(&mut self, tenant_id: Uuid) -> StorageResult<i64> {
        Ok(self
            .visible_tasks()
            .iter()
            .filter(|task| task.tenant_id == tenant_id)
            .map(|task| task.public_id)
            .max()
            .unwrap_or(0))
    }

    async fn create_configuration(&mut self, configuration: &Configuration) -> StorageResult<()> {
        if self.get_configuration(configuration.id).await?.is_some() {
            return Err(StorageError::Duplicate {
                entity: "configuration",
                id: configuration.id,
            });
        }
        self.counters
            .configuration_creates
            .fetch_add(1, Ordering::SeqCst);
        self.staged_configurations
            .insert(configuration.id, configuration.clone());
        Ok(())
    }

    async fn get_configuration(
        &mut self,
        configuration_id: Uuid,
    ) -> StorageResult<Option<Configuration>> {
        if let Some(staged) = self.staged_configurations.get(&configuration_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self
            .state
            .read()
            .configurations
            .get(&configuration_id)
            .cloned())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.fail_commit {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Commit("injected commit failure".to_string()));
        }

        let session = *self;
        let mut state = session.state.write();
        for (id, staged) in session.staged_tasks {
            match staged {
                Some(task) => {
                    state.tasks.insert(id, task);
                }
                None => {
                    state.tasks.remove(&id);
                }
            }
        }
        for (id, configuration) in session.staged_configurations {
            state.configurations.insert(id, configuration);
        }
        drop(state);

        session.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
