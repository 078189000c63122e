//! # Unit-of-Work Coordinator
//!
//! Wraps a sequence of persistence writes in one atomic commit/abort boundary.
//! Every write issued through the session handle passed to the closure is
//! committed together when the closure succeeds and rolled back when it
//! returns an error. Writes become visible to other sessions only after
//! commit. The coordinator never retries.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use crate::models::{Configuration, Task};
use crate::state_machine::ResourceStatus;

/// Filter for listing tasks within a tenant, ordered by public id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub tenant_id: Uuid,
    pub status: Option<ResourceStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            status: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a task passes the filter, ignoring pagination
    pub fn matches(&self, task: &Task) -> bool {
        task.tenant_id == self.tenant_id && self.status.map_or(true, |s| task.status == s)
    }
}

/// Transaction-scoped persistence handle
#[async_trait]
pub trait StoreSession: Send {
    async fn create_task(&mut self, task: &Task) -> StorageResult<()>;

    async fn get_task(&mut self, task_id: Uuid) -> StorageResult<Option<Task>>;

    /// Replace the stored task document, including its messages
    async fn update_task(&mut self, task: &Task) -> StorageResult<()>;

    async fn delete_task(&mut self, task_id: Uuid) -> StorageResult<bool>;

    async fn list_tasks(&mut self, filter: &TaskFilter) -> StorageResult<Vec<Task>>;

    /// Highest public id assigned within the tenant, 0 when none
    async fn max_public_id(&mut self, tenant_id: Uuid) -> StorageResult<i64>;

    async fn create_configuration(&mut self, configuration: &Configuration) -> StorageResult<()>;

    async fn get_configuration(
        &mut self,
        configuration_id: Uuid,
    ) -> StorageResult<Option<Configuration>>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// A store able to open transactional sessions
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin(&self) -> StorageResult<Box<dyn StoreSession>>;
}

/// Runs closures inside a transactional session
#[derive(Clone)]
pub struct UnitOfWork {
    store: Arc<dyn TransactionalStore>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork").finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self { store }
    }

    /// Run `operation` in a new session; commit on `Ok`, roll back on `Err`
    ///
    /// ```rust
    /// use completion_core::database::{InMemoryStore, StorageError, UnitOfWork};
    /// use std::sync::Arc;
    /// use uuid::Uuid;
    ///
    /// # async fn example() -> Result<(), StorageError> {
    /// let uow = UnitOfWork::new(Arc::new(InMemoryStore::new()));
    /// let tenant_id = Uuid::new_v4();
    /// let next = uow
    ///     .run(move |session| Box::pin(async move {
    ///         Ok::<_, StorageError>(session.max_public_id(tenant_id).await? + 1)
    ///     }))
    ///     .await?;
    /// assert_eq!(next, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut dyn StoreSession) -> BoxFuture<'s, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Display + Send,
    {
        let mut session = self.store.begin().await?;

        match operation(session.as_mut()).await {
            Ok(value) => {
                session.commit().await?;
                debug!("Unit of work committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(
                        error = %rollback_err,
                        "Rollback failed after aborted unit of work"
                    );
                }
                debug!(error = %err, "Unit of work rolled back");
                Err(err)
            }
        }
    }

    /// Run a read-only closure; the session is always rolled back
    pub async fn read<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut dyn StoreSession) -> BoxFuture<'s, Result<T, E>> + Send,
        T: Send,
        E: From<StorageError> + Send,
    {
        let mut session = self.store.begin().await?;
        let result = operation(session.as_mut()).await;
        if let Err(rollback_err) = session.rollback().await {
            warn!(error = %rollback_err, "Rollback failed after read-only unit of work");
        }
        result
    }
}
