//! # Keyed Lock Manager
//!
//! Mutual exclusion scoped to an arbitrary string key. Different keys never
//! contend. A lock is held by the returned [`KeyedLockGuard`] and released
//! when the guard is dropped or passed to [`KeyedLockGuard::unlock`], which
//! makes early returns release the lock as well.
//!
//! One manager instance is constructed at startup and injected into every
//! component that needs it.
//!
//! ```rust
//! use completion_core::locks::{lock_keys, KeyedLockManager};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let locks = KeyedLockManager::new();
//! let key = lock_keys::task(Uuid::new_v4());
//!
//! let guard = locks.lock(&key).await;
//! assert!(locks.try_lock(&key).is_none());
//! guard.unlock();
//! assert!(locks.try_lock(&key).is_some());
//! # }
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lock acquisition failures for the bounded variants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out after {timeout_ms}ms waiting for lock {key}")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("Cancelled while waiting for lock {key}")]
    Cancelled { key: String },
}

/// Builders for the lock keys used across the engine
pub mod lock_keys {
    use crate::constants::lock_prefixes;
    use uuid::Uuid;

    /// Orchestration and mutation of one task
    pub fn task(task_id: Uuid) -> String {
        format!("{}:{task_id}", lock_prefixes::TASK)
    }

    /// Public id assignment for tasks created under one tenant
    pub fn tenant_create(tenant_id: Uuid) -> String {
        format!("{}:{tenant_id}", lock_prefixes::TENANT_CREATE)
    }

    /// Get-or-create of configurations under one tenant
    pub fn configuration_create(tenant_id: Uuid) -> String {
        format!("{}:{tenant_id}", lock_prefixes::CONFIGURATION_CREATE)
    }
}

/// Grants mutual exclusion per string key
#[derive(Debug, Default)]
pub struct KeyedLockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLockManager {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drop the map entry once nobody holds or waits on it
    fn reclaim(&self, key: &str) {
        self.locks
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyedLockGuard<'_> {
        KeyedLockGuard {
            manager: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Wait until no other holder has `key`, then take it
    pub async fn lock(&self, key: &str) -> KeyedLockGuard<'_> {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        debug!(lock_key = key, "Acquired keyed lock");
        self.guard(key, guard)
    }

    /// Take `key` only if it is free right now
    pub fn try_lock(&self, key: &str) -> Option<KeyedLockGuard<'_>> {
        let slot = self.slot(key);
        match slot.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.reclaim(key);
                None
            }
        }
    }

    /// Wait at most `timeout` for `key`
    pub async fn lock_timeout(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<KeyedLockGuard<'_>, LockError> {
        let slot = self.slot(key);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(self.guard(key, guard)),
            Err(_) => {
                self.reclaim(key);
                warn!(
                    lock_key = key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for keyed lock"
                );
                Err(LockError::Timeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Wait for `key` until it is granted or `token` is cancelled
    pub async fn lock_cancellable(
        &self,
        key: &str,
        token: &CancellationToken,
    ) -> Result<KeyedLockGuard<'_>, LockError> {
        let slot = self.slot(key);
        tokio::select! {
            guard = slot.lock_owned() => Ok(self.guard(key, guard)),
            _ = token.cancelled() => {
                self.reclaim(key);
                Err(LockError::Cancelled { key: key.to_string() })
            }
        }
    }

    /// Check whether `key` is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|slot| {
                let held = slot.try_lock().is_err();
                held
            })
            .unwrap_or(false)
    }

    /// Number of keys with a holder or waiter
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Holds a keyed lock until dropped
#[derive(Debug)]
pub struct KeyedLockGuard<'a> {
    manager: &'a KeyedLockManager,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock explicitly
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex before checking whether the entry is still needed
        drop(self.guard.take());
        self.manager.reclaim(&self.key);
        debug!(lock_key = %self.key, "Released keyed lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_counter_never_exceeds_one() {
        let locks = Arc::new(KeyedLockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let _guard = locks.lock("task:shared").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyedLockManager::new();
        let _first = locks.lock(&lock_keys::task(Uuid::new_v4())).await;

        let second = locks
            .lock_timeout(&lock_keys::task(Uuid::new_v4()), Duration::from_millis(50))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_lock_timeout_expires_while_held() {
        let locks = KeyedLockManager::new();
        let held = locks.lock("tenant-create:a").await;

        let err = locks
            .lock_timeout("tenant-create:a", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(held);
        assert!(locks
            .lock_timeout("tenant-create:a", Duration::from_millis(20))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lock_cancellable() {
        let locks = KeyedLockManager::new();
        let _held = locks.lock("task:x").await;
        let token = CancellationToken::new();
        token.cancel();

        let err = locks.lock_cancellable("task:x", &token).await.unwrap_err();
        assert_eq!(
            err,
            LockError::Cancelled {
                key: "task:x".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_waiter_is_granted_after_release() {
        let locks = Arc::new(KeyedLockManager::new());
        let guard = locks.lock("task:y").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.lock("task:y").await;
                guard.key().to_string()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert!(locks.is_locked("task:y"));
        guard.unlock();

        assert_eq!(waiter.await.unwrap(), "task:y");
        assert!(!locks.is_locked("task:y"));
    }

    #[test]
    fn test_lock_keys_are_scoped() {
        let id = Uuid::new_v4();
        assert_eq!(lock_keys::task(id), format!("task:{id}"));
        assert_eq!(lock_keys::tenant_create(id), format!("tenant-create:{id}"));
        assert_ne!(lock_keys::task(id), lock_keys::tenant_create(id));
    }
}
