//! Per-instance mutual exclusion.
//!
//! The registry is process-wide and in-memory: tokens are not persisted and
//! do not survive a restart. Lingering FAILED_TEMP records, not locks, are
//! what block new operations across restarts.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::LockConfig;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited_ms} ms waiting for the lock on VNF instance {instance_id}")]
    Timeout { instance_id: String, waited_ms: u64 },
}

/// How [`LockManager::with_lock`] behaves when the lock is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Wait with backoff until the lock frees up or the timeout passes.
    Blocking,
    /// Give up immediately.
    BestEffort,
}

/// Registry of held instance locks. Clones share the registry.
#[derive(Debug, Clone)]
pub struct LockManager {
    held: Arc<Mutex<HashSet<String>>>,
    config: LockConfig,
}

/// RAII token for one instance. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstanceLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    instance_id: String,
}

impl InstanceLockGuard {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        lock_registry(&self.held).remove(&self.instance_id);
        debug!(vnf_instance_id = %self.instance_id, "instance lock released");
    }
}

// A panic while holding the registry mutex cannot leave the set half-updated,
// so a poisoned registry is still usable.
fn lock_registry(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new(LockConfig::default())
    }
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        LockManager {
            held: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `None` if another caller holds it.
    pub fn try_acquire(&self, instance_id: &str) -> Option<InstanceLockGuard> {
        let mut held = lock_registry(&self.held);
        if !held.insert(instance_id.to_string()) {
            return None;
        }
        debug!(vnf_instance_id = %instance_id, "instance lock acquired");
        Some(InstanceLockGuard {
            held: Arc::clone(&self.held),
            instance_id: instance_id.to_string(),
        })
    }

    /// Take the lock, polling with exponential backoff plus jitter until
    /// success or `timeout_secs`.
    pub async fn acquire(&self, instance_id: &str) -> Result<InstanceLockGuard, LockError> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut backoff_ms = self.config.poll_interval_ms.max(1);
        loop {
            if let Some(guard) = self.try_acquire(instance_id) {
                return Ok(guard);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(LockError::Timeout {
                    instance_id: instance_id.to_string(),
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let jitter_ms = rand::random::<u64>() % (backoff_ms / 2 + 1);
            let sleep = Duration::from_millis(backoff_ms + jitter_ms).min(timeout - elapsed);
            debug!(
                vnf_instance_id = %instance_id,
                sleep_ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX),
                "waiting for instance lock"
            );
            tokio::time::sleep(sleep).await;
            backoff_ms = (backoff_ms * 2).min(self.config.max_backoff_ms.max(1));
        }
    }

    /// Run `f` while holding the instance lock.
    ///
    /// In [`LockMode::BestEffort`] a busy lock yields `Ok(None)` without
    /// running `f`.
    pub async fn with_lock<F, Fut, T>(
        &self,
        instance_id: &str,
        mode: LockMode,
        f: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = match mode {
            LockMode::Blocking => self.acquire(instance_id).await?,
            LockMode::BestEffort => match self.try_acquire(instance_id) {
                Some(guard) => guard,
                None => return Ok(None),
            },
        };
        let out = f().await;
        drop(guard);
        Ok(Some(out))
    }

    pub fn is_held(&self, instance_id: &str) -> bool {
        lock_registry(&self.held).contains(instance_id)
    }
}
