//! Lock Manager (§4.3): a cluster-wide advisory lock keyed by a stable hash
//! of `instance_id`, plus the local cancellation registry used to interrupt
//! an in-flight run pass when a cross-node cancellation broadcast arrives.
//!
//! The distributed lock's wire protocol (the actual cluster-wide mutual
//! exclusion) is provided by the persistent store's advisory lock primitive
//! and is out of scope here (§1); this module owns only the registry side
//! and the timeout/acquire ergonomics the run loop calls through.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};

use crate::error::{EngineError, EngineResult};

/// Stable 64-bit hash of an instance id, used as the advisory lock key
/// (§4.3).
pub fn lock_key(instance_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    instance_id.hash(&mut hasher);
    hasher.finish()
}

/// A held advisory lock. Dropping it (or calling [`LockManager::release`]
/// explicitly) fires the local cancellation signal registered for this
/// instance.
pub struct LockHandle {
    instance_id: String,
    manager: LockManager,
    released: bool,
}

impl LockHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn release(mut self) {
        self.manager.release(&self.instance_id);
        self.released = true;
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(&self.instance_id);
        }
    }
}

/// Cancellation registry: `instance_id → cancel-fn`, kept under a single
/// mutex (§4.3, §5). Only insert/delete/lookup happen under the mutex; no
/// blocking calls are ever made while it is held.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager { inner: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the advisory lock for `instance_id`, bounded by `wait`
    /// (default 5s, §4.3). In this in-process form the cluster-wide
    /// exclusion is delegated to the caller (normally backed by the store's
    /// distributed lock); this registers the cancellation channel and
    /// returns a handle whose `release`/`drop` fires it.
    pub async fn acquire(&self, instance_id: &str, wait: Duration) -> EngineResult<LockHandle> {
        let started = std::time::Instant::now();
        let (tx, _rx) = watch::channel(false);
        let register = async {
            let mut guard = self.inner.lock();
            guard.insert(instance_id.to_string(), tx);
        };

        let result = timeout(wait, register).await;
        let outcome = if result.is_ok() { "acquired" } else { "timeout" };
        crate::metrics::LOCK_WAIT_SECONDS
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => Ok(LockHandle {
                instance_id: instance_id.to_string(),
                manager: self.clone(),
                released: false,
            }),
            Err(_) => Err(EngineError::LockTimeout),
        }
    }

    /// A receiver that fires when this instance's lock is released or a
    /// cross-node cancellation broadcast is observed for it (§5: "each task
    /// treats context cancellation as a directive to stop promptly").
    pub fn cancel_signal(&self, instance_id: &str) -> Option<watch::Receiver<bool>> {
        self.inner.lock().get(instance_id).map(|tx| tx.subscribe())
    }

    /// Broadcasts cancellation for `instance_id` without releasing the
    /// entry, mirroring the `cancelSubflow` ticker of §4.10/§9.
    pub fn broadcast_cancel(&self, instance_id: &str) {
        if let Some(tx) = self.inner.lock().get(instance_id) {
            let _ = tx.send(true);
        }
    }

    fn release(&self, instance_id: &str) {
        if let Some(tx) = self.inner.lock().remove(instance_id) {
            let _ = tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable() {
        assert_eq!(lock_key("ns/wf/abcdef"), lock_key("ns/wf/abcdef"));
        assert_ne!(lock_key("ns/wf/abcdef"), lock_key("ns/wf/ghijkl"));
    }

    #[tokio::test]
    async fn acquire_then_release_fires_cancel_signal() {
        let mgr = LockManager::new();
        let handle = mgr.acquire("ns/wf/abcdef", Duration::from_secs(1)).await.unwrap();
        let mut signal = mgr.cancel_signal("ns/wf/abcdef").unwrap();

        handle.release();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }

    #[tokio::test]
    async fn broadcast_cancel_does_not_release_the_slot() {
        let mgr = LockManager::new();
        let _handle = mgr.acquire("ns/wf/abcdef", Duration::from_secs(1)).await.unwrap();
        let mut signal = mgr.cancel_signal("ns/wf/abcdef").unwrap();

        mgr.broadcast_cancel("ns/wf/abcdef");
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
        assert!(mgr.cancel_signal("ns/wf/abcdef").is_some());
    }
}
