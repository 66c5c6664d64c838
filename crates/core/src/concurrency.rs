//! Worker pool, per-key locks and cooperative cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const MIN_PARALLELISM: usize = 3;
pub const MAX_PARALLELISM: usize = 20;

/// Interval at which [`busy_wait_join`] hands control back to its caller.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded pool: at most `size` submitted futures run at the same time.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(parallelism: usize) -> Self {
        let size = parallelism.clamp(MIN_PARALLELISM, MAX_PARALLELISM);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Size derived from the number of logical cores.
    pub fn from_device() -> Self {
        Self::new(num_cpus::get() * 2)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Spawn a task that waits for a pool slot before running.
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _slot = ScopedAcquire::acquire(&semaphore).await;
            fut.await
        })
    }

    /// Run every future under the pool and return the outputs in input order.
    /// A panicked task yields `None` in its slot.
    pub async fn join_all<F, T>(&self, futs: Vec<F>) -> Vec<Option<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<JoinHandle<T>> = futs.into_iter().map(|f| self.spawn(f)).collect();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| match r {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!(error = %e, "pool task did not complete");
                    None
                }
            })
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::from_device()
    }
}

/// A single semaphore slot, released when dropped.
#[derive(Debug)]
pub struct ScopedAcquire {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ScopedAcquire {
    pub async fn acquire(semaphore: &Arc<Semaphore>) -> Self {
        // A closed semaphore means shutdown; proceed without a slot.
        let permit = semaphore.clone().acquire_owned().await.ok();
        Self { _permit: permit }
    }

    pub fn try_acquire(semaphore: &Arc<Semaphore>) -> Option<Self> {
        semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| Self { _permit: Some(p) })
    }
}

/// Per-key async mutexes, created on first use under a meta-lock.
#[derive(Default, Debug)]
pub struct NamedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `key`. Holding the handle keeps the entry alive.
    pub fn handle(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.handle(key).try_lock_owned().ok()
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune(&self) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, l| Arc::strong_count(l) > 1);
    }

    /// Forget `key` unless someone still holds or waits on it. Returns
    /// whether the entry is gone.
    pub fn release(&self, key: &str) -> bool {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(key) {
            Some(l) if Arc::strong_count(l) > 1 => false,
            Some(_) => {
                map.remove(key);
                true
            }
            None => true,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks
            .lock()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared abort flag polled by background loops at every iteration and
/// provider call boundary.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag {
    token: CancellationToken,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A flag that trips with this one but can also be tripped on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// Join a task while yielding every [`JOIN_POLL_INTERVAL`] so the caller's
/// event loop is never held for long. Returns `None` when aborted first or
/// when the task panicked.
pub async fn busy_wait_join<T>(mut handle: JoinHandle<T>, abort: &AbortFlag) -> Option<T> {
    loop {
        if abort.is_aborted() {
            handle.abort();
            return None;
        }
        match tokio::time::timeout(JOIN_POLL_INTERVAL, &mut handle).await {
            Ok(Ok(v)) => return Some(v),
            Ok(Err(e)) => {
                debug!(error = %e, "joined task failed");
                return None;
            }
            Err(_) => tokio::task::yield_now().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pool_size_is_clamped() {
        assert_eq!(WorkerPool::new(1).size(), MIN_PARALLELISM);
        assert_eq!(WorkerPool::new(64).size(), MAX_PARALLELISM);
        assert_eq!(WorkerPool::new(8).size(), 8);
    }

    #[tokio::test]
    async fn join_all_preserves_order_and_bounds_parallelism() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futs: Vec<_> = (0..10)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let out = pool.join_all(futs).await;
        assert_eq!(out, (0..10).map(Some).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn named_lock_serializes_same_key() {
        let locks = Arc::new(NamedLocks::new());
        let guard = locks.lock("a").await;
        assert!(locks.try_lock("a").is_none());
        assert!(locks.try_lock("b").is_some());
        drop(guard);
        assert!(locks.try_lock("a").is_some());
        locks.prune();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn release_keeps_locks_someone_waits_on() {
        let locks = NamedLocks::new();
        let guard = locks.lock("tt0111161").await;
        assert!(!locks.release("tt0111161"));
        drop(guard);
        assert!(locks.release("tt0111161"));
        assert!(!locks.contains("tt0111161"));
        assert!(locks.release("never-locked"));
    }

    #[tokio::test]
    async fn busy_wait_join_returns_value() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            7
        });
        assert_eq!(busy_wait_join(handle, &AbortFlag::new()).await, Some(7));
    }

    #[tokio::test]
    async fn busy_wait_join_honours_abort() {
        let abort = AbortFlag::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            1
        });
        let a = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            a.abort();
        });
        assert_eq!(busy_wait_join(handle, &abort).await, None);
    }

    #[test]
    fn child_flag_follows_parent() {
        let parent = AbortFlag::new();
        let child = parent.child();
        assert!(!child.is_aborted());
        parent.abort();
        assert!(child.is_aborted());
    }
}
