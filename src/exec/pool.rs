use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounded worker pool backing a dispatcher's blocking tasks.
///
/// Capacity can be changed live: a resize swaps in a fresh semaphore for
/// future acquisitions while in-flight permits stay tied to the old one, so
/// running work is never preempted. Closing the pool rejects new
/// acquisitions permanently.
pub(crate) struct WorkerPool {
    sem: Mutex<Arc<Semaphore>>,
    capacity: AtomicUsize,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sem: Mutex::new(Arc::new(Semaphore::new(capacity))),
            capacity: AtomicUsize::new(capacity),
            closed: AtomicBool::new(false),
        }
    }

    fn current(&self) -> Arc<Semaphore> {
        self.sem
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for a worker slot. Fails once the pool is closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.current().acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Replace the pool's capacity for future acquisitions. No-op once
    /// closed.
    pub fn set_capacity(&self, capacity: usize) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let capacity = capacity.max(1);
        let fresh = Arc::new(Semaphore::new(capacity));
        *self.sem.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Reject all future acquisitions. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.current().close();
    }
}
