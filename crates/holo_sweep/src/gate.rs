//! Admission control for outstanding key tasks.
//!
//! The gate is the only backpressure in the system: when every slot is taken
//! the coordinator waits in [`ConcurrencyGate::acquire`], the store is never
//! throttled directly. A slot is released by dropping its [`GateSlot`], which
//! also wakes anyone blocked in [`ConcurrencyGate::wait_for_outstanding_at_most`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    outstanding: AtomicUsize,
    high_water: AtomicUsize,
    saturations: AtomicU64,
    released: Notify,
}

/// Counting gate with a fixed capacity.
#[derive(Clone, Debug)]
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

/// One reserved slot. Dropping it frees the slot; it never blocks.
#[derive(Debug)]
pub struct GateSlot {
    inner: Arc<GateInner>,
    _permit: OwnedSemaphorePermit,
}

/// The gate's semaphore was closed; only possible while tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                outstanding: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                saturations: AtomicU64::new(0),
                released: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Highest outstanding count ever observed.
    pub fn high_water(&self) -> usize {
        self.inner.high_water.load(Ordering::Relaxed)
    }

    /// Number of times `acquire` found the gate full.
    pub fn saturations(&self) -> u64 {
        self.inner.saturations.load(Ordering::Relaxed)
    }

    /// Reserve a slot, waiting while the gate is full.
    pub async fn acquire(&self) -> Result<GateSlot, GateClosed> {
        let capacity = self.inner.capacity;
        let permit = match self.inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                self.inner.saturations.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    outstanding = capacity,
                    "gate saturated, waiting for a task to finish before continuing"
                );
                let permit = self
                    .inner
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| GateClosed)?;
                tracing::warn!(capacity, "gate slot freed, continuing");
                permit
            }
            Err(TryAcquireError::Closed) => return Err(GateClosed),
        };

        let now = self.inner.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.high_water.fetch_max(now, Ordering::Relaxed);
        Ok(GateSlot {
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Wait until at most `limit` slots are held.
    pub async fn wait_for_outstanding_at_most(&self, limit: usize) {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            // Register before checking so a release in between is not missed.
            released.as_mut().enable();
            if self.outstanding() <= limit {
                return;
            }
            released.await;
        }
    }
}

impl GateSlot {
    /// Slots held across the whole gate, this one included.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.inner.released.notify_waiters();
    }
}
