//! Write-back batcher - coalesces property mutations into one bulk write
//!
//! ## Design
//!
//! ```text
//!            queue()                 window elapsed
//!   Idle ─────────────▶ Pending ───────────────────▶ Flushing ──▶ Idle
//!                        │  ▲                            │
//!                        └──┘ queue() merges,            │ queue() opens a
//!                             window not re-armed        ▼ new Pending cycle
//! ```
//!
//! The window is measured from the first mutation of a cycle. Later
//! mutations merge into the pending change set without pushing the deadline
//! out, so a steady trickle of updates still reaches the store once per
//! window. Each cycle carries a number; a timer firing for a cycle that was
//! already flushed by [`WriteBackBatcher::flush_now`] does nothing. `flush_now`
//! also cancels the open cycle's timer, so no task outlives the window it
//! was armed for.
//!
//! A failed bulk write is logged and dropped. There is no retry.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::SyncError;
use crate::store::{ChangeSet, ResourceDelta, ResourceHandle, ResourceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    /// Nothing pending, nothing in flight
    Idle,
    /// A window is open and collecting mutations
    Pending,
    /// A bulk write is in flight and no new window is open
    Flushing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Mutations accepted into a pending change set
    pub queued: u64,
    /// Bulk writes issued
    pub flushes: u64,
    /// Bulk writes the store rejected
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Inner {
    pending: ChangeSet,
    armed: bool,
    cycle: u64,
    in_flight: usize,
    stats: BatcherStats,
    /// Timer of the open cycle
    timer: Option<JoinHandle<()>>,
}

struct Shared {
    store: Arc<dyn ResourceStore>,
    window: Duration,
    inner: Mutex<Inner>,
    idle: Notify,
}

/// Handle to the batcher; clones share the same pending state
#[derive(Clone)]
pub struct WriteBackBatcher {
    shared: Arc<Shared>,
}

impl WriteBackBatcher {
    /// Create a new batcher writing to `store` after `window` of quiescence
    pub fn new(store: Arc<dyn ResourceStore>, window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                window,
                inner: Mutex::new(Inner::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Merge changes into the pending batch, opening a window if none is open
    pub async fn queue(&self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }

        let mut inner = self.shared.inner.lock().await;
        inner.pending.merge(changes);
        inner.stats.queued += 1;
        if inner.armed {
            return;
        }

        inner.armed = true;
        inner.cycle += 1;
        let cycle = inner.cycle;

        let window_ms = self.shared.window.as_millis() as u64;
        debug!(cycle, window_ms, "Write-back window opened");

        let shared = Arc::clone(&self.shared);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.window).await;
            shared.flush_cycle(Some(cycle)).await;
        }));
    }

    /// Queue a delta for a single resource
    pub async fn queue_delta(&self, handle: ResourceHandle, delta: ResourceDelta) {
        let mut changes = ChangeSet::new();
        changes.merge_delta(handle, delta);
        self.queue(changes).await;
    }

    /// Write whatever is pending now, cancelling the open window
    pub async fn flush_now(&self) -> Result<(), SyncError> {
        let timer = self.shared.inner.lock().await.timer.take();
        if let Some(timer) = timer {
            timer.abort();
            // Returns once the cancelled task has released the shared state
            let _ = timer.await;
        }

        match self.shared.take(None).await {
            Some(changes) => self.shared.write(changes).await,
            None => Ok(()),
        }
    }

    /// Wait until nothing is pending and no write is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            {
                let inner = self.shared.inner.lock().await;
                if !inner.armed && inner.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    pub async fn state(&self) -> BatcherState {
        let inner = self.shared.inner.lock().await;
        if inner.armed {
            BatcherState::Pending
        } else if inner.in_flight > 0 {
            BatcherState::Flushing
        } else {
            BatcherState::Idle
        }
    }

    pub async fn stats(&self) -> BatcherStats {
        self.shared.inner.lock().await.stats.clone()
    }

    /// Snapshot of the pending change set
    pub async fn pending(&self) -> ChangeSet {
        self.shared.inner.lock().await.pending.clone()
    }
}

impl Shared {
    async fn flush_cycle(&self, cycle: Option<u64>) {
        match self.take(cycle).await {
            // Failures are logged in write()
            Some(changes) => {
                let _ = self.write(changes).await;
            }
            None => self.idle.notify_waiters(),
        }
    }

    /// Detach the pending change set, closing the window.
    ///
    /// With a cycle number, only succeeds if that cycle is still the open one.
    async fn take(&self, cycle: Option<u64>) -> Option<ChangeSet> {
        let mut inner = self.inner.lock().await;
        if let Some(cycle) = cycle {
            if !inner.armed || inner.cycle != cycle {
                return None;
            }
        }
        // Detach without aborting; with a cycle number this runs on the timer
        inner.timer = None;
        inner.armed = false;
        if inner.pending.is_empty() {
            return None;
        }
        inner.in_flight += 1;
        Some(std::mem::take(&mut inner.pending))
    }

    async fn write(&self, changes: ChangeSet) -> Result<(), SyncError> {
        let resources = changes.len();
        let result = self.store.apply(changes).await;

        {
            let mut inner = self.inner.lock().await;
            inner.in_flight -= 1;
            inner.stats.flushes += 1;
            match &result {
                Ok(()) => debug!(resources, "Write-back batch stored"),
                Err(e) => {
                    inner.stats.failed += 1;
                    error!(resources, error = %e, "Write-back batch dropped");
                }
            }
        }

        self.idle.notify_waiters();
        result
    }
}
