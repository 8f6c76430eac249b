//! Controller - owns the cache and drives it from an event stream
//!
//! Events are consumed from an mpsc channel by a single task, so the cache
//! sees them strictly in arrival order. Events sent while the cache is still
//! loading wait in the channel; consumption starts only after readiness.
//! When the channel closes, pending writes are flushed before returning.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::batcher::BatcherStats;
use crate::config::Config;
use crate::error::SyncError;
use crate::events::{dispatch, RosterEvent};
use crate::loader::{self, ReadinessSignal, ReadinessWatcher};
use crate::store::ResourceStore;

/// Result of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub batcher: BatcherStats,
}

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    config: Config,
    readiness: ReadinessSignal,
}

impl Controller {
    /// Create a new controller and a watcher for its readiness
    pub fn new(store: Arc<dyn ResourceStore>, config: Config) -> (Self, ReadinessWatcher) {
        let (readiness, watcher) = ReadinessSignal::new();
        (
            Self {
                store,
                config,
                readiness,
            },
            watcher,
        )
    }

    /// Create the bounded event channel sized from config
    pub fn channel(&self) -> (mpsc::Sender<RosterEvent>, mpsc::Receiver<RosterEvent>) {
        mpsc::channel(self.config.event_channel_capacity.max(1))
    }

    pub fn readiness(&self) -> ReadinessWatcher {
        self.readiness.watcher()
    }

    /// Load the cache, then apply events until the channel closes
    pub async fn run(
        self,
        mut events: mpsc::Receiver<RosterEvent>,
    ) -> Result<RunSummary, SyncError> {
        let mut cache = loader::initialise(self.store, &self.config, &self.readiness).await?;
        info!(
            accounts = cache.account_count(),
            contacts = cache.contact_count(),
            "Cache ready, consuming roster events"
        );

        let mut handled = 0u64;
        while let Some(event) = events.recv().await {
            dispatch(&mut cache, event).await;
            handled += 1;
        }

        info!(events = handled, "Event stream closed, flushing pending writes");
        cache.shutdown().await?;

        Ok(RunSummary {
            events: handled,
            batcher: cache.batcher().stats().await,
        })
    }
}
