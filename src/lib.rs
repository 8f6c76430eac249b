//! Roster Sync - write-back cache between a roster directory and a graph store
//!
//! Mirrors the accounts and contacts reported by an account directory into a
//! persistent resource graph, without reading the store back on every change.
//!
//! ## Architecture
//!
//! ```text
//! RosterEvent ──▶ Controller ──▶ dispatch ──▶ SyncCache ──┬─ create ─────────▶ ResourceStore
//!   (mpsc)        (loads cache,               (identity   │                    (MemoryStore,
//!                  readiness)                  index)     └─ WriteBackBatcher ─▶  SledStore)
//!                                                            (one bulk write per window)
//! ```
//!
//! - **Loader**: rebuilds the identity index from the store in phases and
//!   signals readiness
//! - **SyncCache**: maps external accounts and contacts to store handles;
//!   creates immediately, updates through the batcher, removes softly
//! - **WriteBackBatcher**: merges property deltas and writes them once the
//!   quiescence window after the first change has elapsed
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/roster-sync/
//! ├── graph.sled/            # Resource graph
//! └── config.toml            # Configuration
//! ```

pub mod batcher;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod identity;
pub mod loader;
pub mod store;

// Re-exports
pub use batcher::{BatcherState, BatcherStats, WriteBackBatcher};
pub use cache::{ReconcileSummary, SyncCache};
pub use config::Config;
pub use controller::{Controller, RunSummary};
pub use error::SyncError;
pub use events::{dispatch, RosterEvent};
pub use identity::{
    AccountKey, AccountRecord, Capability, ContactKey, ContactRecord, Presence, PresenceState,
    PresenceType, SimplePresence,
};
pub use loader::{Readiness, ReadinessSignal, ReadinessWatcher};
pub use store::{MemoryStore, ResourceStore, SledStore};
