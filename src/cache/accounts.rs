//! Account lifecycle and account property updates

use std::collections::BTreeSet;
use tracing::{debug, error, info};

use super::{presence_delta, unknown_presence_delta, ReconcileSummary, SyncCache};
use crate::error::SyncError;
use crate::identity::{AccountKey, AccountRecord, Presence, SimplePresence};
use crate::store::{CreateGraph, Property, ResourceDelta, ResourceKind};

impl SyncCache {
    /// Create and index an account; a no-op if it is already indexed.
    ///
    /// The account resource is linked from the owner contact in the same
    /// atomic creation.
    pub async fn create_account(
        &mut self,
        key: AccountKey,
        id: &str,
        protocol: &str,
    ) -> Result<(), SyncError> {
        if self.accounts.contains_key(&key) {
            debug!(account = %key, "Account already indexed");
            return Ok(());
        }

        let mut graph = CreateGraph::new();
        graph
            .resource("account", ResourceKind::ImAccount)
            .with(Property::AccountIdentifier, key.as_str())
            .with(Property::ImAccountType, protocol)
            .with(Property::ImId, id);
        graph.link(self.owner.contact.clone(), Property::HasImAccount, "account");

        let mappings = self.store.create(graph).await.map_err(|e| {
            error!(account = %key, error = %e, "Failed to create account");
            SyncError::Creation(e.to_string())
        })?;
        let handle = mappings.get("account").cloned().ok_or_else(|| {
            SyncError::Creation(format!("no handle minted for account {key}"))
        })?;

        info!(account = %key, handle = %handle, protocol = %protocol, "Account indexed");
        self.accounts.insert(key, AccountRecord::new(handle, protocol));
        Ok(())
    }

    /// Soft-remove an account: presence becomes unknown, the record stays
    pub async fn remove_account(&mut self, key: &AccountKey) {
        let Some(record) = self.accounts.get_mut(key) else {
            debug!(account = %key, "Removal of unindexed account ignored");
            return;
        };
        record.presence = Presence::Unknown;
        let handle = record.handle.clone();

        info!(account = %key, "Account soft-removed");
        self.batcher.queue_delta(handle, unknown_presence_delta()).await;
    }

    /// Soft-remove every indexed account missing from a full listing
    pub async fn reconcile_account_set(
        &mut self,
        current: impl IntoIterator<Item = AccountKey>,
    ) -> ReconcileSummary {
        let current: BTreeSet<AccountKey> = current.into_iter().collect();
        let stale: Vec<AccountKey> = self
            .account_keys()
            .into_iter()
            .filter(|key| !current.contains(key))
            .collect();

        for key in &stale {
            self.remove_account(key).await;
        }

        let summary = ReconcileSummary {
            removed: stale.len(),
            ..Default::default()
        };
        info!(listed = current.len(), removed = summary.removed, "Accounts reconciled");
        summary
    }

    pub async fn set_account_nickname(&mut self, key: &AccountKey, nickname: &str) {
        let Some(record) = self.accounts.get_mut(key) else {
            debug!(account = %key, "Nickname update for unindexed account ignored");
            return;
        };
        record.nickname = Some(nickname.to_string());
        let handle = record.handle.clone();

        let mut delta = ResourceDelta::new();
        delta.set(Property::ImNickname, nickname);
        self.batcher.queue_delta(handle, delta).await;
    }

    pub async fn set_account_presence(&mut self, key: &AccountKey, presence: SimplePresence) {
        let Some(record) = self.accounts.get_mut(key) else {
            debug!(account = %key, "Presence update for unindexed account ignored");
            return;
        };
        let delta = presence_delta(&presence);
        record.presence = Presence::Known(presence);
        let handle = record.handle.clone();

        self.batcher.queue_delta(handle, delta).await;
    }
}
