use std::sync::Arc;

use tracing::{debug, trace};

use super::change::{HistoryEntryChange, ListUpdate};
use super::repository::{ChangeSubscription, EntryKey, HistoryEntryRepository};
use super::HistoryError;
use crate::model::HistoryEntryInfos;
use crate::storage::HistoryStorage;

/// Presentation-side copy of the history list, kept in sync by replaying the
/// repository's change queue. It is the queue's only consumer while it lives.
pub struct HistoryViewModel<S: HistoryStorage> {
    repository: Arc<HistoryEntryRepository<S>>,
    subscription: ChangeSubscription,
    entries: Vec<HistoryEntryInfos>,
    keys: Vec<Option<EntryKey>>,
}

impl<S: HistoryStorage> HistoryViewModel<S> {
    /// Subscribes to the repository and starts from a snapshot of it. Changes
    /// queued before this point are already part of the snapshot and are
    /// dropped.
    ///
    /// Fails with [`HistoryError::AlreadySubscribed`] while another mirror of
    /// the same repository is alive.
    pub async fn new(repository: Arc<HistoryEntryRepository<S>>) -> Result<Self, HistoryError> {
        let subscription = repository.subscribe()?;
        let (keys, entries) = repository.keyed_snapshot_and_reset_changes().await;
        Ok(Self {
            repository,
            subscription,
            entries,
            keys: keys.into_iter().map(Some).collect(),
        })
    }

    /// Waits until the repository queued something since the last call.
    /// Returns `false` once the repository is gone.
    pub async fn changed(&mut self) -> bool {
        self.subscription.changed().await
    }

    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.subscription.has_changed()
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntryInfos] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&HistoryEntryInfos> {
        self.entries.get(index)
    }

    /// Repository key of the row shown at `index`.
    #[must_use]
    pub fn key(&self, index: usize) -> Option<EntryKey> {
        self.keys.get(index).copied().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<HistoryEntryRepository<S>> {
        &self.repository
    }

    /// Applies one change to the mirror. Returns `false`, leaving the mirror
    /// untouched, when the index is out of bounds for the change type.
    pub fn apply_history_change(&mut self, change: &HistoryEntryChange) -> bool {
        self.apply(change).is_some()
    }

    fn apply(&mut self, change: &HistoryEntryChange) -> Option<ListUpdate> {
        let update = change.apply_to(&mut self.entries);
        match update {
            Some(ListUpdate::Inserted(_)) => self.keys.push(change.entry_key),
            Some(ListUpdate::Removed(index)) => {
                self.keys.remove(index);
            }
            Some(ListUpdate::Changed(index)) => self.keys[index] = change.entry_key,
            None => {}
        }
        if update.is_none() {
            debug!(
                change_type = change.change_type.as_str(),
                index = change.change_index,
                len = self.entries.len(),
                "skipping out of range history change"
            );
        }
        update
    }

    /// Dequeues the head of the repository queue without applying it.
    pub async fn remove_first_history_entry_change(&self) -> Option<HistoryEntryChange> {
        self.repository.remove_first_change().await
    }

    /// Drains the repository queue into the mirror, head first. Every change
    /// is dequeued, applied or not; only applied ones are reported.
    pub async fn apply_pending_changes(&mut self) -> Vec<ListUpdate> {
        let mut updates = Vec::new();
        self.subscription.mark_seen();

        while let Some(change) = self.repository.first_change().await {
            if let Some(update) = self.apply(&change) {
                trace!(?update, "history change applied");
                updates.push(update);
            }
            self.repository.remove_first_change().await;
        }

        updates
    }
}
