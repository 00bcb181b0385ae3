use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

use super::change::{HistoryEntryChange, HistoryEntryChangeType};
use super::HistoryError;
use crate::model::{HistoryEntryInfos, UnixTimeMs, UploadInfos, UploadStatus};
use crate::storage::HistoryStorage;

/// Identifies one row of the repository list for as long as it exists,
/// whatever happens to the rows around it.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EntryKey(u64);

#[derive(Debug)]
struct TrackedEntry {
    key: EntryKey,
    record_id: Option<i64>,
    entry: HistoryEntryInfos,
}

#[derive(Debug, Default)]
struct RepositoryState {
    entries: Vec<TrackedEntry>,
    changes: VecDeque<HistoryEntryChange>,
    next_key: u64,
}

impl RepositoryState {
    fn allocate_key(&mut self) -> EntryKey {
        let key = EntryKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn index_of(&self, key: EntryKey) -> Option<usize> {
        self.entries.iter().position(|t| t.key == key)
    }

    fn append(&mut self, entry: HistoryEntryInfos, record_id: Option<i64>) -> EntryKey {
        let key = self.allocate_key();
        self.changes.push_back(
            HistoryEntryChange::new(HistoryEntryChangeType::New, self.entries.len(), entry.clone()).with_key(key),
        );
        self.entries.push(TrackedEntry { key, record_id, entry });
        key
    }

    fn replace(
        &mut self,
        index: usize,
        entry: HistoryEntryInfos,
        record_id: Option<i64>,
        change_type: HistoryEntryChangeType,
    ) {
        let tracked = &mut self.entries[index];
        tracked.entry = entry.clone();
        tracked.record_id = record_id;
        let key = tracked.key;
        self.changes
            .push_back(HistoryEntryChange::new(change_type, index, entry).with_key(key));
    }

    fn remove_at(&mut self, index: usize) -> TrackedEntry {
        let removed = self.entries.remove(index);
        self.changes.push_back(
            HistoryEntryChange::new(HistoryEntryChangeType::Deleted, index, removed.entry.clone())
                .with_key(removed.key),
        );
        removed
    }

    fn entries(&self) -> Vec<HistoryEntryInfos> {
        self.entries.iter().map(|t| t.entry.clone()).collect()
    }

    fn keys(&self) -> Vec<EntryKey> {
        self.entries.iter().map(|t| t.key).collect()
    }
}

/// Stored record behind a row, if it has one.
fn stored_record(tracked: &TrackedEntry) -> Option<UploadInfos> {
    (tracked.record_id.is_some() || tracked.entry.is_persisted()).then(|| UploadInfos {
        image_base_link: tracked.entry.image_base_link.clone(),
        image_name: tracked.entry.image_name.clone(),
        upload_time_ms: tracked.entry.upload_time_ms,
        id: tracked.record_id,
    })
}

/// Single consumer handle on the change queue. Dropping it (or calling
/// [`ChangeSubscription::unsubscribe`]) frees the slot for the next consumer.
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: watch::Receiver<u64>,
    slot: Arc<AtomicBool>,
}

impl ChangeSubscription {
    /// Waits until at least one change was queued since the last call.
    /// Returns `false` once the repository is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Acknowledges every change signalled so far without waiting.
    pub fn mark_seen(&mut self) {
        let _ = self.receiver.borrow_and_update();
    }

    pub fn unsubscribe(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}

/// Authoritative history list. It is the only writer of history state and
/// the only producer of change events; consumers mirror the list by applying
/// the queued changes in order.
pub struct HistoryEntryRepository<S: HistoryStorage> {
    storage: Arc<S>,
    state: RwLock<RepositoryState>,
    notifier: watch::Sender<u64>,
    subscribed: Arc<AtomicBool>,
}

impl<S: HistoryStorage> HistoryEntryRepository<S> {
    /// Builds the list from storage. The initial rows do not produce events.
    #[instrument(skip(storage))]
    pub async fn load(storage: Arc<S>) -> Result<Self, HistoryError> {
        let records = storage.all_upload_infos().await?;

        let mut state = RepositoryState::default();
        for record in records {
            let key = state.allocate_key();
            state.entries.push(TrackedEntry {
                key,
                record_id: record.id,
                entry: HistoryEntryInfos::from(&record),
            });
        }
        info!(entries = state.entries.len(), "history loaded");

        let (notifier, _) = watch::channel(0);
        Ok(Self {
            storage,
            state: RwLock::new(state),
            notifier,
            subscribed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn notify(&self) {
        self.notifier.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Copy of the current list.
    pub async fn snapshot(&self) -> Vec<HistoryEntryInfos> {
        self.state.read().await.entries()
    }

    /// Copy of the current list, with the pending changes dropped in the same
    /// step. The copy already contains every dropped change.
    pub async fn snapshot_and_reset_changes(&self) -> Vec<HistoryEntryInfos> {
        self.keyed_snapshot_and_reset_changes().await.1
    }

    /// Same as [`Self::snapshot_and_reset_changes`], with the key of every row.
    pub(super) async fn keyed_snapshot_and_reset_changes(&self) -> (Vec<EntryKey>, Vec<HistoryEntryInfos>) {
        let mut state = self.state.write().await;
        let dropped = state.changes.len();
        state.changes.clear();
        if dropped > 0 {
            debug!(dropped, "pending changes folded into snapshot");
        }
        (state.keys(), state.entries())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_changes(&self) -> Vec<HistoryEntryChange> {
        self.state.read().await.changes.iter().cloned().collect()
    }

    pub async fn first_change(&self) -> Option<HistoryEntryChange> {
        self.state.read().await.changes.front().cloned()
    }

    pub async fn remove_first_change(&self) -> Option<HistoryEntryChange> {
        self.state.write().await.changes.pop_front()
    }

    /// Registers the consumer of the change queue. Only one consumer may be
    /// registered at a time.
    pub fn subscribe(&self) -> Result<ChangeSubscription, HistoryError> {
        self.subscribed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HistoryError::AlreadySubscribed)?;

        Ok(ChangeSubscription {
            receiver: self.notifier.subscribe(),
            slot: Arc::clone(&self.subscribed),
        })
    }

    #[must_use]
    pub fn has_subscriber(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Appends a row that is not backed by a stored record. Emits NEW.
    pub async fn append(&self, entry: HistoryEntryInfos) -> EntryKey {
        let key = self.state.write().await.append(entry, None);
        self.notify();
        key
    }

    /// Replaces the row at `index`. Emits CHANGED.
    ///
    /// Storage follows the row: a finished entry is upserted, anything else
    /// drops the record the row had.
    #[instrument(skip(self, entry))]
    pub async fn update(&self, index: usize, entry: HistoryEntryInfos) -> Result<(), HistoryError> {
        {
            let mut state = self.state.write().await;
            let len = state.entries.len();
            let Some(tracked) = state.entries.get(index) else {
                return Err(HistoryError::IndexOutOfRange { index, len });
            };

            let old_record = stored_record(tracked);
            let same_link = tracked.entry.image_base_link == entry.image_base_link;

            let record_id = if entry.is_persisted() {
                if let Some(old) = old_record.as_ref().filter(|_| !same_link) {
                    self.storage.delete_upload_infos(old).await?;
                }
                let record = UploadInfos {
                    image_base_link: entry.image_base_link.clone(),
                    image_name: entry.image_name.clone(),
                    upload_time_ms: entry.upload_time_ms,
                    id: if same_link { tracked.record_id } else { None },
                };
                Some(self.storage.insert_upload_infos(&record).await?)
            } else {
                if let Some(old) = &old_record {
                    debug!(index, "row no longer finished, dropping its record");
                    self.storage.delete_upload_infos(old).await?;
                }
                None
            };

            state.replace(index, entry, record_id, HistoryEntryChangeType::Changed);
        }
        self.notify();
        Ok(())
    }

    /// Deletes the row at `index` and its stored record. Emits DELETED.
    #[instrument(skip(self))]
    pub async fn remove(&self, index: usize) -> Result<HistoryEntryInfos, HistoryError> {
        let removed = {
            let mut state = self.state.write().await;
            let len = state.entries.len();
            if index >= len {
                return Err(HistoryError::IndexOutOfRange { index, len });
            }
            self.remove_locked(&mut state, index).await?
        };

        self.notify();
        info!(index, "history entry removed");
        Ok(removed)
    }

    /// Deletes the row identified by `key`, wherever it sits now, and its
    /// stored record. Emits DELETED.
    #[instrument(skip(self))]
    pub async fn remove_by_key(&self, key: EntryKey) -> Result<HistoryEntryInfos, HistoryError> {
        let (index, removed) = {
            let mut state = self.state.write().await;
            let index = state.index_of(key).ok_or(HistoryError::UnknownEntry)?;
            (index, self.remove_locked(&mut state, index).await?)
        };

        self.notify();
        info!(index, "history entry removed");
        Ok(removed)
    }

    async fn remove_locked(&self, state: &mut RepositoryState, index: usize) -> Result<HistoryEntryInfos, HistoryError> {
        if let Some(record) = stored_record(&state.entries[index]) {
            self.storage.delete_upload_infos(&record).await?;
        }
        Ok(state.remove_at(index).entry)
    }

    /// Deletes every row and stored record. Emits one DELETED per row, last
    /// row first so every index stays in bounds.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize, HistoryError> {
        let count = {
            let mut state = self.state.write().await;
            self.storage.delete_all_upload_infos().await?;
            let count = state.entries.len();
            for index in (0..count).rev() {
                state.remove_at(index);
            }
            count
        };

        if count > 0 {
            self.notify();
        }
        info!(count, "history cleared");
        Ok(count)
    }

    /// Adds the row of an upload that just started. Emits NEW.
    pub async fn begin_upload(&self, image_name: &str) -> EntryKey {
        self.append(HistoryEntryInfos::uploading(image_name, UnixTimeMs::now()))
            .await
    }

    /// Stores `infos` (replacing any record with the same base link) and
    /// turns the upload row into a finished entry. Emits FINISHED, preceded
    /// by DELETED for any other row showing the same link. When the upload
    /// row is gone the finished entry is appended instead (NEW).
    #[instrument(skip(self, infos), fields(link = %infos.image_base_link))]
    pub async fn finish_upload(&self, key: EntryKey, infos: UploadInfos) -> Result<UploadInfos, HistoryError> {
        let stored = {
            let mut state = self.state.write().await;
            let row_id = self.storage.insert_upload_infos(&infos).await?;
            let stored = UploadInfos {
                id: Some(row_id),
                ..infos
            };
            let entry = HistoryEntryInfos::from(&stored);

            while let Some(duplicate) = state
                .entries
                .iter()
                .position(|t| t.key != key && t.entry.image_base_link == stored.image_base_link)
            {
                debug!(index = duplicate, "dropping row replaced by new upload");
                state.remove_at(duplicate);
            }

            match state.index_of(key) {
                Some(index) => {
                    state.replace(index, entry, Some(row_id), HistoryEntryChangeType::Finished);
                }
                None => {
                    warn!("upload row disappeared before completion, appending result");
                    state.append(entry, Some(row_id));
                }
            }
            stored
        };

        self.notify();
        Ok(stored)
    }

    /// Marks the upload row as failed. Nothing is stored. Emits CHANGED;
    /// returns `false` when the row is gone or no longer uploading.
    pub async fn fail_upload(&self, key: EntryKey, message: &str) -> bool {
        let changed = {
            let mut state = self.state.write().await;
            match state.index_of(key) {
                Some(index) if state.entries[index].entry.upload_status == UploadStatus::Uploading => {
                    let entry = state.entries[index].entry.clone().failed(message);
                    state.replace(index, entry, None, HistoryEntryChangeType::Changed);
                    true
                }
                _ => false,
            }
        };

        if changed {
            self.notify();
        }
        changed
    }
}
