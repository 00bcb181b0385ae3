use serde::{Deserialize, Serialize};

use super::repository::EntryKey;
use crate::model::HistoryEntryInfos;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEntryChangeType {
    New,
    Deleted,
    Changed,
    /// A CHANGED that marks an upload completing.
    Finished,
}

impl HistoryEntryChangeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Deleted => "deleted",
            Self::Changed => "changed",
            Self::Finished => "finished",
        }
    }
}

/// One pending mutation of the history list, produced by the repository and
/// consumed once by the mirror.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntryChange {
    pub change_type: HistoryEntryChangeType,
    pub change_index: usize,
    /// For DELETED this is the entry that went away.
    pub new_history_entry: HistoryEntryInfos,
    /// Row the change is about, set on every change the repository queues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_key: Option<EntryKey>,
}

/// Structural update of the mirrored list, what a list widget needs to
/// animate a single row instead of redrawing everything.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum ListUpdate {
    Inserted(usize),
    Removed(usize),
    Changed(usize),
}

impl HistoryEntryChange {
    #[must_use]
    pub fn new(change_type: HistoryEntryChangeType, change_index: usize, entry: HistoryEntryInfos) -> Self {
        Self {
            change_type,
            change_index,
            new_history_entry: entry,
            entry_key: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: EntryKey) -> Self {
        self.entry_key = Some(key);
        self
    }

    /// NEW is only valid as a pure append; the others need an existing row.
    #[must_use]
    pub fn is_valid_for(&self, list_len: usize) -> bool {
        match self.change_type {
            HistoryEntryChangeType::New => self.change_index == list_len,
            HistoryEntryChangeType::Deleted
            | HistoryEntryChangeType::Changed
            | HistoryEntryChangeType::Finished => self.change_index < list_len,
        }
    }

    /// Applies the change to `list` if it is in bounds. An out-of-bounds
    /// change leaves `list` untouched and returns `None`.
    pub fn apply_to(&self, list: &mut Vec<HistoryEntryInfos>) -> Option<ListUpdate> {
        if !self.is_valid_for(list.len()) {
            return None;
        }

        let index = self.change_index;
        Some(match self.change_type {
            HistoryEntryChangeType::New => {
                list.push(self.new_history_entry.clone());
                ListUpdate::Inserted(index)
            }
            HistoryEntryChangeType::Deleted => {
                list.remove(index);
                ListUpdate::Removed(index)
            }
            HistoryEntryChangeType::Changed | HistoryEntryChangeType::Finished => {
                list[index] = self.new_history_entry.clone();
                ListUpdate::Changed(index)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{UnixTimeMs, UploadStatus};
    use proptest::prelude::*;

    fn entry(name: &str) -> HistoryEntryInfos {
        HistoryEntryInfos {
            image_base_link: format!("https://www.noelshack.com/2019-14-1-1554135563-{name}"),
            image_name: name.to_string(),
            upload_time_ms: UnixTimeMs(0),
            upload_status: UploadStatus::Finished,
            upload_status_message: String::new(),
        }
    }

    fn names(list: &[HistoryEntryInfos]) -> Vec<&str> {
        list.iter().map(|e| e.image_name.as_str()).collect()
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn test_new_must_append() {
            let change = HistoryEntryChange::new(HistoryEntryChangeType::New, 2, entry("a"));
            assert!(change.is_valid_for(2));
            assert!(!change.is_valid_for(1));
            assert!(!change.is_valid_for(3));
        }

        #[test]
        fn test_index_bound_types() {
            for change_type in [
                HistoryEntryChangeType::Deleted,
                HistoryEntryChangeType::Changed,
                HistoryEntryChangeType::Finished,
            ] {
                let change = HistoryEntryChange::new(change_type, 1, entry("a"));
                assert!(change.is_valid_for(2));
                assert!(!change.is_valid_for(1));
                assert!(!change.is_valid_for(0));
            }
        }
    }

    mod apply_tests {
        use super::*;

        #[test]
        fn test_new_on_empty_list() {
            let mut list = Vec::new();
            let update = HistoryEntryChange::new(HistoryEntryChangeType::New, 0, entry("a")).apply_to(&mut list);
            assert_eq!(update, Some(ListUpdate::Inserted(0)));
            assert_eq!(names(&list), ["a"]);
        }

        #[test]
        fn test_out_of_bounds_delete_is_noop() {
            let mut list = vec![entry("a"), entry("b")];
            let update = HistoryEntryChange::new(HistoryEntryChangeType::Deleted, 5, entry("x")).apply_to(&mut list);
            assert_eq!(update, None);
            assert_eq!(names(&list), ["a", "b"]);
        }

        #[test]
        fn test_delete_and_replace() {
            let mut list = vec![entry("a"), entry("b"), entry("c")];
            assert_eq!(
                HistoryEntryChange::new(HistoryEntryChangeType::Deleted, 1, entry("b")).apply_to(&mut list),
                Some(ListUpdate::Removed(1))
            );
            assert_eq!(
                HistoryEntryChange::new(HistoryEntryChangeType::Finished, 1, entry("z")).apply_to(&mut list),
                Some(ListUpdate::Changed(1))
            );
            assert_eq!(names(&list), ["a", "z"]);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(u8),
        Remove(usize),
        Update(usize, u8, bool),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Append),
            (0usize..16).prop_map(Op::Remove),
            (0usize..16, any::<u8>(), any::<bool>()).prop_map(|(i, n, f)| Op::Update(i, n, f)),
        ]
    }

    proptest! {
        /// Changes generated against a reference list, then replayed on a
        /// mirror, give back the reference list.
        #[test]
        fn prop_mirror_matches_reference(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut reference: Vec<HistoryEntryInfos> = Vec::new();
            let mut changes = Vec::new();

            for op in ops {
                match op {
                    Op::Append(n) => {
                        let e = entry(&n.to_string());
                        changes.push(HistoryEntryChange::new(HistoryEntryChangeType::New, reference.len(), e.clone()));
                        reference.push(e);
                    }
                    Op::Remove(i) if i < reference.len() => {
                        let removed = reference.remove(i);
                        changes.push(HistoryEntryChange::new(HistoryEntryChangeType::Deleted, i, removed));
                    }
                    Op::Update(i, n, finished) if i < reference.len() => {
                        let e = entry(&format!("u{n}"));
                        let change_type = if finished {
                            HistoryEntryChangeType::Finished
                        } else {
                            HistoryEntryChangeType::Changed
                        };
                        changes.push(HistoryEntryChange::new(change_type, i, e.clone()));
                        reference[i] = e;
                    }
                    Op::Remove(_) | Op::Update(..) => {}
                }
            }

            let mut mirror = Vec::new();
            for change in &changes {
                prop_assert!(change.apply_to(&mut mirror).is_some());
            }
            prop_assert_eq!(mirror, reference);
        }

        /// Rejected changes never touch the list.
        #[test]
        fn prop_invalid_change_leaves_list_untouched(len in 0usize..8, index in 0usize..16, kind in 0u8..4) {
            let change_type = match kind {
                0 => HistoryEntryChangeType::New,
                1 => HistoryEntryChangeType::Deleted,
                2 => HistoryEntryChangeType::Changed,
                _ => HistoryEntryChangeType::Finished,
            };
            let mut list: Vec<_> = (0..len).map(|i| entry(&i.to_string())).collect();
            let before = list.clone();
            let change = HistoryEntryChange::new(change_type, index, entry("x"));

            if change.apply_to(&mut list).is_none() {
                prop_assert_eq!(list, before);
            }
        }
    }
}
