//! Upload history: the authoritative repository, the change events it
//! produces, and the mirror kept by the presentation layer.

mod change;
mod repository;
mod view_model;

use thiserror::Error;

use crate::storage::StorageError;
use crate::{AppError, ErrorKind};

pub use self::change::{HistoryEntryChange, HistoryEntryChangeType, ListUpdate};
pub use self::repository::{ChangeSubscription, EntryKey, HistoryEntryRepository};
pub use self::view_model::HistoryViewModel;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("history index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("history entry no longer exists")]
    UnknownEntry,

    #[error("history changes already have a subscriber")]
    AlreadySubscribed,
}

impl From<HistoryError> for AppError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::Storage(inner) => inner.into(),
            HistoryError::IndexOutOfRange { index, len } => {
                AppError::new(ErrorKind::InvalidState, "History entry not found")
                    .with_context("index", index.to_string())
                    .with_context("len", len.to_string())
            }
            HistoryError::UnknownEntry => AppError::new(ErrorKind::InvalidState, "History entry not found"),
            HistoryError::AlreadySubscribed => {
                AppError::new(ErrorKind::InvalidState, "History changes already have a subscriber")
            }
        }
    }
}
