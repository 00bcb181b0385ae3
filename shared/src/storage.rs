use thiserror::Error;

use crate::model::UploadInfos;
use crate::{AppError, ErrorKind};

#[cfg(not(target_arch = "wasm32"))]
mod sqlite;

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[cfg(not(target_arch = "wasm32"))]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("corrupted record {id}: {reason}")]
    CorruptedRecord { id: i64, reason: String },
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::new(ErrorKind::Storage, "History storage failed").with_internal(e.to_string())
    }
}

/// Persisted table of upload records, keyed by a generated id and unique on
/// the base link.
#[async_trait::async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Every record, oldest upload first.
    async fn all_upload_infos(&self) -> Result<Vec<UploadInfos>, StorageError>;

    /// Inserts `infos`, replacing any record with the same base link (or the
    /// same id). Returns the row id of the stored record.
    async fn insert_upload_infos(&self, infos: &UploadInfos) -> Result<i64, StorageError>;

    /// Removes the records matching `infos` by id, or by base link when it
    /// has no id. Returns how many rows went away.
    async fn delete_upload_infos(&self, infos: &UploadInfos) -> Result<usize, StorageError>;

    async fn delete_all_upload_infos(&self) -> Result<usize, StorageError>;

    async fn find_by_row_id(&self, row_id: i64) -> Result<Option<UploadInfos>, StorageError>;

    async fn find_by_base_link(&self, base_link: &str) -> Result<Option<UploadInfos>, StorageError>;
}
