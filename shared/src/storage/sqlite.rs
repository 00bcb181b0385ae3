use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{HistoryStorage, StorageError};
use crate::model::{UnixTimeMs, UploadInfos};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS upload_infos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_base_link TEXT NOT NULL UNIQUE,
        image_name TEXT NOT NULL,
        upload_time_ms INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_upload_infos_time ON upload_infos(upload_time_ms ASC, id ASC);
";

const SELECT_COLUMNS: &str = "SELECT id, image_base_link, image_name, upload_time_ms FROM upload_infos";

/// SQLite-backed history. The connection is used from the blocking pool so
/// callers on the async side never wait on disk I/O.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.display(), journal_mode = %journal_mode, "opened history database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            op(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn upload_infos_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_upload_infos(
    (id, image_base_link, image_name, upload_time_ms): (i64, String, String, i64),
) -> Result<UploadInfos, StorageError> {
    let upload_time_ms = u64::try_from(upload_time_ms).map_err(|_| StorageError::CorruptedRecord {
        id,
        reason: format!("negative upload time {upload_time_ms}"),
    })?;

    Ok(UploadInfos::new(image_base_link, image_name, UnixTimeMs(upload_time_ms)).with_id(id))
}

fn to_sql_time(time: UnixTimeMs) -> i64 {
    i64::try_from(time.0).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl HistoryStorage for SqliteStorage {
    async fn all_upload_infos(&self) -> Result<Vec<UploadInfos>, StorageError> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY upload_time_ms ASC, id ASC"))?;
            let rows = stmt
                .query_map([], upload_infos_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(into_upload_infos).collect()
        })
        .await
    }

    async fn insert_upload_infos(&self, infos: &UploadInfos) -> Result<i64, StorageError> {
        let infos = infos.clone();
        let row_id = self
            .run(move |conn| {
                conn.execute(
                    r"
                    INSERT OR REPLACE INTO upload_infos (id, image_base_link, image_name, upload_time_ms)
                    VALUES (?1, ?2, ?3, ?4)
                    ",
                    params![
                        infos.id,
                        infos.image_base_link,
                        infos.image_name,
                        to_sql_time(infos.upload_time_ms)
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(row_id, "stored upload infos");
        Ok(row_id)
    }

    async fn delete_upload_infos(&self, infos: &UploadInfos) -> Result<usize, StorageError> {
        let infos = infos.clone();
        self.run(move |conn| {
            let removed = match infos.id {
                Some(id) => conn.execute("DELETE FROM upload_infos WHERE id = ?1", params![id])?,
                None => conn.execute(
                    "DELETE FROM upload_infos WHERE image_base_link = ?1",
                    params![infos.image_base_link],
                )?,
            };
            Ok(removed)
        })
        .await
    }

    async fn delete_all_upload_infos(&self) -> Result<usize, StorageError> {
        self.run(|conn| Ok(conn.execute("DELETE FROM upload_infos", [])?))
            .await
    }

    async fn find_by_row_id(&self, row_id: i64) -> Result<Option<UploadInfos>, StorageError> {
        self.run(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE rowid = ?1"),
                params![row_id],
                upload_infos_from_row,
            )
            .optional()?
            .map(into_upload_infos)
            .transpose()
        })
        .await
    }

    async fn find_by_base_link(&self, base_link: &str) -> Result<Option<UploadInfos>, StorageError> {
        let base_link = base_link.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE image_base_link = ?1"),
                params![base_link],
                upload_infos_from_row,
            )
            .optional()?
            .map(into_upload_infos)
            .transpose()
        })
        .await
    }
}
