//! Durable crawl cursors and the processed-blob set
//!
//! Two cursors survive between invocations: the newest commit the incremental
//! pass has caught up to, and the next commit the backfill pass will visit.
//! Everything about "where the crawl is" is derived from those two values.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;

use crate::hashlist::database::SharedConnection;

/// Stored backfill value meaning the root of history has been reached
pub const BACKFILL_DONE_SENTINEL: &str = "__done__";

const LATEST_INCREMENTAL_KEY: &str = "latest_incremental_sha";
const NEXT_BACKFILL_KEY: &str = "next_backfill_sha";

/// Error types for checkpoint persistence
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Position of the backward crawl
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackfillCursor {
    #[default]
    Unset,
    At(String),
    Done,
}

impl BackfillCursor {
    pub fn from_stored(value: Option<String>) -> Self {
        match value {
            None => BackfillCursor::Unset,
            Some(value) if value.is_empty() => BackfillCursor::Unset,
            Some(value) if value == BACKFILL_DONE_SENTINEL => BackfillCursor::Done,
            Some(sha) => BackfillCursor::At(sha),
        }
    }

    pub fn as_stored(&self) -> Option<&str> {
        match self {
            BackfillCursor::Unset => None,
            BackfillCursor::At(sha) => Some(sha),
            BackfillCursor::Done => Some(BACKFILL_DONE_SENTINEL),
        }
    }
}

/// Both cursors as read at the start of a pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Checkpoint {
    pub latest_incremental_sha: Option<String>,
    pub next_backfill: BackfillCursor,
}

impl Checkpoint {
    pub fn state(&self) -> CursorState {
        match (&self.latest_incremental_sha, &self.next_backfill) {
            (_, BackfillCursor::Done) => CursorState::BackfillDone,
            (_, BackfillCursor::At(_)) => CursorState::BackfillActive,
            (Some(_), BackfillCursor::Unset) => CursorState::IncrementalCatchingUp,
            (None, BackfillCursor::Unset) => CursorState::Init,
        }
    }
}

/// Crawl state derived from the stored cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorState {
    /// Nothing stored yet
    Init,
    /// Incremental has run, backfill has not been anchored
    IncrementalCatchingUp,
    BackfillActive,
    BackfillDone,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CursorState::Init => "init",
            CursorState::IncrementalCatchingUp => "incremental_catching_up",
            CursorState::BackfillActive => "backfill_active",
            CursorState::BackfillDone => "backfill_done",
        };
        f.write_str(name)
    }
}

/// Durable cursor storage
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> CheckpointResult<Checkpoint>;

    async fn save_latest_incremental(&self, sha: &str) -> CheckpointResult<()>;

    async fn save_next_backfill(&self, cursor: &BackfillCursor) -> CheckpointResult<()>;

    /// Forget both cursors
    async fn clear(&self) -> CheckpointResult<()>;
}

/// Membership set of snapshot content hashes that never need processing again
#[async_trait]
pub trait ProcessedBlobSet: Send + Sync {
    async fn contains(&self, blob_id: &str) -> CheckpointResult<bool>;

    async fn insert(&self, blob_id: &str) -> CheckpointResult<()>;

    async fn count(&self) -> CheckpointResult<u64>;

    async fn clear(&self) -> CheckpointResult<()>;
}

/// SQLite-backed cursors and blob set
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: SharedConnection,
}

impl SqliteCheckpointStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self) -> CheckpointResult<Checkpoint> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT value FROM checkpoints WHERE key = ?1")?;

        let latest: Option<String> = stmt
            .query_row(params![LATEST_INCREMENTAL_KEY], |row| row.get(0))
            .optional()?;
        let backfill: Option<String> = stmt
            .query_row(params![NEXT_BACKFILL_KEY], |row| row.get(0))
            .optional()?;

        Ok(Checkpoint {
            latest_incremental_sha: latest.filter(|sha| !sha.is_empty()),
            next_backfill: BackfillCursor::from_stored(backfill),
        })
    }

    async fn save_latest_incremental(&self, sha: &str) -> CheckpointResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![LATEST_INCREMENTAL_KEY, sha, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn save_next_backfill(&self, cursor: &BackfillCursor) -> CheckpointResult<()> {
        let conn = self.conn.lock().await;
        match cursor.as_stored() {
            Some(value) => conn.execute(
                "INSERT OR REPLACE INTO checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![NEXT_BACKFILL_KEY, value, Utc::now().timestamp()],
            )?,
            None => conn.execute("DELETE FROM checkpoints WHERE key = ?1", params![NEXT_BACKFILL_KEY])?,
        };
        Ok(())
    }

    async fn clear(&self) -> CheckpointResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM checkpoints WHERE key IN (?1, ?2)",
            params![LATEST_INCREMENTAL_KEY, NEXT_BACKFILL_KEY],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl ProcessedBlobSet for SqliteCheckpointStore {
    async fn contains(&self, blob_id: &str) -> CheckpointResult<bool> {
        let conn = self.conn.lock().await;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_blobs WHERE blob_id = ?1",
                params![blob_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert(&self, blob_id: &str) -> CheckpointResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO processed_blobs (blob_id, processed_at) VALUES (?1, ?2)",
            params![blob_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn count(&self) -> CheckpointResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed_blobs", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    async fn clear(&self) -> CheckpointResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM processed_blobs", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlist::database::{open_database, open_in_memory};
    use tempfile::tempdir;

    #[test]
    fn test_state_is_derived_from_cursors() {
        let mut checkpoint = Checkpoint::default();
        assert_eq!(checkpoint.state(), CursorState::Init);

        checkpoint.latest_incremental_sha = Some("head".to_string());
        assert_eq!(checkpoint.state(), CursorState::IncrementalCatchingUp);

        checkpoint.next_backfill = BackfillCursor::At("parent".to_string());
        assert_eq!(checkpoint.state(), CursorState::BackfillActive);

        checkpoint.next_backfill = BackfillCursor::Done;
        assert_eq!(checkpoint.state(), CursorState::BackfillDone);
    }

    #[test]
    fn test_backfill_cursor_storage_form() {
        assert_eq!(BackfillCursor::from_stored(None), BackfillCursor::Unset);
        assert_eq!(BackfillCursor::from_stored(Some(String::new())), BackfillCursor::Unset);
        assert_eq!(
            BackfillCursor::from_stored(Some(BACKFILL_DONE_SENTINEL.to_string())),
            BackfillCursor::Done
        );
        assert_eq!(BackfillCursor::Done.as_stored(), Some(BACKFILL_DONE_SENTINEL));
        assert_eq!(BackfillCursor::At("abc".to_string()).as_stored(), Some("abc"));
    }

    #[tokio::test]
    async fn test_cursors_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hashlist.sqlite");

        {
            let store = SqliteCheckpointStore::new(open_database(&path).unwrap());
            store.save_latest_incremental("head").await.unwrap();
            store.save_next_backfill(&BackfillCursor::At("older".to_string())).await.unwrap();
        }

        let store = SqliteCheckpointStore::new(open_database(&path).unwrap());
        let checkpoint = store.load().await.unwrap();
        assert_eq!(checkpoint.latest_incremental_sha.as_deref(), Some("head"));
        assert_eq!(checkpoint.next_backfill, BackfillCursor::At("older".to_string()));
    }

    #[tokio::test]
    async fn test_clear_forgets_cursors_only() {
        let store = SqliteCheckpointStore::new(open_in_memory().unwrap());
        store.save_latest_incremental("head").await.unwrap();
        store.save_next_backfill(&BackfillCursor::Done).await.unwrap();
        ProcessedBlobSet::insert(&store, "blob").await.unwrap();

        CheckpointStore::clear(&store).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Checkpoint::default());
        assert!(store.contains("blob").await.unwrap());
    }

    #[tokio::test]
    async fn test_unset_backfill_removes_row() {
        let store = SqliteCheckpointStore::new(open_in_memory().unwrap());
        store.save_next_backfill(&BackfillCursor::At("abc".to_string())).await.unwrap();
        store.save_next_backfill(&BackfillCursor::Unset).await.unwrap();

        assert_eq!(store.load().await.unwrap().next_backfill, BackfillCursor::Unset);
    }

    #[tokio::test]
    async fn test_processed_blob_set() {
        let store = SqliteCheckpointStore::new(open_in_memory().unwrap());
        assert!(!store.contains("blob-a").await.unwrap());

        ProcessedBlobSet::insert(&store, "blob-a").await.unwrap();
        ProcessedBlobSet::insert(&store, "blob-a").await.unwrap();
        ProcessedBlobSet::insert(&store, "blob-b").await.unwrap();

        assert!(store.contains("blob-a").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);

        ProcessedBlobSet::clear(&store).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
