use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::repo::{self, Pool};
use crate::model::{epoch, SchemaVersion, SyncCursor};

/// Cursor persistence as seen by the sync engine.
///
/// Reads never fail: a missing, unreadable or future-dated row yields the
/// initial cursor. Writes are best-effort: an I/O failure is logged and the
/// caller carries on.
#[derive(Debug, Clone)]
pub struct CursorStore {
    pool: Pool,
}

impl CursorStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn get(&self, book_id: &str) -> SyncCursor {
        self.get_at(book_id, Utc::now()).await
    }

    /// Same as [`CursorStore::get`] with an explicit notion of "now".
    #[instrument(skip(self, now))]
    pub async fn get_at(&self, book_id: &str, now: DateTime<Utc>) -> SyncCursor {
        let row = match repo::load_cursor(&self.pool, book_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(book_id, "no stored cursor");
                return SyncCursor::initial(book_id);
            }
            Err(err) => {
                warn!(?err, book_id, "unreadable cursor; starting from scratch");
                return SyncCursor::initial(book_id);
            }
        };

        let Some(last_sync_time) = Utc.timestamp_millis_opt(row.last_sync_time).single() else {
            warn!(book_id, raw = row.last_sync_time, "cursor timestamp out of range; resetting");
            return SyncCursor::initial(book_id);
        };

        if last_sync_time > now {
            warn!(
                book_id,
                last_sync_time = %last_sync_time,
                "cursor is dated in the future; resetting to full fetch"
            );
            return SyncCursor::initial(book_id);
        }

        SyncCursor {
            book_id: row.book_id,
            highlight_cursor: row.highlight_cursor,
            annotation_cursor: row.annotation_cursor,
            last_sync_time,
        }
    }

    #[instrument(skip_all, fields(book_id = %cursor.book_id))]
    pub async fn put(&self, cursor: &SyncCursor) {
        match repo::save_cursor(
            &self.pool,
            &cursor.book_id,
            &cursor.highlight_cursor,
            &cursor.annotation_cursor,
            cursor.last_sync_time.timestamp_millis(),
        )
        .await
        {
            Ok(()) => info!(
                highlight_cursor = %cursor.highlight_cursor,
                annotation_cursor = %cursor.annotation_cursor,
                "saved sync cursor"
            ),
            Err(err) => error!(?err, "failed to save sync cursor"),
        }
    }

    /// Remove every cursor, keeping the schema version record.
    pub async fn wipe_all(&self) {
        match repo::delete_all_cursors(&self.pool).await {
            Ok(removed) => info!(removed, "cleared all sync cursors"),
            Err(err) => error!(?err, "failed to clear sync cursors"),
        }
    }

    /// Persisted schema version, or version 0 when absent or unreadable.
    pub async fn schema_version(&self) -> SchemaVersion {
        match repo::load_schema_version(&self.pool).await {
            Ok(Some(row)) => SchemaVersion {
                version: row.version,
                updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| epoch()),
            },
            Ok(None) => SchemaVersion {
                version: 0,
                updated_at: epoch(),
            },
            Err(err) => {
                warn!(?err, "failed to read schema version; assuming 0");
                SchemaVersion {
                    version: 0,
                    updated_at: epoch(),
                }
            }
        }
    }

    pub async fn set_schema_version(&self, version: i64) {
        match repo::save_schema_version(&self.pool, version, Utc::now()).await {
            Ok(()) => info!(version, "saved schema version"),
            Err(err) => error!(?err, version, "failed to save schema version"),
        }
    }
}
