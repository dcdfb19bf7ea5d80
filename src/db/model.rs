//! Row types for the sync state tables.
//!
//! Keep these structs focused on the data returned by queries. Repair and
//! defaulting rules live in `cursor_store`.

use sqlx::FromRow;

/// Raw `sync_cursors` row; `last_sync_time` is unix millis.
#[derive(Debug, Clone, FromRow)]
pub struct CursorRow {
    pub book_id: String,
    pub highlight_cursor: String,
    pub annotation_cursor: String,
    pub last_sync_time: i64,
}

/// Raw `schema_version` row; `updated_at` is RFC 3339.
#[derive(Debug, Clone, FromRow)]
pub struct SchemaVersionRow {
    pub version: i64,
    pub updated_at: String,
}
