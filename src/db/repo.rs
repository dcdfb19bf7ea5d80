use super::model::{CursorRow, SchemaVersionRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // Single writer; one connection also keeps `sqlite::memory:` a single database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&normalized)
        .await
        .with_context(|| format!("failed to open state database {}", normalized))?;
    if !normalized.starts_with("sqlite::memory") {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
    }
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn load_cursor(pool: &Pool, book_id: &str) -> Result<Option<CursorRow>> {
    let row = sqlx::query_as::<_, CursorRow>(
        "SELECT book_id, highlight_cursor, annotation_cursor, last_sync_time FROM sync_cursors WHERE book_id = ?",
    )
    .bind(book_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[instrument(skip(pool))]
pub async fn save_cursor(
    pool: &Pool,
    book_id: &str,
    highlight_cursor: &str,
    annotation_cursor: &str,
    last_sync_millis: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_cursors (book_id, highlight_cursor, annotation_cursor, last_sync_time) VALUES (?, ?, ?, ?) \
         ON CONFLICT(book_id) DO UPDATE SET highlight_cursor = excluded.highlight_cursor, \
         annotation_cursor = excluded.annotation_cursor, last_sync_time = excluded.last_sync_time",
    )
    .bind(book_id)
    .bind(highlight_cursor)
    .bind(annotation_cursor)
    .bind(last_sync_millis)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete every stored cursor. The schema version row lives in its own table
/// and is left alone.
#[instrument(skip_all)]
pub async fn delete_all_cursors(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM sync_cursors")
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn count_cursors(pool: &Pool) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_cursors")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

#[instrument(skip_all)]
pub async fn load_schema_version(pool: &Pool) -> Result<Option<SchemaVersionRow>> {
    let row = sqlx::query_as::<_, SchemaVersionRow>(
        "SELECT version, updated_at FROM schema_version WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[instrument(skip(pool))]
pub async fn save_schema_version(pool: &Pool, version: i64, updated_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET version = excluded.version, updated_at = excluded.updated_at",
    )
    .bind(version)
    .bind(updated_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
