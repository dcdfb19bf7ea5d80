use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::db::CursorStore;
use crate::notion::NotionService;

/// Schema version this build writes pages for.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub force_full_resync: bool,
    pub stored_version: i64,
    pub missing_fields: Vec<String>,
}

/// Checks the stored schema version and the database's fields. On a stale
/// version or a missing field, every cursor is wiped and the current version
/// is recorded, so the run that follows rewrites every page from scratch.
#[instrument(skip(store, sink, required_fields))]
pub async fn check_schema<N>(
    store: &CursorStore,
    sink: &N,
    database_id: &str,
    required_fields: &[String],
) -> Result<GateDecision>
where
    N: NotionService + ?Sized,
{
    let stored = store.schema_version().await;
    let present = sink
        .list_database_fields(database_id)
        .await
        .context("failed to list database fields")?;
    let missing_fields: Vec<String> = required_fields
        .iter()
        .filter(|f| !present.contains(f))
        .cloned()
        .collect();

    let stale = stored.version < CURRENT_SCHEMA_VERSION;
    if !stale && missing_fields.is_empty() {
        info!(version = stored.version, "schema up to date");
        return Ok(GateDecision {
            force_full_resync: false,
            stored_version: stored.version,
            missing_fields,
        });
    }

    if !missing_fields.is_empty() {
        warn!(missing = ?missing_fields, "database is missing required fields");
    }
    warn!(
        stored = stored.version,
        current = CURRENT_SCHEMA_VERSION,
        "schema changed; forcing a full resync"
    );
    store.wipe_all().await;
    store.set_schema_version(CURRENT_SCHEMA_VERSION).await;

    Ok(GateDecision {
        force_full_resync: true,
        stored_version: stored.version,
        missing_fields,
    })
}
