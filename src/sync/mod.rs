//! The reconciliation engine: identity merge, stream fetching, section
//! rewriting, the schema gate and the per-book orchestration tying them up.
use std::time::Duration;

pub mod batch;
pub mod fetcher;
pub mod gate;
pub mod identity;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;

pub use fetcher::{fetch_changes, FetchOutcome};
pub use gate::{check_schema, GateDecision, CURRENT_SCHEMA_VERSION};
pub use orchestrator::{run, sync_book, EntityOutcome, EntityReport, RunSummary, SyncContext, SyncRequest};
pub use reconcile::{replace_section, EmptyPolicy, SectionOutcome};
pub use retry::RetryPolicy;

/// Fixed pauses between sequential remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacing {
    pub between_entities: Duration,
    pub between_appends: Duration,
    pub between_deletes: Duration,
}

impl Pacing {
    /// No pauses at all.
    pub fn none() -> Self {
        Self::default()
    }
}
