//! Sync state persistence: stream cursors and the sink schema version.
//!
//! This module is split into three submodules:
//! - `model`: row types returned by queries.
//! - `repo`: SQL-only functions over the pool; these return errors.
//! - `cursor_store`: the infallible cursor API used by the sync engine, which
//!   repairs corrupt rows and logs write failures instead of raising them.

pub mod cursor_store;
pub mod model;
pub mod repo;

pub use cursor_store::CursorStore;
pub use repo::*;
