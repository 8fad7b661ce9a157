//! Persistent crawl state.
//!
//! SQLite-backed storage for media records, seen posts, wall names and a log
//! of sync runs. It backs:
//! - the duplicate-page guard (post existence)
//! - database-level and content-hash-level media deduplication
//! - the `status` command

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use error::StateError;
pub use types::{MediaClaim, MediaRecord, PostRecord, SyncRunStats, SyncSummary};
