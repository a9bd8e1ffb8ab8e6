//! Snapshot store API
//!
//! - `SnapshotStore`: revision/version recording and history queries
//! - `RevisionBuilder`: one tracked write, committed atomically
//! - `get_unique`: lazy de-duplication of consecutive identical payloads

pub mod snapshot_store;

pub use snapshot_store::{get_unique, RevisionBuilder, SnapshotStore, UniqueVersions};
