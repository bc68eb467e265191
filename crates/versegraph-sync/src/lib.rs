//! Keeps the local cache and the remote graph store convergent.
//!
//! - [`reconciler`] merges local and remote copies of versioned entities by
//!   modification time.
//! - [`dedup`] collapses edges that describe the same connection.
//! - [`service`] pushes local-only mutations on a schedule with bounded
//!   batches and failure backoff.
//! - [`mutations`] records note and edge edits locally so they survive
//!   offline periods.

pub mod dedup;
pub mod mutations;
pub mod reconciler;
pub mod service;

pub use dedup::{dedup_edges, DedupOutcome, EdgeDeduplicator};
pub use mutations::OfflineWriter;
pub use reconciler::{derive_note_edges, merge, merge_with_stats, retain_materialized, MergeStats};
pub use service::{
    BackgroundSyncService, ClassReport, EntityClass, SyncHealth, SyncReport, SyncServiceConfig,
    SyncStatus,
};
