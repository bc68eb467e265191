//! Offline-first exploration of a verse knowledge graph.
//!
//! The workspace crates split the system by concern:
//!
//! - [`model`]: entities, the remote store and local cache boundaries,
//!   cancellation tokens and the error type.
//! - [`sync`]: last-writer-wins reconciliation, edge deduplication, the
//!   offline writer and the background sync service.
//! - [`explorer`]: the expansion engine and the single-flight fetch
//!   orchestrator.
//! - [`config`]: TOML configuration.
//!
//! [`GraphSession`] wires one orchestrator and one sync service together for
//! an active graph view, and [`telemetry::init`] installs logging.

pub mod session;
pub mod telemetry;

pub use session::GraphSession;
pub use versegraph_config as config;
pub use versegraph_explorer as explorer;
pub use versegraph_model as model;
pub use versegraph_sync as sync;

pub use versegraph_config::VerseGraphConfig;
pub use versegraph_explorer::{FetchOrchestrator, FetchOutcome, FetchStatus, ViewState};
pub use versegraph_model::{GraphError, GraphView, Result};
pub use versegraph_sync::{BackgroundSyncService, SyncReport, SyncStatus};
