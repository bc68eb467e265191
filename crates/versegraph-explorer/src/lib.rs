//! Interactive exploration of the verse graph.
//!
//! [`GraphExpansionEngine`] grows a view one hop at a time from seed verses,
//! fetching only nodes it has not visited. [`FetchOrchestrator`] wraps the
//! engine for UI callers: one operation at a time, a watchdog timeout, user
//! cancellation, and a watch channel carrying the committed view.

pub mod engine;
pub mod orchestrator;

pub use engine::{ExpansionSummary, GraphExpansionEngine};
pub use orchestrator::{FetchOrchestrator, FetchOutcome, FetchStatus, OrchestratorConfig, ViewState};
