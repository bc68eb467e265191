//! Single-flight front end for the expansion engine.
//!
//! At most one load or expansion runs at a time; requests arriving meanwhile
//! are rejected rather than queued. Each operation gets a fresh cancellation
//! token and a watchdog timeout, and the committed view is published on a
//! `watch` channel together with a user-facing status.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time;
use tracing::{debug, info, warn};
use versegraph_model::{CancellationToken, GraphError, GraphView, RemoteGraphStore, Result, VerseRef};

use crate::engine::{ExpansionSummary, GraphExpansionEngine};

/// Configuration for the fetch orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Watchdog timeout applied to every operation
    pub timeout: Duration,
    /// Translation used when a referenced verse has to be created
    pub default_translation: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            default_translation: "KJV".to_string(),
        }
    }
}

impl From<&versegraph_config::OrchestratorConfig> for OrchestratorConfig {
    fn from(config: &versegraph_config::OrchestratorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            default_translation: config.default_translation.clone(),
        }
    }
}

/// User-facing state of the most recent operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Loading,
    Ready,
    /// The load finished but none of its seeds exist.
    Empty,
    /// The watchdog fired. Retrying is allowed immediately.
    TimedOut,
    Failed(String),
}

impl FetchStatus {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchStatus::TimedOut | FetchStatus::Failed(_))
    }
}

impl Default for FetchStatus {
    fn default() -> Self {
        FetchStatus::Idle
    }
}

/// What subscribers see: the committed view and the status that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub status: FetchStatus,
    pub view: GraphView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed(ExpansionSummary),
    /// Another operation was in flight; nothing was done.
    Rejected,
    /// Cancelled by the caller; nothing was committed.
    Aborted,
}

enum Request {
    Seeds(Vec<String>),
    Expand(String),
    Reference {
        reference: VerseRef,
        translation: String,
    },
}

impl Request {
    fn label(&self) -> &'static str {
        match self {
            Request::Seeds(_) => "load_seeds",
            Request::Expand(_) => "expand_node",
            Request::Reference { .. } => "load_reference",
        }
    }
}

enum Phase {
    Idle,
    Loading(CancellationToken),
}

/// Returns the orchestrator to `Idle` on every exit path. A dropped operation
/// never published a terminal status, so `Loading` is settled here too.
struct FlightGuard<'a> {
    phase: &'a Mutex<Phase>,
    state: &'a watch::Sender<ViewState>,
    token: CancellationToken,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Idle;
        self.state.send_if_modified(|state| {
            if state.status != FetchStatus::Loading {
                return false;
            }
            debug!("Operation dropped while loading");
            state.status = settled_status(&state.view);
            true
        });
    }
}

/// Status to show once nothing is loading and no new result arrived.
fn settled_status(view: &GraphView) -> FetchStatus {
    if view.is_empty() {
        FetchStatus::Idle
    } else {
        FetchStatus::Ready
    }
}

pub struct FetchOrchestrator {
    engine: AsyncMutex<GraphExpansionEngine>,
    phase: Mutex<Phase>,
    state: watch::Sender<ViewState>,
    config: OrchestratorConfig,
}

impl FetchOrchestrator {
    pub fn new(remote: Arc<dyn RemoteGraphStore>, config: OrchestratorConfig) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            engine: AsyncMutex::new(GraphExpansionEngine::new(remote)),
            phase: Mutex::new(Phase::Idle),
            state,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.lock_phase(), Phase::Loading(_))
    }

    /// Signal the in-flight operation, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match &*self.lock_phase() {
            Phase::Loading(token) => {
                token.cancel();
                true
            }
            Phase::Idle => false,
        }
    }

    pub async fn load_seeds(&self, seeds: Vec<String>) -> Result<FetchOutcome> {
        self.run(Request::Seeds(seeds)).await
    }

    pub async fn expand_node(&self, node_id: &str) -> Result<FetchOutcome> {
        self.run(Request::Expand(node_id.to_string())).await
    }

    /// Resolve `reference` (creating the verse if needed) and load it as the
    /// only seed.
    pub async fn load_reference(
        &self,
        reference: &VerseRef,
        translation: Option<&str>,
    ) -> Result<FetchOutcome> {
        let translation = translation
            .unwrap_or(&self.config.default_translation)
            .to_string();
        self.run(Request::Reference {
            reference: reference.clone(),
            translation,
        })
        .await
    }

    /// Cancel any in-flight operation and discard the view.
    pub async fn reset(&self) {
        self.cancel();
        let mut engine = self.engine.lock().await;
        engine.reset();
        self.state.send_replace(ViewState::default());
        debug!("Graph view reset");
    }

    async fn run(&self, request: Request) -> Result<FetchOutcome> {
        let operation = request.label();
        let Some(flight) = self.begin() else {
            debug!(operation, "Fetch already in flight; rejecting");
            return Ok(FetchOutcome::Rejected);
        };
        let token = flight.token.clone();
        self.publish_status(FetchStatus::Loading);

        let work = async {
            let mut engine = self.engine.lock().await;
            let summary = Self::execute(&mut engine, &request, &token).await?;
            Ok::<_, GraphError>((summary, engine.view()))
        };
        let outcome = time::timeout(self.config.timeout, token.run_until_cancelled(work)).await;

        match outcome {
            Err(_) => {
                token.cancel();
                warn!(
                    operation,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Fetch timed out"
                );
                self.publish_status(FetchStatus::TimedOut);
                Err(GraphError::Timeout(self.config.timeout))
            }
            Ok(Err(err)) if err.is_aborted() => {
                debug!(operation, "Fetch aborted");
                let status = settled_status(&self.state.borrow().view);
                self.publish_status(status);
                Ok(FetchOutcome::Aborted)
            }
            Ok(Err(err)) => {
                warn!(operation, error = %err, "Fetch failed");
                self.publish_status(FetchStatus::Failed(err.to_string()));
                Err(err)
            }
            Ok(Ok((summary, view))) => {
                let status = match &request {
                    Request::Expand(_) => FetchStatus::Ready,
                    _ if summary.seeds_resolved == 0 => FetchStatus::Empty,
                    _ => FetchStatus::Ready,
                };
                info!(
                    operation,
                    nodes_added = summary.nodes_added,
                    edges_added = summary.edges_added,
                    skipped = summary.skipped,
                    "Fetch completed"
                );
                self.state.send_replace(ViewState { status, view });
                Ok(FetchOutcome::Completed(summary))
            }
        }
    }

    async fn execute(
        engine: &mut GraphExpansionEngine,
        request: &Request,
        token: &CancellationToken,
    ) -> Result<ExpansionSummary> {
        match request {
            Request::Seeds(seeds) => engine.load_seeds(seeds, token).await,
            Request::Expand(node_id) => engine.expand_node(node_id, token).await,
            Request::Reference {
                reference,
                translation,
            } => {
                let verse = engine.resolve_verse(reference, translation, token).await?;
                engine.load_seeds(&[verse.id], token).await
            }
        }
    }

    fn begin(&self) -> Option<FlightGuard<'_>> {
        let mut phase = self.lock_phase();
        if matches!(*phase, Phase::Loading(_)) {
            return None;
        }
        let token = CancellationToken::new();
        *phase = Phase::Loading(token.clone());
        Some(FlightGuard {
            phase: &self.phase,
            state: &self.state,
            token,
        })
    }


    fn publish_status(&self, status: FetchStatus) {
        self.state.send_modify(|state| state.status = status);
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("config", &self.config)
            .field("loading", &self.is_loading())
            .field("status", &self.state.borrow().status)
            .finish_non_exhaustive()
    }
}
