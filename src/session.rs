//! One graph view with its fetch orchestrator and background sync.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use versegraph_config::VerseGraphConfig;
use versegraph_explorer::{FetchOrchestrator, FetchOutcome, OrchestratorConfig, ViewState};
use versegraph_model::{FileKvStore, LocalCache, RemoteGraphStore, Result, VerseRef};
use versegraph_sync::{BackgroundSyncService, OfflineWriter, SyncReport, SyncServiceConfig};

/// Owns the orchestrator and sync service for an active graph view.
///
/// Every successful load triggers a background sync pass. The periodic sync
/// loop is opt-in through [`GraphSession::start_background_sync`]; both are
/// stopped when the session is dropped.
pub struct GraphSession {
    orchestrator: FetchOrchestrator,
    sync: Arc<BackgroundSyncService>,
    writer: OfflineWriter,
    sync_enabled: bool,
    sync_loop: Mutex<Option<JoinHandle<()>>>,
    post_load_pass: Mutex<Option<JoinHandle<SyncReport>>>,
}

impl GraphSession {
    pub fn new(remote: Arc<dyn RemoteGraphStore>, cache: LocalCache, config: &VerseGraphConfig) -> Self {
        let orchestrator =
            FetchOrchestrator::new(remote.clone(), OrchestratorConfig::from(&config.orchestrator));
        let sync = Arc::new(BackgroundSyncService::new(
            remote,
            cache.clone(),
            SyncServiceConfig::from(&config.sync),
        ));
        Self {
            orchestrator,
            sync,
            writer: OfflineWriter::new(cache),
            sync_enabled: config.sync.enabled,
            sync_loop: Mutex::new(None),
            post_load_pass: Mutex::new(None),
        }
    }

    /// Build the local cache from `config.cache`: file-backed when a directory
    /// is set, in memory otherwise.
    pub fn from_config(remote: Arc<dyn RemoteGraphStore>, config: &VerseGraphConfig) -> Self {
        let cache = match &config.cache.dir {
            Some(dir) => {
                debug!(dir = %dir.display(), "Using file-backed cache");
                LocalCache::new(Arc::new(FileKvStore::new(dir)))
            }
            None => LocalCache::in_memory(),
        };
        Self::new(remote, cache, config)
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub fn sync_service(&self) -> &Arc<BackgroundSyncService> {
        &self.sync
    }

    pub fn writer(&self) -> &OfflineWriter {
        &self.writer
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.orchestrator.subscribe()
    }

    pub async fn load_seeds(&self, seeds: Vec<String>) -> Result<FetchOutcome> {
        let outcome = self.orchestrator.load_seeds(seeds).await?;
        self.after_load(&outcome);
        Ok(outcome)
    }

    /// Load a reference such as `"John 3:16"`, creating the verse if needed.
    pub async fn load_reference(&self, reference: &str) -> Result<FetchOutcome> {
        let reference: VerseRef = reference.parse()?;
        let outcome = self.orchestrator.load_reference(&reference, None).await?;
        self.after_load(&outcome);
        Ok(outcome)
    }

    pub async fn expand_node(&self, node_id: &str) -> Result<FetchOutcome> {
        self.orchestrator.expand_node(node_id).await
    }

    pub fn cancel(&self) -> bool {
        self.orchestrator.cancel()
    }

    pub async fn reset(&self) {
        self.orchestrator.reset().await;
    }

    pub async fn sync_now(&self) -> SyncReport {
        self.sync.sync_now().await
    }

    /// Wait for the pass triggered by the most recent load, if one is pending.
    pub async fn wait_for_sync(&self) -> Option<SyncReport> {
        let handle = self
            .post_load_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "Post-load sync task did not finish");
                None
            }
        }
    }

    /// Spawn the periodic sync loop. Must be called inside a Tokio runtime.
    /// Returns `false` if sync is disabled or the loop is already running.
    pub fn start_background_sync(&self) -> bool {
        if !self.sync_enabled {
            debug!("Background sync disabled by configuration");
            return false;
        }
        let mut slot = self.sync_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *slot = Some(self.sync.clone().spawn());
        true
    }

    /// Stop background work and cancel any in-flight fetch.
    pub fn shutdown(&self) {
        self.orchestrator.cancel();
        if let Some(handle) = self
            .sync_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("Background sync stopped");
        }
    }

    fn after_load(&self, outcome: &FetchOutcome) {
        if !self.sync_enabled || !matches!(outcome, FetchOutcome::Completed(_)) {
            return;
        }
        let sync = self.sync.clone();
        let handle = tokio::spawn(async move { sync.sync_now().await });
        let previous = self
            .post_load_pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        // An unfinished earlier pass keeps running; only the newest is awaited.
        drop(previous);
    }
}

impl Drop for GraphSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSession")
            .field("orchestrator", &self.orchestrator)
            .field("sync", &self.sync)
            .field("sync_enabled", &self.sync_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use versegraph_model::{Edge, EdgeType, InMemoryGraphStore};
    use versegraph_sync::SyncStatus;

    fn store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store.seed_verse("John 3:16", "For God so loved the world").unwrap();
        store.seed_verse("Romans 8:28", "And we know that all things work together").unwrap();
        store.insert_edge(Edge::new("John-3-16", "Romans-8-28", EdgeType::CrossReference));
        store
    }

    #[tokio::test]
    async fn successful_load_triggers_a_sync_pass() {
        let store = store();
        let session = GraphSession::new(store.clone(), LocalCache::in_memory(), &VerseGraphConfig::default());
        let note = session
            .writer()
            .create_note("John-3-16", "written before loading", ["love"])
            .await
            .unwrap();

        let outcome = session.load_seeds(vec!["John-3-16".to_string()]).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Completed(_)));

        let report = session.wait_for_sync().await.expect("post-load pass");
        assert_eq!(report.status, SyncStatus::Completed);
        assert!(store.notes().iter().any(|remote| remote.id == note.id));
    }

    #[tokio::test]
    async fn disabled_sync_skips_post_load_pass() {
        let mut config = VerseGraphConfig::default();
        config.sync.enabled = false;
        let store = store();
        let session = GraphSession::new(store.clone(), LocalCache::in_memory(), &config);

        session.load_seeds(vec!["John-3-16".to_string()]).await.unwrap();
        assert!(session.wait_for_sync().await.is_none());
        assert!(!session.start_background_sync());
        assert_eq!(store.call_count("list_notes"), 0);
    }

    #[tokio::test]
    async fn invalid_references_are_rejected_before_fetching() {
        let store = store();
        let session = GraphSession::new(store.clone(), LocalCache::in_memory(), &VerseGraphConfig::default());
        let err = session.load_reference("John 0:16").await.unwrap_err();
        assert!(matches!(err, versegraph_model::GraphError::InvalidReference(_)));
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_runs_until_shutdown() {
        let store = store();
        let session = GraphSession::new(store.clone(), LocalCache::in_memory(), &VerseGraphConfig::default());

        assert!(session.start_background_sync());
        assert!(!session.start_background_sync());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.call_count("list_notes"), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(store.call_count("list_notes"), 2);

        session.shutdown();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.call_count("list_notes"), 2);
    }
}
