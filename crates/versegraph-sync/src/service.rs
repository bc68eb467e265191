//! Background sync service pushing local-only mutations to the remote store
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use versegraph_model::cache::collections;
use versegraph_model::{Edge, EdgeKey, LocalCache, Note, RemoteGraphStore, Result, Timestamp, Versioned};

use crate::dedup::dedup_edges;
use crate::reconciler::{derive_note_edges, merge, merge_with_stats};

/// Configuration for the background sync service
#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    /// Period of the background loop
    pub interval: Duration,
    /// Maximum pushes per entity class per pass
    pub batch_ceiling: usize,
    /// Consecutive failed passes before backing off
    pub failure_ceiling: u32,
    /// How long passes are refused once the ceiling is reached
    pub backoff: Duration,
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            batch_ceiling: 10,
            failure_ceiling: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

impl From<&versegraph_config::SyncConfig> for SyncServiceConfig {
    fn from(config: &versegraph_config::SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            batch_ceiling: config.batch_ceiling.max(1),
            failure_ceiling: config.failure_ceiling.max(1),
            backoff: Duration::from_secs(config.backoff_secs),
        }
    }
}

/// The independently synchronised entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Notes,
    Edges,
}

impl EntityClass {
    pub fn collection(&self) -> &'static str {
        match self {
            EntityClass::Notes => collections::NOTES,
            EntityClass::Edges => collections::EDGES,
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Outcome of one entity class within a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub class: EntityClass,
    pub local: usize,
    pub remote: usize,
    pub pending: usize,
    pub pushed: usize,
    pub failed: usize,
    /// Pending entities left for a later pass by the batch ceiling.
    pub deferred: usize,
    /// The remote fetch failed and the pass continued with an empty remote view.
    pub remote_degraded: bool,
    pub cache_error: Option<String>,
    /// Modification time of the oldest pending entity not pushed this pass.
    pub oldest_unpushed: Option<Timestamp>,
}

impl ClassReport {
    fn new(class: EntityClass) -> Self {
        Self {
            class,
            local: 0,
            remote: 0,
            pending: 0,
            pushed: 0,
            failed: 0,
            deferred: 0,
            remote_degraded: false,
            cache_error: None,
            oldest_unpushed: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.remote_degraded || self.cache_error.is_some()
    }

    fn fatal_reason(&self) -> Option<String> {
        if let Some(err) = &self.cache_error {
            return Some(format!("{}: local cache error: {}", self.class, err));
        }
        self.remote_degraded
            .then(|| format!("{}: remote store unavailable", self.class))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    Failed { reason: String },
    /// Another pass was already running.
    Skipped,
    /// The failure ceiling was reached; passes resume after `retry_after`.
    BackingOff { retry_after: Duration },
}

/// Result of [`BackgroundSyncService::sync_now`]. Sync never returns an error;
/// every outcome is described here.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub classes: Vec<ClassReport>,
    /// Watermark in effect after the pass.
    pub last_sync: Option<Timestamp>,
    pub consecutive_failures: u32,
}

impl SyncReport {
    fn refused(status: SyncStatus, consecutive_failures: u32) -> Self {
        Self {
            status,
            classes: Vec::new(),
            last_sync: None,
            consecutive_failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }

    pub fn class(&self, class: EntityClass) -> Option<&ClassReport> {
        self.classes.iter().find(|report| report.class == class)
    }

    pub fn pushed(&self) -> usize {
        self.classes.iter().map(|report| report.pushed).sum()
    }
}

/// Snapshot of the throttling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHealth {
    pub consecutive_failures: u32,
    pub backing_off: bool,
    pub running: bool,
}

#[derive(Debug, Default)]
struct Throttle {
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    running: bool,
}

struct RunningGuard<'a> {
    state: &'a Mutex<Throttle>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running = false;
    }
}

/// Per-class behaviour of a sync pass.
#[async_trait]
trait SyncEntity: Versioned + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const CLASS: EntityClass;

    async fn fetch_remote(remote: &dyn RemoteGraphStore) -> Result<Vec<Self>>;

    async fn push(remote: &dyn RemoteGraphStore, entity: &Self) -> Result<Self>;

    /// Add entities derived from other collections to the local view.
    async fn augment_local(cache: &LocalCache, local: Vec<Self>) -> Vec<Self>;

    /// Give local entities the remote id of the logical entity they describe.
    /// Returns how many ids changed.
    fn adopt_remote_ids(local: &mut [Self], remote: &[Self]) -> usize;

    /// Final clean-up applied to the collection before it is persisted.
    fn normalize(merged: Vec<Self>) -> Vec<Self>;
}

#[async_trait]
impl SyncEntity for Note {
    const CLASS: EntityClass = EntityClass::Notes;

    async fn fetch_remote(remote: &dyn RemoteGraphStore) -> Result<Vec<Self>> {
        remote.list_notes(None).await
    }

    async fn push(remote: &dyn RemoteGraphStore, entity: &Self) -> Result<Self> {
        remote.push_note(entity).await
    }

    async fn augment_local(_cache: &LocalCache, local: Vec<Self>) -> Vec<Self> {
        local
    }

    fn adopt_remote_ids(_local: &mut [Self], _remote: &[Self]) -> usize {
        0
    }

    fn normalize(merged: Vec<Self>) -> Vec<Self> {
        merged
    }
}

#[async_trait]
impl SyncEntity for Edge {
    const CLASS: EntityClass = EntityClass::Edges;

    async fn fetch_remote(remote: &dyn RemoteGraphStore) -> Result<Vec<Self>> {
        remote.list_edges(None).await
    }

    async fn push(remote: &dyn RemoteGraphStore, entity: &Self) -> Result<Self> {
        remote.push_edge(entity).await
    }

    async fn augment_local(cache: &LocalCache, local: Vec<Self>) -> Vec<Self> {
        match cache.get_collection::<Note>(collections::NOTES).await {
            Ok(notes) => dedup_edges(local.into_iter().chain(derive_note_edges(&notes))),
            Err(err) => {
                warn!(error = %err, "Could not read notes for derived edges");
                dedup_edges(local)
            }
        }
    }

    /// Edges are the same fact when their canonical keys match, whatever id
    /// each side minted.
    fn adopt_remote_ids(local: &mut [Self], remote: &[Self]) -> usize {
        let remote_ids: HashMap<EdgeKey, &str> = remote
            .iter()
            .map(|edge| (edge.canonical_key(), edge.id.as_str()))
            .collect();
        let mut adopted = 0;
        for edge in local.iter_mut() {
            if let Some(&remote_id) = remote_ids.get(&edge.canonical_key()) {
                if edge.id != remote_id {
                    debug!(local_id = %edge.id, remote_id, "Adopting remote id for duplicate edge");
                    edge.id = remote_id.to_string();
                    adopted += 1;
                }
            }
        }
        adopted
    }

    fn normalize(merged: Vec<Self>) -> Vec<Self> {
        dedup_edges(merged)
    }
}

/// Background sync service
pub struct BackgroundSyncService {
    remote: Arc<dyn RemoteGraphStore>,
    cache: LocalCache,
    config: SyncServiceConfig,
    state: Mutex<Throttle>,
}

impl BackgroundSyncService {
    pub fn new(remote: Arc<dyn RemoteGraphStore>, cache: LocalCache, config: SyncServiceConfig) -> Self {
        Self {
            remote,
            cache,
            config,
            state: Mutex::new(Throttle::default()),
        }
    }

    pub fn config(&self) -> &SyncServiceConfig {
        &self.config
    }

    pub fn health(&self) -> SyncHealth {
        let state = self.throttle();
        SyncHealth {
            consecutive_failures: state.consecutive_failures,
            backing_off: state
                .backoff_until
                .is_some_and(|until| Instant::now() < until),
            running: state.running,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.throttle().consecutive_failures
    }

    /// Clear the failure counter and any active backoff.
    pub fn reset(&self) {
        let mut state = self.throttle();
        state.consecutive_failures = 0;
        state.backoff_until = None;
        debug!("Sync throttle reset");
    }

    /// Start the periodic loop. Runs until the task is dropped or aborted.
    pub async fn start(self: Arc<Self>) {
        info!(
            "Starting background sync with interval {} seconds",
            self.config.interval.as_secs()
        );

        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let report = self.sync_now().await;
            match &report.status {
                SyncStatus::Failed { reason } => error!("Sync pass failed: {}", reason),
                SyncStatus::BackingOff { retry_after } => {
                    debug!("Sync backing off for another {:?}", retry_after)
                }
                SyncStatus::Skipped => debug!("Sync pass already in progress"),
                SyncStatus::Completed => {}
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.start())
    }

    /// Run one pass over every entity class.
    pub async fn sync_now(&self) -> SyncReport {
        let started = Timestamp::now();
        if let Some(refused) = self.try_begin() {
            return refused;
        }
        let _running = RunningGuard { state: &self.state };

        let last_sync = match self.cache.last_sync_timestamp().await {
            Ok(last_sync) => last_sync,
            Err(err) => {
                error!(error = %err, "Failed to read last sync timestamp");
                return self.finish(
                    SyncStatus::Failed {
                        reason: format!("local cache error: {err}"),
                    },
                    Vec::new(),
                    None,
                );
            }
        };
        debug!(last_sync = ?last_sync.map(|ts| ts.to_string()), "Starting sync pass");

        let (notes, edges) = tokio::join!(
            self.sync_class::<Note>(last_sync),
            self.sync_class::<Edge>(last_sync)
        );
        let classes = vec![notes, edges];

        if let Some(reason) = classes.iter().find_map(ClassReport::fatal_reason) {
            warn!(reason = %reason, "Sync pass failed; last sync timestamp unchanged");
            return self.finish(SyncStatus::Failed { reason }, classes, last_sync);
        }

        // Unpushed entities must stay newer than the watermark.
        let watermark = classes
            .iter()
            .filter_map(|report| report.oldest_unpushed)
            .map(|ts| ts.just_before())
            .fold(started, Timestamp::min);
        let watermark = last_sync.map_or(watermark, |previous| watermark.max(previous));

        if let Err(err) = self.cache.set_last_sync_timestamp(watermark).await {
            error!(error = %err, "Failed to store last sync timestamp");
            return self.finish(
                SyncStatus::Failed {
                    reason: format!("local cache error: {err}"),
                },
                classes,
                last_sync,
            );
        }

        info!(
            pushed = classes.iter().map(|c| c.pushed).sum::<usize>(),
            failed = classes.iter().map(|c| c.failed).sum::<usize>(),
            deferred = classes.iter().map(|c| c.deferred).sum::<usize>(),
            watermark = %watermark,
            "Sync pass completed"
        );
        self.finish(SyncStatus::Completed, classes, Some(watermark))
    }

    async fn sync_class<E: SyncEntity>(&self, last_sync: Option<Timestamp>) -> ClassReport {
        let class = E::CLASS;
        let mut report = ClassReport::new(class);

        let local: Vec<E> = match self.cache.get_collection(class.collection()).await {
            Ok(local) => local,
            Err(err) => {
                error!(class = %class, error = %err, "Failed to read local collection");
                report.cache_error = Some(err.to_string());
                return report;
            }
        };
        let mut local = E::augment_local(&self.cache, local).await;
        report.local = local.len();

        let remote: Vec<E> = match E::fetch_remote(self.remote.as_ref()).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(class = %class, error = %err, "Remote fetch failed; treating remote as empty");
                report.remote_degraded = true;
                Vec::new()
            }
        };
        report.remote = remote.len();
        E::adopt_remote_ids(&mut local, &remote);

        let mut pending: Vec<&E> = {
            let remote_versions: HashMap<&str, Timestamp> = remote
                .iter()
                .map(|entity| (entity.identity(), entity.updated_at()))
                .collect();
            local
                .iter()
                .filter(|entity| {
                    let changed = last_sync.map_or(true, |ts| entity.updated_at() > ts);
                    let ahead_of_remote = remote_versions
                        .get(entity.identity())
                        .map_or(true, |remote_at| entity.updated_at() > *remote_at);
                    changed && ahead_of_remote
                })
                .collect()
        };
        pending.sort_by_key(|entity| entity.updated_at());
        report.pending = pending.len();

        let (batch, deferred) = pending.split_at(pending.len().min(self.config.batch_ceiling));
        report.deferred = deferred.len();
        let mut oldest_unpushed = deferred.first().map(|entity| entity.updated_at());

        let mut pushed: Vec<E> = Vec::with_capacity(batch.len());
        for entity in batch {
            match E::push(self.remote.as_ref(), entity).await {
                Ok(stored) => pushed.push(stored),
                Err(err) => {
                    warn!(
                        class = %class,
                        id = entity.identity(),
                        error = %err,
                        "Push failed; entity stays pending"
                    );
                    report.failed += 1;
                    let at = entity.updated_at();
                    oldest_unpushed = Some(oldest_unpushed.map_or(at, |ts| ts.min(at)));
                }
            }
        }
        report.pushed = pushed.len();
        report.oldest_unpushed = oldest_unpushed;

        let upstream = merge(remote, pushed);
        let persisted = self
            .cache
            .update_collection(class.collection(), move |current: &mut Vec<E>| {
                E::adopt_remote_ids(current, &upstream);
                let (merged, stats) = merge_with_stats(std::mem::take(current), upstream);
                *current = E::normalize(merged);
                Ok(stats)
            })
            .await;

        match persisted {
            Ok(stats) => debug!(
                class = %class,
                pushed = report.pushed,
                replaced = stats.replaced,
                added = stats.added,
                kept_local = stats.kept_local,
                "Reconciled collection"
            ),
            Err(err) => {
                error!(class = %class, error = %err, "Failed to persist reconciled collection");
                report.cache_error = Some(err.to_string());
            }
        }
        report
    }

    fn try_begin(&self) -> Option<SyncReport> {
        let mut state = self.throttle();
        if state.running {
            debug!("Sync pass already running; skipping");
            return Some(SyncReport::refused(SyncStatus::Skipped, state.consecutive_failures));
        }
        if let Some(until) = state.backoff_until {
            let now = Instant::now();
            if now < until {
                return Some(SyncReport::refused(
                    SyncStatus::BackingOff {
                        retry_after: until - now,
                    },
                    state.consecutive_failures,
                ));
            }
            info!("Sync backoff elapsed; resetting failure counter");
            state.backoff_until = None;
            state.consecutive_failures = 0;
        }
        state.running = true;
        None
    }

    fn finish(
        &self,
        status: SyncStatus,
        classes: Vec<ClassReport>,
        last_sync: Option<Timestamp>,
    ) -> SyncReport {
        let consecutive_failures = {
            let mut state = self.throttle();
            if status == SyncStatus::Completed {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_ceiling {
                    warn!(
                        "Sync failed {} times in a row; pausing for {:?}",
                        state.consecutive_failures, self.config.backoff
                    );
                    state.backoff_until = Some(Instant::now() + self.config.backoff);
                }
            }
            state.consecutive_failures
        };

        SyncReport {
            status,
            classes,
            last_sync,
            consecutive_failures,
        }
    }

    fn throttle(&self) -> MutexGuard<'_, Throttle> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for BackgroundSyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundSyncService")
            .field("config", &self.config)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}
