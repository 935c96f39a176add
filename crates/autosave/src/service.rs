//! The autosave service: one owned object per editor session.
//!
//! [`AutosaveService`] ties the debounced scheduler, the durable queue, the
//! flush worker, the status indicator, and the network monitor together. It is
//! constructed once at startup and cloned into every consumer; clones share the
//! same state.

use crate::backend::SaveBackend;
use crate::connectivity::{ConnectivityListener, ListenerHandle, NetworkMonitor};
use crate::error::{AutosaveError, AutosaveResult};
use crate::flush::{FlushOutcome, FlushWorker};
use crate::inflight::DocumentLocks;
use crate::scheduler::DebouncedScheduler;
use crate::sequence::SequenceTracker;
use crate::status::{SaveStatus, StatusIndicator, StatusInfo};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use store::{AutosaveConfig, KeyValueStorage, LocalQueueStore, QueueItem, StorageEvent, TabId};
use tokio::sync::broadcast;

/// Result of persisting one fired edit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Saved remotely
    Saved,
    /// Kept in the local queue until the network returns
    Queued,
    /// A newer snapshot of the same document was issued meanwhile; the
    /// response was ignored
    Stale,
    /// The backend refused the snapshot permanently
    Rejected,
    /// Autosave is disabled
    Skipped,
}

/// State shared by every clone of the service and its background tasks
pub(crate) struct Shared<B, S: KeyValueStorage> {
    pub(crate) config: AutosaveConfig,
    pub(crate) backend: B,
    pub(crate) queue: tokio::sync::Mutex<LocalQueueStore<S>>,
    pub(crate) status: StatusIndicator,
    pub(crate) network: NetworkMonitor,
    pub(crate) sequences: SequenceTracker,
    pub(crate) scheduler: DebouncedScheduler,
    pub(crate) flush_worker: FlushWorker,
    pub(crate) in_flight: DocumentLocks,
    /// Session issuing this service's sequence numbers
    pub(crate) origin: TabId,
    durability_degraded: AtomicBool,
    last_saved_at: Mutex<Option<DateTime<Utc>>>,
    rejected: Mutex<Vec<String>>,
}

impl<B: SaveBackend, S: KeyValueStorage> Shared<B, S> {
    fn note_persistence(&self, result: store::Result<()>) {
        match result {
            Ok(()) => {
                if self.durability_degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("Pending saves are stored locally again");
                }
            }
            Err(e) => {
                self.durability_degraded.store(true, Ordering::SeqCst);
                tracing::warn!("Pending saves not stored locally: {}", e);
            }
        }
    }

    pub(crate) async fn enqueue(&self, item: QueueItem) {
        let mut queue = self.queue.lock().await;
        let result = queue.enqueue(item, self.config.coalesce_queue);
        self.note_persistence(result);
    }

    pub(crate) async fn remove_queued(&self, item: &QueueItem) {
        let mut queue = self.queue.lock().await;
        let result = queue.remove(item).map(|_| ());
        self.note_persistence(result);
    }

    /// Whether a queued item was overtaken by a newer edit from this session.
    /// Items queued by other sessions carry numbers from another counter and
    /// are never considered superseded.
    pub(crate) fn is_superseded(&self, item: &QueueItem) -> bool {
        item.origin == Some(self.origin) && item.seq < self.sequences.latest(&item.id)
    }

    pub(crate) fn mark_saved(&self, id: &str) {
        *self.last_saved_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|rejected| rejected != id);
    }

    pub(crate) fn mark_rejected(&self, id: &str) {
        let mut rejected = self.rejected.lock().unwrap_or_else(|e| e.into_inner());
        if !rejected.iter().any(|r| r == id) {
            rejected.push(id.to_string());
        }
    }

    fn rejected(&self) -> Vec<String> {
        self.rejected.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Debounced, offline-tolerant autosave of documents
pub struct AutosaveService<B, S: KeyValueStorage> {
    shared: Arc<Shared<B, S>>,
}

impl<B, S: KeyValueStorage> Clone for AutosaveService<B, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B, S> AutosaveService<B, S>
where
    B: SaveBackend + 'static,
    S: KeyValueStorage + 'static,
{
    /// Create the service, restoring any pending saves from `storage`.
    ///
    /// The network is assumed available until told otherwise.
    pub fn new(config: AutosaveConfig, backend: B, storage: S) -> AutosaveResult<Self> {
        let mut queue = LocalQueueStore::open(storage, config.storage_key.clone())?;
        let origin = queue.storage().origin();
        let mut durability_degraded = false;
        if !queue.is_empty() {
            tracing::info!("{} pending saves restored", queue.len());
            if let Err(e) = queue.claim() {
                tracing::warn!("Pending saves not stored locally: {}", e);
                durability_degraded = true;
            }
        }
        let sequences = SequenceTracker::new();
        for item in queue.items() {
            sequences.observe(&item.id, item.seq);
        }

        let scheduler = DebouncedScheduler::new(config.debounce());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backend,
                queue: tokio::sync::Mutex::new(queue),
                status: StatusIndicator::new(),
                network: NetworkMonitor::new(true),
                sequences,
                scheduler,
                flush_worker: FlushWorker::new(),
                in_flight: DocumentLocks::new(),
                origin,
                durability_degraded: AtomicBool::new(durability_degraded),
                last_saved_at: Mutex::new(None),
                rejected: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Start the connectivity listener for this service
    pub fn start(&self) -> ListenerHandle {
        ConnectivityListener::spawn(self.clone())
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.shared.network
    }

    /// Record an edit of document `id`. The save fires after the debounce
    /// delay unless another edit of the same document arrives first.
    pub fn edit(&self, id: impl Into<String>, payload: serde_json::Value) {
        if !self.shared.config.enabled {
            tracing::trace!("Autosave disabled, ignoring edit");
            return;
        }
        let service = self.clone();
        self.shared
            .scheduler
            .schedule(id, payload, move |id, payload| async move {
                service.persist_now(&id, payload).await;
            });
    }

    /// Persist a snapshot immediately, bypassing the debounce.
    ///
    /// Offline, or when the attempt fails transiently, the snapshot is queued
    /// and the status becomes `Offline`. After a successful save, anything
    /// still queued is retried.
    pub async fn persist_now(&self, id: &str, payload: serde_json::Value) -> SaveOutcome {
        let shared = &self.shared;
        if !shared.config.enabled {
            return SaveOutcome::Skipped;
        }

        let seq = shared.sequences.issue(id);

        if !shared.network.is_online() {
            tracing::debug!("Offline, queueing save of {} (seq {})", id, seq);
            shared.enqueue(self.queue_item(id, payload, seq)).await;
            shared.status.set(SaveStatus::Offline);
            return SaveOutcome::Queued;
        }

        let queue_empty = {
            let _document = shared.in_flight.acquire(id).await;
            // A newer edit arrived while an earlier request held the document
            if !shared.sequences.is_latest(id, seq) {
                tracing::debug!("Skipping superseded save of {} (seq {})", id, seq);
                return SaveOutcome::Stale;
            }

            shared.status.set(SaveStatus::Saving);
            match shared.backend.save(id, &payload).await {
                Ok(()) => {
                    if !shared.sequences.is_latest(id, seq) {
                        tracing::debug!("Ignoring stale save response for {} (seq {})", id, seq);
                        return SaveOutcome::Stale;
                    }
                    let mut queue = shared.queue.lock().await;
                    let result = queue.remove_superseded(id, seq).map(|_| ());
                    shared.note_persistence(result);
                    shared.mark_saved(id);
                    queue.is_empty()
                }
                Err(e) if e.is_transient() => {
                    if !shared.sequences.is_latest(id, seq) {
                        tracing::debug!("Stale save of {} failed, newer snapshot pending", id);
                        return SaveOutcome::Stale;
                    }
                    tracing::warn!("Save of {} failed, queueing: {}", id, e);
                    shared.enqueue(self.queue_item(id, payload, seq)).await;
                    shared.status.set(SaveStatus::Offline);
                    return SaveOutcome::Queued;
                }
                Err(e) => {
                    tracing::error!("Save of {} rejected: {}", id, e);
                    if shared.sequences.is_latest(id, seq) {
                        shared.mark_rejected(id);
                        shared.status.set(SaveStatus::Failed);
                    }
                    return SaveOutcome::Rejected;
                }
            }
        };

        if queue_empty {
            shared.status.set(SaveStatus::Saved);
        } else {
            // The endpoint answers again; retry what earlier failures left queued
            shared.status.set(SaveStatus::Offline);
            let outcome = self.flush().await;
            tracing::debug!("Retry flush after save of {}: {:?}", id, outcome);
        }
        SaveOutcome::Saved
    }

    fn queue_item(&self, id: &str, payload: serde_json::Value, seq: u64) -> QueueItem {
        QueueItem::new(id, payload, seq).with_origin(self.shared.origin)
    }

    /// Drain the pending-save queue against the backend
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush_worker.run(&self.shared).await
    }

    /// Report a connectivity change; a running listener flushes on reconnect
    pub fn set_online(&self, online: bool) {
        self.shared.network.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.shared.network.is_online()
    }

    /// Current save status
    pub fn status(&self) -> SaveStatus {
        self.shared.status.get()
    }

    /// Receive every save status change
    pub fn subscribe_status(&self) -> tokio::sync::watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    /// Status details for the UI
    pub async fn status_info(&self) -> StatusInfo {
        let status = self.status();
        let pending_changes = self.pending_count().await;
        let durability_degraded = self.shared.durability_degraded.load(Ordering::SeqCst);
        let rejected = self.shared.rejected();
        let last_saved_at = *self
            .shared
            .last_saved_at
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        StatusInfo {
            status,
            pending_changes,
            last_saved_at,
            durability_degraded,
            status_message: StatusInfo::describe(
                status,
                pending_changes,
                durability_degraded,
                &rejected,
            ),
            rejected,
        }
    }

    /// Whether the last write of the queue to local storage failed
    pub fn durability_degraded(&self) -> bool {
        self.shared.durability_degraded.load(Ordering::SeqCst)
    }

    /// Snapshot of the pending-save queue, oldest first
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        self.shared.queue.lock().await.items().cloned().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    /// Number of edits waiting for their debounce delay
    pub fn debouncing_count(&self) -> usize {
        self.shared.scheduler.pending_count()
    }

    /// Re-read the queue from storage after another session changed it
    pub async fn reload_queue(&self) {
        let mut queue = self.shared.queue.lock().await;
        match queue.reload() {
            Ok(()) => tracing::debug!("Reloaded {} pending saves", queue.len()),
            Err(e) => tracing::warn!("Could not reload pending saves: {}", e),
        }
    }

    pub(crate) async fn storage_subscription(
        &self,
    ) -> (broadcast::Receiver<StorageEvent>, String, TabId) {
        let queue = self.shared.queue.lock().await;
        (
            queue.storage().subscribe(),
            queue.key().to_string(),
            queue.storage().origin(),
        )
    }

    /// Fire every debounced edit now, wait for saves already under way, then
    /// flush if the network is available.
    ///
    /// Used before the session ends so no edit is left only in a timer or in
    /// a request nobody awaits.
    pub async fn shutdown(&self) -> AutosaveResult<FlushOutcome> {
        if !self.shared.config.enabled {
            return Err(AutosaveError::Disabled);
        }
        for (id, payload) in self.shared.scheduler.take_pending() {
            self.persist_now(&id, payload).await;
        }
        self.shared.scheduler.wait_fired().await;
        Ok(self.flush().await)
    }
}
