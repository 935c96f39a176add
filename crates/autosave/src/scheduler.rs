//! Per-document debouncing of edits.
//!
//! Each document has at most one armed timer. A new edit for the same document
//! cancels the sleeping timer and arms a fresh one carrying the newer snapshot,
//! so a burst of edits produces a single save with the last snapshot. Once a
//! timer has fired its save is no longer cancelable, but it is counted until
//! it finishes so shutdown can wait for it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// An edit waiting for its quiet period to elapse
#[derive(Debug)]
struct PendingEdit {
    generation: u64,
    payload: serde_json::Value,
    timer: AbortHandle,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingEdit>>>;

/// Counts a fired save until it finishes or is dropped
struct FiringGuard {
    firing: Arc<watch::Sender<usize>>,
}

impl FiringGuard {
    fn start(firing: &Arc<watch::Sender<usize>>) -> Self {
        firing.send_modify(|count| *count += 1);
        Self {
            firing: Arc::clone(firing),
        }
    }
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        self.firing.send_modify(|count| *count -= 1);
    }
}

fn lock(map: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingEdit>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Debounced save scheduler
#[derive(Debug)]
pub struct DebouncedScheduler {
    delay: Duration,
    pending: PendingMap,
    generation: AtomicU64,
    firing: Arc<watch::Sender<usize>>,
}

impl DebouncedScheduler {
    /// Create a scheduler with a fixed quiet period
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            firing: Arc::new(watch::channel(0).0),
        }
    }

    /// The quiet period
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record an edit of `id`.
    ///
    /// Any timer still sleeping for `id` is canceled. When the new timer
    /// elapses, `fire` runs with the document id and the latest snapshot.
    pub fn schedule<F, Fut>(&self, id: impl Into<String>, payload: serde_json::Value, fire: F)
    where
        F: FnOnce(String, serde_json::Value) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.delay;

        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.remove(&id) {
            previous.timer.abort();
            tracing::trace!("Debounce restarted for {}", id);
        }

        let map = Arc::clone(&self.pending);
        let firing = Arc::clone(&self.firing);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Counted under the map lock so `take_pending` never misses it
            let fired = {
                let mut pending = lock(&map);
                match pending.get(&task_id) {
                    Some(entry) if entry.generation == generation => pending
                        .remove(&task_id)
                        .map(|entry| (entry.payload, FiringGuard::start(&firing))),
                    _ => None,
                }
            };

            if let Some((payload, _guard)) = fired {
                tracing::debug!("Debounce elapsed for {}", task_id);
                fire(task_id, payload).await;
            }
        });

        pending.insert(
            id,
            PendingEdit {
                generation,
                payload,
                timer: task.abort_handle(),
            },
        );
    }

    /// Cancel the armed timer for `id`, returning its snapshot
    pub fn cancel(&self, id: &str) -> Option<serde_json::Value> {
        let entry = lock(&self.pending).remove(id)?;
        entry.timer.abort();
        Some(entry.payload)
    }

    /// Cancel every armed timer, discarding the edits. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut pending = lock(&self.pending);
        let count = pending.len();
        for (_, entry) in pending.drain() {
            entry.timer.abort();
        }
        count
    }

    /// Cancel every armed timer, returning the snapshots they carried
    pub fn take_pending(&self) -> Vec<(String, serde_json::Value)> {
        let mut pending = lock(&self.pending);
        let mut taken: Vec<(u64, String, serde_json::Value)> = pending
            .drain()
            .map(|(id, entry)| {
                entry.timer.abort();
                (entry.generation, id, entry.payload)
            })
            .collect();
        // Oldest edit first
        taken.sort_by_key(|(generation, _, _)| *generation);
        taken
            .into_iter()
            .map(|(_, id, payload)| (id, payload))
            .collect()
    }

    /// Number of documents with an armed timer
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Number of fired saves still running
    pub fn firing_count(&self) -> usize {
        *self.firing.borrow()
    }

    /// Wait until every save whose timer already fired has finished
    pub async fn wait_fired(&self) {
        let mut rx = self.firing.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Whether `id` has an armed timer
    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }
}

impl Drop for DebouncedScheduler {
    fn drop(&mut self) {
        for (_, entry) in lock(&self.pending).drain() {
            entry.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    type Fired = mpsc::UnboundedReceiver<(String, serde_json::Value, Instant)>;

    fn recorder() -> (
        mpsc::UnboundedSender<(String, serde_json::Value, Instant)>,
        Fired,
    ) {
        mpsc::unbounded_channel()
    }

    fn schedule(
        scheduler: &DebouncedScheduler,
        tx: &mpsc::UnboundedSender<(String, serde_json::Value, Instant)>,
        id: &str,
        payload: serde_json::Value,
    ) {
        let tx = tx.clone();
        scheduler.schedule(id, payload, move |id, payload| async move {
            let _ = tx.send((id, payload, Instant::now()));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_with_last_payload() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();
        let start = Instant::now();

        schedule(&scheduler, &tx, "slide-1", json!({ "x": 1 }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        schedule(&scheduler, &tx, "slide-1", json!({ "x": 2 }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        schedule(&scheduler, &tx, "slide-1", json!({ "x": 3 }));

        tokio::time::sleep(Duration::from_millis(799)).await;
        assert!(rx.try_recv().is_err());
        assert!(scheduler.is_pending("slide-1"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        let (id, payload, fired_at) = rx.try_recv().unwrap();
        assert_eq!(id, "slide-1");
        assert_eq!(payload, json!({ "x": 3 }));
        let elapsed = fired_at - start;
        assert!(elapsed >= Duration::from_millis(1100));
        assert!(elapsed < Duration::from_millis(1102));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_documents_debounce_independently() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();

        schedule(&scheduler, &tx, "slide-1", json!(1));
        tokio::time::sleep(Duration::from_millis(400)).await;
        schedule(&scheduler, &tx, "slide-2", json!(2));
        assert_eq!(scheduler.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(401)).await;
        assert_eq!(rx.try_recv().unwrap().0, "slide-1");
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv().unwrap().0, "slide-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_fire_separately() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();

        schedule(&scheduler, &tx, "slide-1", json!({ "x": 1 }));
        tokio::time::sleep(Duration::from_millis(900)).await;
        schedule(&scheduler, &tx, "slide-1", json!({ "x": 2 }));
        tokio::time::sleep(Duration::from_millis(900)).await;

        assert_eq!(rx.try_recv().unwrap().1, json!({ "x": 1 }));
        assert_eq!(rx.try_recv().unwrap().1, json!({ "x": 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_take_pending() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();

        schedule(&scheduler, &tx, "slide-1", json!(1));
        schedule(&scheduler, &tx, "slide-2", json!(2));
        schedule(&scheduler, &tx, "slide-3", json!(3));

        assert_eq!(scheduler.cancel("slide-2"), Some(json!(2)));
        assert_eq!(scheduler.cancel("slide-2"), None);

        let taken = scheduler.take_pending();
        assert_eq!(
            taken,
            vec![
                ("slide-1".to_string(), json!(1)),
                ("slide-3".to_string(), json!(3))
            ]
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fired_covers_running_saves() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();

        scheduler.schedule("slide-1", json!(1), move |id, payload| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send((id, payload, Instant::now()));
        });

        tokio::time::sleep(Duration::from_millis(801)).await;
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.firing_count(), 1);
        assert!(scheduler.take_pending().is_empty());

        scheduler.wait_fired().await;
        assert_eq!(scheduler.firing_count(), 0);
        let (id, payload, _) = rx.try_recv().unwrap();
        assert_eq!(id, "slide-1");
        assert_eq!(payload, json!(1));
    }

    #[tokio::test]
    async fn test_wait_fired_returns_when_idle() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        scheduler.wait_fired().await;
        assert_eq!(scheduler.firing_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_discards_edits() {
        let scheduler = DebouncedScheduler::new(Duration::from_millis(800));
        let (tx, mut rx) = recorder();

        schedule(&scheduler, &tx, "slide-1", json!(1));
        schedule(&scheduler, &tx, "slide-2", json!(2));
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
