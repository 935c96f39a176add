//! Draining of the pending-save queue.

use crate::backend::SaveBackend;
use crate::service::Shared;
use crate::status::SaveStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use store::KeyValueStorage;

/// How a flush ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue was drained
    Completed {
        /// Items saved remotely
        saved: usize,
        /// Documents the backend refused and that were dropped from the queue
        rejected: Vec<String>,
    },
    /// A save failed transiently or the network went away; the rest stays queued
    Stopped { saved: usize, remaining: usize },
    /// The network is unavailable; nothing was attempted
    Offline,
    /// Another flush is already draining the queue
    AlreadyRunning,
}

/// Clears the in-progress flag when the flush ends, even if it is cancelled
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Sequential, non-reentrant queue drainer
#[derive(Debug, Default)]
pub struct FlushWorker {
    in_progress: AtomicBool,
}

impl FlushWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a drain is running
    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Drain the queue head-first, one request at a time.
    ///
    /// Each request holds its document, so it never overlaps a direct save
    /// of the same document.
    pub(crate) async fn run<B, S>(&self, shared: &Shared<B, S>) -> FlushOutcome
    where
        B: SaveBackend,
        S: KeyValueStorage,
    {
        if !shared.network.is_online() {
            tracing::debug!("Flush skipped: offline");
            return FlushOutcome::Offline;
        }

        let Some(_guard) = FlushGuard::acquire(&self.in_progress) else {
            tracing::debug!("Flush skipped: already running");
            return FlushOutcome::AlreadyRunning;
        };

        let mut saved = 0;
        let mut rejected = Vec::new();

        loop {
            if !shared.network.is_online() {
                shared.status.set(SaveStatus::Offline);
                let remaining = shared.queue.lock().await.len();
                return FlushOutcome::Stopped { saved, remaining };
            }

            let head = shared.queue.lock().await.front().cloned();
            let Some(item) = head else {
                break;
            };

            // Direct saves of the same document go first; the check below
            // then sees any snapshot they issued
            let _document = shared.in_flight.acquire(&item.id).await;

            let still_queued = shared.queue.lock().await.items().any(|queued| queued == &item);
            if !still_queued {
                continue;
            }
            if shared.is_superseded(&item) {
                tracing::debug!("Dropping superseded save of {} (seq {})", item.id, item.seq);
                shared.remove_queued(&item).await;
                continue;
            }

            shared.status.set(SaveStatus::Saving);
            match shared.backend.save(&item.id, &item.payload).await {
                Ok(()) => {
                    saved += 1;
                    shared.remove_queued(&item).await;
                    shared.mark_saved(&item.id);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Flush stopped at {}: {}", item.id, e);
                    shared.status.set(SaveStatus::Offline);
                    let remaining = shared.queue.lock().await.len();
                    return FlushOutcome::Stopped { saved, remaining };
                }
                Err(e) => {
                    tracing::error!("Save of {} rejected, dropping it: {}", item.id, e);
                    shared.remove_queued(&item).await;
                    shared.mark_rejected(&item.id);
                    rejected.push(item.id.clone());
                }
            }
        }

        if rejected.is_empty() {
            shared.status.set(SaveStatus::Saved);
        } else {
            shared.status.set(SaveStatus::Failed);
        }
        tracing::info!("Flush complete: {} saved, {} rejected", saved, rejected.len());
        FlushOutcome::Completed { saved, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let guard = FlushGuard::acquire(&flag);
            assert!(guard.is_some());
            assert!(FlushGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::SeqCst));
        assert!(FlushGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_new_worker_is_idle() {
        assert!(!FlushWorker::new().is_running());
    }
}
