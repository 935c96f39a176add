//! Per-document serialization of save requests.
//!
//! Direct saves and queue flushes both send snapshots of the same documents.
//! Each request holds the lock of its document for the whole round trip, so
//! at most one request per document is in flight and an older snapshot can
//! never land after a newer one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<LockMap>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until no request for `id` is in flight, then hold the document
    /// until the guard is dropped.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.map();
            // Nobody holds or waits for these
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Whether a request for `id` currently holds the document
    pub fn is_busy(&self, id: &str) -> bool {
        self.map()
            .get(id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of documents with a holder or waiter
    pub fn active(&self) -> usize {
        self.map()
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
