//! Durable queue of pending document saves
//!
//! The queue lives in memory and is written as a whole JSON array under a
//! single storage key after every mutation, so it survives a restart of the
//! editor session. Writes that fail still leave the in-memory queue updated;
//! the caller gets [`StoreError::PersistenceUnavailable`] (or the backend's
//! quota error) and decides how to report degraded durability.

use crate::storage::{KeyValueStorage, TabId};
use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default storage key for the pending-save list
pub const DEFAULT_QUEUE_KEY: &str = "slidesave.pending";

/// One pending save of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Document (slide) identifier
    pub id: String,
    /// Snapshot of the editable state when the edit fired
    pub payload: serde_json::Value,
    /// Per-document sequence number of the edit
    pub seq: u64,
    /// Session whose counter issued `seq`; numbers from different sessions
    /// are not comparable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TabId>,
    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create an item stamped with the current time
    pub fn new(id: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            id: id.into(),
            payload,
            seq,
            origin: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Stamp the session that issued the sequence number
    pub fn with_origin(mut self, origin: TabId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// FIFO list of pending saves backed by key/value storage
pub struct LocalQueueStore<S: KeyValueStorage> {
    storage: S,
    key: String,
    items: VecDeque<QueueItem>,
}

impl<S: KeyValueStorage> LocalQueueStore<S> {
    /// Open the queue stored under `key`, starting empty if nothing is stored
    pub fn open(storage: S, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let items = Self::read(&storage, &key)?;
        if !items.is_empty() {
            tracing::debug!("Restored {} pending saves from '{}'", items.len(), key);
        }
        Ok(Self {
            storage,
            key,
            items,
        })
    }

    fn read(storage: &S, key: &str) -> Result<VecDeque<QueueItem>> {
        match storage.get(key)? {
            None => Ok(VecDeque::new()),
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Storage key the queue is written under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying storage handle
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest pending item
    pub fn front(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// All pending items, oldest first
    pub fn items(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    /// Whether any item is pending for document `id`
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// Append an item and persist.
    ///
    /// With `coalesce`, any older item for the same document is dropped first,
    /// so the queue holds at most one item per document.
    pub fn enqueue(&mut self, item: QueueItem, coalesce: bool) -> Result<()> {
        if coalesce {
            self.items.retain(|existing| existing.id != item.id);
        }
        self.items.push_back(item);
        self.persist()
    }

    /// Remove `target` (matched by document, sequence number and origin),
    /// then persist.
    ///
    /// Returns whether an item was removed. Nothing is written when the item
    /// is already gone (e.g. superseded meanwhile).
    pub fn remove(&mut self, target: &QueueItem) -> Result<bool> {
        let before = self.items.len();
        self.items.retain(|item| {
            !(item.id == target.id && item.seq == target.seq && item.origin == target.origin)
        });
        if self.items.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Drop this session's items for `id` older than `seq`, then persist.
    ///
    /// Items queued by other sessions are kept. Returns the number of items
    /// dropped.
    pub fn remove_superseded(&mut self, id: &str, seq: u64) -> Result<usize> {
        let origin = Some(self.storage.origin());
        let before = self.items.len();
        self.items
            .retain(|item| !(item.id == id && item.origin == origin && item.seq < seq));
        let dropped = before - self.items.len();
        if dropped > 0 {
            self.persist()?;
        }
        Ok(dropped)
    }

    /// Take over every item in the queue as this session's own, then persist.
    ///
    /// Used when a session starts on a queue left behind by earlier ones, so
    /// the restored sequence numbers can be compared with the ones it issues.
    pub fn claim(&mut self) -> Result<()> {
        let origin = Some(self.storage.origin());
        if self.items.iter().all(|item| item.origin == origin) {
            return Ok(());
        }
        for item in self.items.iter_mut() {
            item.origin = origin;
        }
        self.persist()
    }

    /// Replace the in-memory queue with what storage currently holds
    pub fn reload(&mut self) -> Result<()> {
        self.items = Self::read(&self.storage, &self.key)?;
        Ok(())
    }

    /// Write the whole queue to storage
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_string(&self.items)?;
        self.storage.set(&self.key, &json).map_err(|e| match e {
            StoreError::QuotaExceeded { .. } | StoreError::PersistenceUnavailable(_) => e,
            other => StoreError::PersistenceUnavailable(other.to_string()),
        })
    }
}
