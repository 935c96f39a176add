//! Per-document sequence numbers for ordering save responses.
//!
//! Every edit that fires gets the next number for its document. A response is
//! only applied when its number is still the latest one issued, so a slow
//! response for an older snapshot can never overwrite the status or the queue
//! state produced by a newer one.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct SequenceTracker {
    latest: Mutex<HashMap<String, u64>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next sequence number for `id` (starting at 1)
    pub fn issue(&self, id: &str) -> u64 {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        let next = latest.get(id).copied().unwrap_or(0) + 1;
        latest.insert(id.to_string(), next);
        next
    }

    /// Latest number issued for `id`, 0 if none
    pub fn latest(&self, id: &str) -> u64 {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        latest.get(id).copied().unwrap_or(0)
    }

    /// Whether `seq` is the newest number issued for `id`
    pub fn is_latest(&self, id: &str, seq: u64) -> bool {
        self.latest(id) == seq
    }

    /// Raise the counter for `id` to at least `seq`.
    ///
    /// Used when pending saves restored from storage carry numbers from an
    /// earlier session.
    pub fn observe(&self, id: &str, seq: u64) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        let entry = latest.entry(id.to_string()).or_insert(0);
        if seq > *entry {
            *entry = seq;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_is_monotonic_per_document() {
        let tracker = SequenceTracker::new();
        assert_eq!(tracker.issue("slide-1"), 1);
        assert_eq!(tracker.issue("slide-1"), 2);
        assert_eq!(tracker.issue("slide-2"), 1);
        assert_eq!(tracker.latest("slide-1"), 2);
        assert_eq!(tracker.latest("unknown"), 0);
    }

    #[test]
    fn test_stale_sequence_detected() {
        let tracker = SequenceTracker::new();
        let first = tracker.issue("slide-1");
        assert!(tracker.is_latest("slide-1", first));

        let second = tracker.issue("slide-1");
        assert!(!tracker.is_latest("slide-1", first));
        assert!(tracker.is_latest("slide-1", second));
    }

    #[test]
    fn test_observe_only_raises() {
        let tracker = SequenceTracker::new();
        tracker.observe("slide-1", 7);
        assert_eq!(tracker.issue("slide-1"), 8);

        tracker.observe("slide-1", 3);
        assert_eq!(tracker.latest("slide-1"), 8);
    }
}
