//! Save status signal for the editor's status chip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Summary of save health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    /// No edit has been made yet
    #[default]
    Idle,
    /// A save request is in flight
    Saving,
    /// Everything is persisted remotely
    Saved,
    /// Changes are queued locally until the network returns
    Offline,
    /// The server refused a change permanently
    Failed,
}

impl SaveStatus {
    /// Short label for the status chip
    pub fn label(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "",
            SaveStatus::Saving => "Saving...",
            SaveStatus::Saved => "Saved",
            SaveStatus::Offline => "Offline",
            SaveStatus::Failed => "Save failed",
        }
    }

    /// Glyph for the status chip
    pub fn glyph(&self) -> &'static str {
        match self {
            SaveStatus::Idle => " ",
            SaveStatus::Saving => "⟳",
            SaveStatus::Saved => "✓",
            SaveStatus::Offline => "⚠",
            SaveStatus::Failed => "✗",
        }
    }
}

/// Observable holder of the current [`SaveStatus`].
#[derive(Debug)]
pub struct StatusIndicator {
    tx: watch::Sender<SaveStatus>,
}

impl StatusIndicator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SaveStatus::Idle);
        Self { tx }
    }

    /// Current status
    pub fn get(&self) -> SaveStatus {
        *self.tx.borrow()
    }

    /// Update the status; subscribers are only woken on an actual change
    pub fn set(&self, status: SaveStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            tracing::trace!("Save status {:?} -> {:?}", current, status);
            *current = status;
            true
        });
    }

    /// Receive every status change
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information for UI display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: SaveStatus,
    pub pending_changes: usize,
    pub last_saved_at: Option<DateTime<Utc>>,
    /// Pending saves could not be written to local storage
    pub durability_degraded: bool,
    /// Documents whose last change the server refused
    pub rejected: Vec<String>,
    pub status_message: String,
}

impl StatusInfo {
    pub(crate) fn describe(
        status: SaveStatus,
        pending_changes: usize,
        durability_degraded: bool,
        rejected: &[String],
    ) -> String {
        let mut message = match status {
            SaveStatus::Idle => "No changes".to_string(),
            SaveStatus::Saving => "Saving changes...".to_string(),
            SaveStatus::Saved => "All changes saved".to_string(),
            SaveStatus::Offline => {
                if pending_changes > 0 {
                    format!("Offline - {} pending changes", pending_changes)
                } else {
                    "Offline".to_string()
                }
            }
            SaveStatus::Failed => format!("Could not save {}", rejected.join(", ")),
        };
        if durability_degraded {
            message.push_str(" (not stored locally)");
        }
        message
    }
}
