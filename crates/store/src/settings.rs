//! Application settings management
//!
//! This module provides settings loading and persistence
//! for the autosave pipeline and the command-line driver.

use crate::queue::DEFAULT_QUEUE_KEY;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppSettings {
    /// Autosave pipeline settings
    pub autosave: AutosaveConfig,
    /// Directory for locally persisted state (pending saves).
    /// `None` keeps pending saves in memory only.
    pub storage_dir: Option<PathBuf>,
}

/// Autosave configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Whether edits are persisted at all
    pub enabled: bool,
    /// Quiet period after the last edit before a save fires (in milliseconds)
    pub debounce_ms: u64,
    /// Storage key of the pending-save list
    pub storage_key: String,
    /// Keep at most one pending save per document
    pub coalesce_queue: bool,
    /// Base URL of the save endpoint; documents are PUT to `{endpoint}/{id}`
    pub endpoint: String,
    /// Per-request timeout (in milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 800,
            storage_key: DEFAULT_QUEUE_KEY.to_string(),
            coalesce_queue: true,
            endpoint: "http://localhost:3000/api/slides".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl AutosaveConfig {
    /// Set the debounce delay
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the save endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the storage key
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Enable or disable per-document coalescing of pending saves
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce_queue = coalesce;
        self
    }

    /// Create a config with autosave disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Debounce delay as a `Duration`
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Loads and saves application settings
pub struct SettingsManager {
    /// Path to the settings file
    settings_path: PathBuf,
    /// Current settings (cached)
    current: AppSettings,
}

impl SettingsManager {
    /// Create a new settings manager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        Self::with_path(app_data_dir.join("settings.json"))
    }

    /// Create a settings manager for an explicit settings file
    pub fn with_path(settings_path: PathBuf) -> Self {
        Self {
            settings_path,
            current: AppSettings::default(),
        }
    }

    /// Get the path to the settings file
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// Load settings from disk, or return defaults if file doesn't exist
    pub async fn load(&mut self) -> Result<&AppSettings> {
        if self.settings_path.exists() {
            let content = tokio::fs::read_to_string(&self.settings_path).await?;
            self.current = Self::parse_or_default(&content);
        } else {
            self.current = AppSettings::default();
        }
        Ok(&self.current)
    }

    fn parse_or_default(content: &str) -> AppSettings {
        match serde_json::from_str::<AppSettings>(content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to parse settings file, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Save current settings to disk
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(&self.current)?;
        tokio::fs::write(&self.settings_path, content).await?;
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &AppSettings {
        &self.current
    }
}
