//! Remote persistence of document snapshots.
//!
//! The only remote operation the pipeline needs is an idempotent
//! save/replace of one document. [`HttpSaveBackend`] performs it as
//! `PUT {endpoint}/{id}` with a JSON body; [`MemoryBackend`] keeps the saved
//! snapshots in memory and can be scripted to fail, which the command-line
//! dry-run mode and the tests rely on.

use crate::error::SaveError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use store::AutosaveConfig;

/// Backend that persists a document's current state.
#[trait_variant::make(Send)]
pub trait SaveBackend: Send + Sync {
    /// Replace the stored state of document `id` with `payload`.
    async fn save(&self, id: &str, payload: &serde_json::Value) -> Result<(), SaveError>;
}

/// HTTP implementation of [`SaveBackend`].
#[derive(Debug, Clone)]
pub struct HttpSaveBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSaveBackend {
    /// Create a backend for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SaveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SaveError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Create a backend from the autosave configuration.
    pub fn from_config(config: &AutosaveConfig) -> Result<Self, SaveError> {
        Self::new(config.endpoint.clone(), config.request_timeout())
    }

    /// URL a document is saved to.
    pub fn url_for(&self, id: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(id)
        )
    }
}

fn classify(err: reqwest::Error) -> SaveError {
    if err.is_timeout() {
        SaveError::Timeout
    } else if err.is_builder() || err.is_body() {
        SaveError::Serialization(err.to_string())
    } else {
        SaveError::Network(err.to_string())
    }
}

impl SaveBackend for HttpSaveBackend {
    async fn save(&self, id: &str, payload: &serde_json::Value) -> Result<(), SaveError> {
        let url = self.url_for(id);
        tracing::debug!("PUT {}", url);

        let response = self
            .client
            .put(&url)
            .json(payload)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SaveError::from_status(status.as_u16(), message))
    }
}

#[derive(Debug, Default)]
struct MemoryBackendState {
    reachable: bool,
    latency: Option<Duration>,
    scripted: VecDeque<SaveError>,
    failing: HashMap<String, SaveError>,
    attempts: Vec<(String, serde_json::Value)>,
    documents: HashMap<String, serde_json::Value>,
}

/// In-memory [`SaveBackend`] with scriptable failures.
///
/// Clones share state, so a handle kept outside the service observes every
/// call the service makes.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryBackendState>>,
}

impl MemoryBackend {
    /// Create a reachable backend with no stored documents.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryBackendState {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryBackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delay every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    /// Make every request fail with a network error while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Fail the next request with `error`.
    pub fn fail_next(&self, error: SaveError) {
        self.state().scripted.push_back(error);
    }

    /// Fail every request for `id` with `error` until cleared.
    pub fn fail_document(&self, id: impl Into<String>, error: SaveError) {
        self.state().failing.insert(id.into(), error);
    }

    /// Stop failing requests for `id`.
    pub fn clear_failure(&self, id: &str) {
        self.state().failing.remove(id);
    }

    /// Every request made, in order, including failed ones.
    pub fn attempts(&self) -> Vec<(String, serde_json::Value)> {
        self.state().attempts.clone()
    }

    /// Number of requests made.
    pub fn attempt_count(&self) -> usize {
        self.state().attempts.len()
    }

    /// Last successfully stored state of `id`.
    pub fn document(&self, id: &str) -> Option<serde_json::Value> {
        self.state().documents.get(id).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveBackend for MemoryBackend {
    async fn save(&self, id: &str, payload: &serde_json::Value) -> Result<(), SaveError> {
        let latency = {
            let mut state = self.state();
            state.attempts.push((id.to_string(), payload.clone()));
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if !state.reachable {
            return Err(SaveError::Network("backend unreachable".to_string()));
        }
        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing.get(id) {
            return Err(error.clone());
        }
        state.documents.insert(id.to_string(), payload.clone());
        Ok(())
    }
}
