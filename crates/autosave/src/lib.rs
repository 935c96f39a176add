//! Offline-tolerant autosave for slide documents.
//!
//! Edits are debounced per document, saved to a remote endpoint, and kept in
//! a durable local queue whenever the network is unavailable or a save fails.
//! The queue is drained in order once connectivity returns.
//!
//! # Modules
//!
//! - `scheduler`: per-document debounce timers
//! - `flush`: sequential, non-reentrant queue draining
//! - `inflight`: at most one save request per document at a time
//! - `connectivity`: online/offline signal and the listener reacting to it
//! - `status`: the observable save status shown to users
//! - `sequence`: per-document sequence numbers that discard stale responses
//! - `backend`: remote save implementations (HTTP and in-memory)
//! - `service`: the owned service object tying everything together
//! - `error`: error types
//!
//! # Example
//!
//! ```no_run
//! use autosave::{AutosaveService, HttpSaveBackend};
//! use store::{AutosaveConfig, MemoryStorage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AutosaveConfig::default().with_endpoint("https://decks.example.com/api/slides");
//! let backend = HttpSaveBackend::from_config(&config)?;
//! let service = AutosaveService::new(config, backend, MemoryStorage::new())?;
//! let _listener = service.start();
//!
//! service.edit("slide-1", serde_json::json!({ "title": "Q3 results" }));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod connectivity;
pub mod error;
pub mod flush;
pub mod inflight;
pub mod scheduler;
pub mod sequence;
pub mod service;
pub mod status;

pub use backend::{HttpSaveBackend, MemoryBackend, SaveBackend};
pub use connectivity::{ConnectivityListener, ListenerHandle, NetworkMonitor};
pub use error::{AutosaveError, AutosaveResult, SaveError};
pub use flush::{FlushOutcome, FlushWorker};
pub use inflight::DocumentLocks;
pub use scheduler::DebouncedScheduler;
pub use sequence::SequenceTracker;
pub use service::{AutosaveService, SaveOutcome};
pub use status::{SaveStatus, StatusIndicator, StatusInfo};
