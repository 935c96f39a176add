//! Error types for the autosave crate.

use store::StoreError;
use thiserror::Error;

/// Result type alias for autosave operations.
pub type AutosaveResult<T> = Result<T, AutosaveError>;

/// Errors returned by a save attempt against the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The request never reached the server or the connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// The server did not answer in time.
    #[error("Request timed out")]
    Timeout,

    /// The server failed in a way that may succeed on retry (5xx, 408, 429).
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// The server refused the document; retrying the same payload will not help.
    #[error("Save rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SaveError {
    /// Whether the same save may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SaveError::Network(_) | SaveError::Timeout | SaveError::Server { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 429 | 500..=599 => SaveError::Server { status },
            _ => SaveError::Rejected {
                status,
                message: message.into(),
            },
        }
    }
}

/// Errors surfaced by the autosave service.
#[derive(Error, Debug)]
pub enum AutosaveError {
    /// Local persistence failed; the pending save is kept in memory only.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A save attempt failed.
    #[error(transparent)]
    Save(#[from] SaveError),

    /// Autosave is disabled in the configuration.
    #[error("Autosave is disabled")]
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(SaveError::from_status(503, "busy"), SaveError::Server { status: 503 });
        assert_eq!(SaveError::from_status(429, "slow down"), SaveError::Server { status: 429 });
        assert_eq!(SaveError::from_status(408, ""), SaveError::Server { status: 408 });
        assert_eq!(
            SaveError::from_status(422, "invalid element"),
            SaveError::Rejected {
                status: 422,
                message: "invalid element".to_string()
            }
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(SaveError::Network("reset".into()).is_transient());
        assert!(SaveError::Timeout.is_transient());
        assert!(SaveError::Server { status: 502 }.is_transient());
        assert!(!SaveError::from_status(409, "conflict").is_transient());
        assert!(!SaveError::Serialization("nan".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = SaveError::from_status(403, "not your deck");
        assert_eq!(err.to_string(), "Save rejected (HTTP 403): not your deck");

        let err: AutosaveError = StoreError::PersistenceUnavailable("quota".into()).into();
        assert_eq!(err.to_string(), "Local persistence unavailable: quota");
    }
}
