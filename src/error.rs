//! Error types for the tracker and index collaborators.
//!
//! "Ticket not found" is never an error: the tracker reports it as `Ok(None)`
//! and sync reports it as [`crate::sync::SyncOutcome::NotFound`].

use thiserror::Error;

/// Failures talking to the tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("tracker returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("tracker fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("invalid tracker response: {0}")]
    Decode(String),
}

/// Failures talking to the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Transport(String),

    /// The index rejected the document because of malformed text.
    #[error("index rejected document encoding (HTTP {status}): {reason}")]
    Encoding { status: u16, reason: String },

    #[error("index rejected request (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("invalid index response: {0}")]
    Decode(String),
}

impl IndexError {
    /// Whether the re-encoding retry applies to this error.
    pub fn is_encoding(&self) -> bool {
        matches!(self, IndexError::Encoding { .. })
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Decode(err.to_string())
    }
}
