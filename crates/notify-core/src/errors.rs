//! Error types for the hub.

use thiserror::Error;

/// Errors surfaced by the hub's intake handles.
///
/// Broadcast callers never see these: a failed broadcast is logged and dropped.
/// Registration and unregistration return them so the transport can tell
/// that the dispatch loop is gone.
#[derive(Debug, Error)]
pub enum HubError {
    /// The dispatch loop has stopped and no longer accepts events.
    #[error("hub dispatch loop is closed")]
    Closed,
    /// An envelope could not be converted to or from JSON.
    #[error("envelope JSON error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
