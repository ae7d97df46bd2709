//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not be turned into [`NotifySettings`](crate::NotifySettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file or the merged tree is not valid settings JSON.
    #[error("malformed settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but is outside its allowed range.
    #[error("{key} {reason}")]
    OutOfRange {
        /// Dotted camelCase key, as written in the file.
        key: &'static str,
        /// Constraint the value broke.
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn out_of_range(key: &'static str, reason: &'static str) -> Self {
        Self::OutOfRange { key, reason }
    }
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
