//! Error types for chapter-dl
//!
//! Failures of an individual download never surface here: they are recorded on the
//! task and its durable state. These types cover the command API, configuration,
//! the state file and the fetcher's one-shot operations (search).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for chapter-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chapter-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetcher.program")
        key: Option<String>,
    },

    /// Download command error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// State file error
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (the fetcher)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors returned by the download command API
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No task or durable state with this identifier
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: String,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} download {id} in state {current_state}")]
    InvalidState {
        /// The download ID that is in an invalid state for the operation
        id: String,
        /// The operation that was attempted (e.g., "pause", "resume", "retry")
        operation: String,
        /// The current state that prevents the operation (e.g., "active", "complete")
        current_state: String,
    },

    /// The durable state lacks what is needed to invoke the fetcher again
    #[error("download {id} cannot be resumed: {reason}")]
    NotResumable {
        /// The download ID
        id: String,
        /// Why the fetcher cannot be re-invoked
        reason: String,
    },
}

/// Errors raised while writing the durable state file
///
/// Reading never fails: a missing or corrupt file is treated as empty state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Writing or renaming the state file failed
    #[error("failed to write state file {path}: {reason}")]
    WriteFailed {
        /// The state file path
        path: PathBuf,
        /// The underlying failure
        reason: String,
    },
}
