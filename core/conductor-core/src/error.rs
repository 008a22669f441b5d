//! Error types for conductor-core operations.
//!
//! Contention and detection misses are not errors: `acquire` reports contention as
//! `Ok(false)` and the detector reports ambiguity as `Detection::None`. Only the
//! conditions a caller must decide about surface here.

use std::path::PathBuf;
use std::time::Duration;

/// All errors that can occur in conductor-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    // ─────────────────────────────────────────────────────────────────────
    // Lock Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Timed out acquiring lock on {directory} after {waited:?}")]
    LockTimeout { directory: PathBuf, waited: Duration },

    #[error("Another instance is already running (lock: {0})")]
    InstanceAlreadyRunning(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Router Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Terminal command failed for session {session}: {details}")]
    Terminal { session: String, details: String },

    #[error("Statistics store error: {context}: {source}")]
    Stats {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CoordError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CoordError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        CoordError::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn stats(context: impl Into<String>, source: rusqlite::Error) -> Self {
        CoordError::Stats {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using CoordError.
pub type Result<T> = std::result::Result<T, CoordError>;
