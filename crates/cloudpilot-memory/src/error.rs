//! Memory error types.
//!
//! [`MemoryError`] covers all anticipated failure modes in the memory layer:
//! I/O, serialization, and atomic-persist failures. Callers above the store
//! log these and degrade to empty context rather than failing the turn.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by memory operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Filesystem operation failed.
    #[error("memory I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The atomic write-temp-then-rename step failed.
    #[error("failed to persist {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}
