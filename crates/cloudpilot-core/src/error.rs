//! Core error types and the retryable-error classifier.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the core data model.

use thiserror::Error;

/// Core errors produced by the cloudpilot-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A plan could not be decoded from its JSON representation.
    #[error("invalid plan: {reason}")]
    InvalidPlan { reason: String },

    /// An action program could not be decoded from its JSON representation.
    #[error("invalid action program: {reason}")]
    InvalidProgram { reason: String },

    /// A state overlay referenced a stage that does not exist.
    #[error("unknown stage: '{name}'")]
    UnknownStage { name: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error signatures that must never trigger a codegen retry.
///
/// Permission, auth, network and quota problems will not be fixed by
/// regenerating the action program.
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "permission denied",
    "not authorized",
    "authentication failed",
    "invalid credentials",
    "network error",
    "connection timeout",
    "service unavailable",
    "rate limit exceeded",
    "quota exceeded",
];

/// Error signatures that indicate a defective artifact worth regenerating.
const RETRYABLE_PATTERNS: &[&str] = &[
    "attributeerror",
    "nameerror",
    "syntaxerror",
    "indentationerror",
    "typeerror",
    "valueerror",
    "keyerror",
    "has no attribute",
    "is not defined",
    "invalid syntax",
    "unknown field",
    "unknown operation",
];

/// Classifies an execution error as retryable (artifact defect) or
/// non-retryable (environment problem).
///
/// Non-retryable signatures win over retryable ones; unknown errors default
/// to retryable, bounded by the executor retry budget.
pub fn retryable_error(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }

    let lower = message.to_lowercase();

    for pattern in NON_RETRYABLE_PATTERNS {
        if lower.contains(pattern) {
            return false;
        }
    }

    for pattern in RETRYABLE_PATTERNS {
        if lower.contains(pattern) {
            return true;
        }
    }

    true
}
