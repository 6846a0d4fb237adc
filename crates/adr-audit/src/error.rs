// error.rs — Error types for the action log.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Each variant maps to a specific failure mode in the audit pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during action log operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the log file.
    #[error("failed to open action log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write an entry to the log.
    #[error("failed to append entry: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to serialize an entry.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The hash chain is broken. Fatal: appends stay halted until an
    /// operator intervenes.
    #[error("integrity check failed at entry {position}: {detail}")]
    IntegrityViolation { position: usize, detail: String },

    /// A previous integrity failure halted the log.
    #[error("action log halted after integrity failure: {reason}")]
    Halted { reason: String },

    /// Another thread panicked while holding the shared log.
    #[error("action log lock poisoned")]
    Poisoned,

    /// An attestation key could not be loaded or generated.
    #[error("attestation key error: {0}")]
    KeyError(String),

    /// An attestation signature did not verify against its public key.
    #[error("attestation signature invalid for entry {seq}")]
    BadSignature { seq: u64 },
}

impl AuditError {
    /// True for the failures that mean the trail itself can no longer be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            AuditError::IntegrityViolation { .. } | AuditError::Halted { .. }
        )
    }
}
