//! Error types for membridge-core operations.
//!
//! Errors are categorized into:
//!
//! - **External errors**: Wrapped errors from dependencies (libsql, serde_json, io)
//! - **Remote errors**: Object-store failures classified by [`crate::remote::RemoteError`]
//! - **Domain errors**: Configuration, integrity, and worker failures
//!
//! Concurrency refusals (lock held, secondary push, primary pull) are *not*
//! errors: the sync engine reports them as tagged outcomes so callers can
//! pattern-match and map them to distinct exit codes.

use thiserror::Error;

/// The error type for membridge-core operations.
#[derive(Debug, Error)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Libsql Error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Object-store failure, classified as not-found, transport, or server.
    #[error("Remote Error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    // -- Domain errors
    /// Missing or malformed configuration; fail fast at the offending call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot integrity verification failed (source check or hash mismatch).
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Worker daemon control failure (pid file, signals, spawn).
    #[error("Worker error: {0}")]
    Worker(String),

    /// Input validation error.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True when the underlying cause is a missing remote object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Remote(e) if e.is_not_found())
    }
}

/// A specialized [`Result`] type for membridge-core operations.
pub type Result<T> = core::result::Result<T, Error>;
