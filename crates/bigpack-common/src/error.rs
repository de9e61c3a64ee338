//! Error types for bigpack-common.

use thiserror::Error;

/// Errors raised by the shared reader and worker pool.
#[derive(Debug, Error)]
pub enum Error {
    /// A record or field runs past the end of its buffer.
    #[error("truncated data at offset {position}: {needed} bytes requested, {available} left")]
    Truncated {
        position: usize,
        needed: usize,
        available: usize,
    },

    /// A name-table string has no terminating NUL.
    #[error("unterminated string at offset {position}")]
    UnterminatedString { position: usize },

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),

    /// A pool task ended without producing its result (it panicked).
    #[error("worker task aborted before completing")]
    TaskAborted,
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
