//! Error types for the cipher crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while using a [`CipherStream`](crate::CipherStream).
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying file I/O failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key block or trailer is malformed.
    #[error("malformed key block: {0}")]
    Format(String),

    /// The operation is not valid for the stream's state.
    #[error("operation not permitted: {0}")]
    OutOfRange(String),

    /// The archive carries the fresh-key sentinel of a writer, which no
    /// legitimate reader input may contain.
    #[error("Fatal error.")]
    Fatal,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for cipher stream operations.
pub type Result<T> = std::result::Result<T, Error>;
