//! Error types for archive operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or reading an archive.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem or stream I/O failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive structures are malformed.
    #[error("malformed archive: {0}")]
    Format(String),

    /// An index, count or state precondition was violated.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Compression or decompression failed.
    #[error("decode error: {0}")]
    Decode(#[from] bigpack_deflate::Error),

    /// The archive carries a tamper signature.
    #[error("Fatal error.")]
    Fatal,

    /// Text could not be decoded or the code page is unknown.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The build task is inconsistent.
    #[error("invalid build task: {0}")]
    InvalidTask(String),

    /// Binary reader or worker pool failure.
    #[error(transparent)]
    Common(#[from] bigpack_common::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error must abort a whole extract or test run instead of
    /// being recorded against a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal | Error::Io { .. } | Error::Common(_))
    }
}

impl From<bigpack_cipher::Error> for Error {
    fn from(err: bigpack_cipher::Error) -> Self {
        match err {
            bigpack_cipher::Error::Io { path, source } => Error::Io { path, source },
            bigpack_cipher::Error::Format(msg) => Error::Format(msg),
            bigpack_cipher::Error::OutOfRange(msg) => Error::OutOfRange(msg),
            bigpack_cipher::Error::Fatal => Error::Fatal,
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
