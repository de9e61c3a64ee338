//! Error types for the deflate crate.

use thiserror::Error;

/// Errors that can occur while compressing or decompressing a payload.
#[derive(Debug, Error)]
pub enum Error {
    /// The codec rejected the input or failed internally.
    #[error("zlib error: {0}")]
    Zlib(String),

    /// The stream decoded to a different size than recorded.
    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Compression level outside `0..=10`.
    #[error("unsupported compression level: {0}")]
    InvalidLevel(u32),

    /// Worker pool failure.
    #[error("{0}")]
    Common(#[from] bigpack_common::Error),
}

/// Result type for compression operations.
pub type Result<T> = std::result::Result<T, Error>;
