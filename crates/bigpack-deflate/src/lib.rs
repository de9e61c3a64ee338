//! Parallel zlib compression for archive payloads.
//!
//! Small inputs are compressed as one zlib stream on a single pool task.
//! Inputs of [`PARTITION_THRESHOLD`] bytes or more are cut into
//! [`PART_SIZE`] chunks that are deflated independently as raw streams
//! (full flush between chunks, finish on the last). Whichever chunk task
//! completes last stitches the output together: a synthetic two-byte zlib
//! header, the chunks in input order, and the big-endian Adler-32 obtained
//! by combining the per-chunk checksums in closed form.
//!
//! Level 10 selects Zopfli for single streams and miniz's highest-effort
//! encoder for partitions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bigpack_common::WorkerPool;
//! use bigpack_deflate::Compressor;
//!
//! let pool = WorkerPool::new(0)?;
//! let compressor = Compressor::new(&pool);
//! let data: Arc<Vec<u8>> = Arc::new(b"hello hello hello".to_vec());
//! let packed = compressor.compress(data.clone(), 9).wait()??;
//! let unpacked = Compressor::decompress(&packed, data.len())?;
//! assert_eq!(&unpacked, data.as_ref());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod checksum;
mod codec;
mod compressor;
mod error;

pub use checksum::{adler32, adler32_combine, compress_bound, zlib_header, ADLER32_INIT};
pub use codec::{deflate_part, inflate_exact, zlib_compress};
pub use compressor::{Compressor, SharedBytes, PARTITION_THRESHOLD, PART_SIZE};
pub use error::{Error, Result};

/// Highest accepted compression level; selects the high-ratio encoder.
pub const MAX_LEVEL: u32 = 10;
