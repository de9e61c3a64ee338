//! Bigpack - builder and reader for sectioned `.big` game archives.
//!
//! This crate provides a unified interface to the bigpack crates.
//!
//! # Crates
//!
//! - [`bigpack_common`] - Binary reading, CRC-32 and the worker pool
//! - [`bigpack_cipher`] - The obfuscating archive stream
//! - [`bigpack_deflate`] - Parallel zlib compression
//! - [`bigpack_archive`] - Archive building, listing, testing and extraction
//!
//! # Example
//!
//! ```no_run
//! use bigpack::prelude::*;
//!
//! let archive = Archive::open("Music.big")?;
//! for file in archive.files() {
//!     println!("{} ({} bytes)", file.path(), file.info.decompressed_len.get());
//! }
//!
//! let report = archive.extract("out".as_ref(), bigpack::archive::progress::silent)?;
//! println!("extracted {} files", report.written);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use bigpack_archive as archive;
pub use bigpack_cipher as cipher;
pub use bigpack_common as common;
pub use bigpack_deflate as deflate;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use bigpack_archive::{
        Archive, ArchiveWriter, BuildOptions, BuildSummary, BuildTask, CompressionMethod,
        Encryption, Event, ExtractReport, FileRule, FileTree, ProgressLog, ReadOptions,
        RuleAction, Severity, TocTask,
    };
    pub use bigpack_cipher::{CipherStream, StreamState};
    pub use bigpack_common::{crc, WorkerPool};
    pub use bigpack_deflate::Compressor;
}

pub use bigpack_archive::{Archive, ArchiveWriter};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
