//! Reader and builder for sectioned `.big` archives.
//!
//! An archive is a fixed 180-byte header, an index region and a data
//! region, optionally obfuscated with the keystream from `bigpack-cipher`.
//!
//! # File Format
//!
//! - Archive header: magic `_ARCHIVE`, version, MD5 tool signature, UTF-16
//!   name, MD5 archive signature, index size and data offset
//! - Index region: a section header followed by TOC entries, folder entries,
//!   file-info entries and a NUL-terminated name table
//! - Data region: one 264-byte file header (name, mtime, CRC-32) in front
//!   of each payload, stored raw or zlib compressed
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use bigpack_archive::{progress, Archive, ArchiveWriter, BuildOptions, BuildTask, TocTask};
//!
//! let mut toc = TocTask::new("data", "assets/data");
//! toc.files = vec!["assets/data/theme.ogg".into(), "assets/data/ui/click.wav".into()];
//! let task = BuildTask {
//!     name: "Music".into(),
//!     tocs: vec![toc],
//! };
//! let options = BuildOptions::default();
//! ArchiveWriter::new(&options).build(&task, Path::new("."), Path::new("Music.big"), progress::silent)?;
//!
//! let archive = Archive::open("Music.big")?;
//! print!("{}", archive.listing());
//! assert!(archive.test(progress::silent)?);
//! # Ok::<(), bigpack_archive::Error>(())
//! ```

mod classify;
mod error;
mod names;
mod options;
mod plan;
mod reader;
mod task;
mod tree;
mod writer;

pub mod format;
pub mod progress;
pub mod signer;

pub use classify::{FileDisposition, IgnoreList, RuleSet, Wildcard};
pub use error::{Error, Result};
pub use format::CompressionMethod;
pub use names::{decode_text, NameTable, NameTableBuilder};
pub use options::{BuildOptions, Encryption, ReadOptions};
pub use plan::{ArchivePlan, FileSource};
pub use progress::{Event, ProgressLog, Severity};
pub use reader::{Archive, ExtractReport, FileRef, SignatureCheck};
pub use signer::Digest;
pub use task::{BuildTask, FileRule, RuleAction, TocTask};
pub use tree::{FileNode, FileTree, FolderTree, TocTree};
pub use writer::{ArchiveWriter, BuildSummary};
