//! Index records: TOCs, folders and file infos.

use std::fmt;

use serde::{Deserialize, Serialize};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{fixed_bytes, trim_padding};
use crate::{Error, Result};

/// How a file's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CompressionMethod {
    /// Stored as-is.
    Uncompressed = 0x00,
    /// zlib stream, meant to be inflated as it is read.
    #[default]
    DecompressDuringRead = 0x10,
    /// zlib stream, meant to be inflated in one go.
    DecompressAllAtOnce = 0x20,
}

impl CompressionMethod {
    #[inline]
    pub const fn is_compressed(self) -> bool {
        !matches!(self, CompressionMethod::Uncompressed)
    }

    /// Label used in listings.
    pub const fn label(self) -> &'static str {
        match self {
            CompressionMethod::Uncompressed => "Store",
            CompressionMethod::DecompressDuringRead => "Compress Stream",
            CompressionMethod::DecompressAllAtOnce => "Compress Buffer",
        }
    }

    /// Label used in file trees.
    pub const fn storage_name(self) -> &'static str {
        match self {
            CompressionMethod::Uncompressed => "store",
            CompressionMethod::DecompressDuringRead => "compress_stream",
            CompressionMethod::DecompressAllAtOnce => "compress_buffer",
        }
    }
}

impl TryFrom<u8> for CompressionMethod {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(CompressionMethod::Uncompressed),
            0x10 => Ok(CompressionMethod::DecompressDuringRead),
            0x20 => Ok(CompressionMethod::DecompressAllAtOnce),
            other => Err(Error::Format(format!("unknown compression method {other:#04x}"))),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A table of contents: one top-level tree inside the archive.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TocEntry {
    pub alias: [u8; 64],
    pub name: [u8; 64],
    pub first_folder: U16,
    pub last_folder: U16,
    pub first_file: U16,
    pub last_file: U16,
    /// Index of the folder rooting this TOC's hierarchy.
    pub start_hierarchy: U16,
}

impl TocEntry {
    pub fn new(name: &str, alias: &str) -> Self {
        Self {
            alias: fixed_bytes(alias.as_bytes()),
            name: fixed_bytes(name.as_bytes()),
            first_folder: U16::ZERO,
            last_folder: U16::ZERO,
            first_file: U16::ZERO,
            last_file: U16::ZERO,
            start_hierarchy: U16::ZERO,
        }
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(trim_padding(&self.name)).into_owned()
    }

    pub fn alias(&self) -> String {
        String::from_utf8_lossy(trim_padding(&self.alias)).into_owned()
    }
}

/// A folder: its own path plus ranges of direct sub-folders and files.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FolderEntry {
    pub name_offset: U32,
    pub first_subfolder: U16,
    pub last_subfolder: U16,
    pub first_file: U16,
    pub last_file: U16,
}

impl FolderEntry {
    pub fn subfolders(&self) -> std::ops::Range<usize> {
        self.first_subfolder.get() as usize..self.last_subfolder.get() as usize
    }

    pub fn files(&self) -> std::ops::Range<usize> {
        self.first_file.get() as usize..self.last_file.get() as usize
    }
}

/// Where a file's payload lives and how it is stored.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FileInfoEntry {
    pub name_offset: U32,
    pub method: u8,
    /// Payload offset relative to the file-data base. The file's
    /// [`FileDataHeader`](super::FileDataHeader) sits right before it.
    pub file_data_offset: U32,
    pub compressed_len: U32,
    pub decompressed_len: U32,
}

impl FileInfoEntry {
    pub fn new(name_offset: u32, method: CompressionMethod, decompressed_len: u32) -> Self {
        Self {
            name_offset: U32::new(name_offset),
            method: method as u8,
            file_data_offset: U32::ZERO,
            compressed_len: U32::ZERO,
            decompressed_len: U32::new(decompressed_len),
        }
    }

    /// The decoded storage method.
    pub fn compression(&self) -> Result<CompressionMethod> {
        CompressionMethod::try_from(self.method)
    }

    /// Ratio of stored to original size; 1 for empty files.
    pub fn ratio(&self) -> f64 {
        match self.decompressed_len.get() {
            0 => 1.0,
            original => self.compressed_len.get() as f64 / original as f64,
        }
    }
}
