//! Archive and section headers.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{ARCHIVE_HEADER_SIZE, FORMAT_VERSION};
use bigpack_cipher::ARCHIVE_MAGIC;

/// Number of UTF-16 code units reserved for the archive name.
const NAME_UNITS: usize = 64;

/// Archive header at offset 0.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ArchiveHeader {
    /// `_ARCHIVE`.
    pub magic: [u8; 8],
    pub version: U32,
    /// MD5 over the tool salt and the whole body.
    pub tool_signature: [u8; 16],
    /// Display name, UTF-16LE, null padded.
    pub name: [U16; NAME_UNITS],
    /// MD5 over the archive salt and the index region.
    pub archive_signature: [u8; 16],
    /// Size of the index region that follows this header.
    pub section_header_size: U32,
    /// Absolute offset of the file-data base.
    pub exact_file_data_offset: U32,
}

impl ArchiveHeader {
    /// A header for a new archive with zeroed signatures and sizes.
    ///
    /// Names longer than 63 code units are truncated.
    pub fn new(name: &str) -> Self {
        let mut header = Self::new_zeroed();
        header.magic = *ARCHIVE_MAGIC;
        header.version = U32::new(FORMAT_VERSION);
        for (slot, unit) in header.name.iter_mut().zip(name.encode_utf16().take(NAME_UNITS - 1)) {
            *slot = U16::new(unit);
        }
        header
    }

    /// Whether the magic tag is present.
    #[inline]
    pub fn has_magic(&self) -> bool {
        &self.magic == ARCHIVE_MAGIC
    }

    /// The archive display name.
    pub fn display_name(&self) -> String {
        let units: Vec<u16> = self
            .name
            .iter()
            .map(|unit| unit.get())
            .take_while(|&unit| unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }

    /// Absolute offset where file payloads begin.
    #[inline]
    pub fn data_base(&self) -> u64 {
        self.exact_file_data_offset.get() as u64
    }

    /// Absolute end of the index region.
    #[inline]
    pub fn index_end(&self) -> u64 {
        ARCHIVE_HEADER_SIZE as u64 + self.section_header_size.get() as u64
    }
}

/// Location and size of each index section.
///
/// Offsets are relative to the end of [`ArchiveHeader`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct SectionHeader {
    pub toc_offset: U32,
    pub toc_count: U16,
    pub folder_offset: U32,
    pub folder_count: U16,
    pub file_info_offset: U32,
    pub file_info_count: U16,
    pub name_offset: U32,
    pub name_count: U16,
}

impl Default for SectionHeader {
    fn default() -> Self {
        Self::new_zeroed()
    }
}
