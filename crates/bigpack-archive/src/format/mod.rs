//! On-disk records of the `.big` container.
//!
//! Every record is little-endian and byte-packed. The index region starts
//! right after [`ArchiveHeader`]; all index offsets are relative to that
//! point, and file payload offsets are relative to the file-data base stored
//! in the header.
//!
//! ```text
//! [ArchiveHeader 180]
//! [SectionHeader 24][TocEntry..][FolderEntry..][FileInfoEntry..][names..]
//! [key block, encrypted archives only]
//! ([FileDataHeader 264][payload])*
//! [u32 back distance to key block, encrypted archives only]
//! ```

mod file_data;
mod header;
mod index;

pub use file_data::{is_tamper_payload, FileDataHeader, TAMPER_BYTE, TAMPER_LEN, TAMPER_NAMES};
pub use header::{ArchiveHeader, SectionHeader};
pub use index::{CompressionMethod, FileInfoEntry, FolderEntry, TocEntry};

/// Format version written to new archives.
pub const FORMAT_VERSION: u32 = 2;

/// Deepest folder nesting a TOC may have.
pub const MAX_FOLDER_DEPTH: usize = 256;

/// Salt prepended to the index region for the archive signature.
pub const ARCHIVE_SIGNATURE_SALT: &[u8; 36] = b"DFC9AF62-FC1B-4180-BC27-11CCE87D3EFF";

/// Salt prepended to the whole body for the tool signature.
pub const TOOL_SIGNATURE_SALT: &[u8; 36] = b"E01519D6-2DB7-4640-AF54-0A23319C56C3";

pub const ARCHIVE_HEADER_SIZE: usize = std::mem::size_of::<ArchiveHeader>();
pub const SECTION_HEADER_SIZE: usize = std::mem::size_of::<SectionHeader>();
pub const TOC_ENTRY_SIZE: usize = std::mem::size_of::<TocEntry>();
pub const FOLDER_ENTRY_SIZE: usize = std::mem::size_of::<FolderEntry>();
pub const FILE_INFO_SIZE: usize = std::mem::size_of::<FileInfoEntry>();
pub const FILE_DATA_HEADER_SIZE: usize = std::mem::size_of::<FileDataHeader>();

const _: () = {
    assert!(ARCHIVE_HEADER_SIZE == 180);
    assert!(SECTION_HEADER_SIZE == 24);
    assert!(TOC_ENTRY_SIZE == 138);
    assert!(FOLDER_ENTRY_SIZE == 12);
    assert!(FILE_INFO_SIZE == 17);
    assert!(FILE_DATA_HEADER_SIZE == 264);
};

/// Copy `text` into a null-padded fixed buffer, keeping room for the
/// terminator.
pub(crate) fn fixed_bytes<const N: usize>(text: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = text.len().min(N - 1);
    buf[..len].copy_from_slice(&text[..len]);
    buf
}

/// The bytes of a null-padded fixed buffer up to the first null.
pub(crate) fn trim_padding(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_bytes_truncates() {
        let buf: [u8; 4] = fixed_bytes(b"abcdef");
        assert_eq!(&buf, b"abc\0");
        assert_eq!(trim_padding(&buf), b"abc");
    }

    #[test]
    fn test_trim_padding_full_buffer() {
        assert_eq!(trim_padding(b"abcd"), b"abcd");
        assert_eq!(trim_padding(b"\0abc"), b"");
    }
}
