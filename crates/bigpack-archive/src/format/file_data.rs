//! Per-file header stored in front of every payload.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{fixed_bytes, trim_padding};

/// Fill byte of the tamper payload.
pub const TAMPER_BYTE: u8 = 0x19;

/// Length of the tamper payload.
pub const TAMPER_LEN: usize = 1024;

/// Header names that trigger the tamper payload at build time: the same
/// phrase in GBK and in UTF-8.
pub const TAMPER_NAMES: [&[u8]; 2] = [
    &[0x5F, 0xB4, 0xCB, 0xB4, 0xA6, 0xBD, 0xFB, 0xD6, 0xB9, 0xCD, 0xA8, 0xD0, 0xD0],
    &[
        0x5F, 0xE6, 0xAD, 0xA4, 0xE5, 0xA4, 0x84, 0xE7, 0xA6, 0x81, 0xE6, 0xAD, 0xA2, 0xE9, 0x80,
        0x9A, 0xE8, 0xA1, 0x8C,
    ],
];

/// The 264-byte record right before a file's payload.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct FileDataHeader {
    /// File name, null padded. May be UTF-8 or a legacy code page.
    pub name: [u8; 256],
    /// Modification time, seconds since the Unix epoch.
    pub modified: U32,
    /// CRC-32 of the decompressed content.
    pub crc: U32,
}

impl FileDataHeader {
    pub fn new(name: &[u8], modified: u32, crc: u32) -> Self {
        Self {
            name: fixed_bytes(name),
            modified: U32::new(modified),
            crc: U32::new(crc),
        }
    }

    /// Name bytes without padding.
    pub fn name_bytes(&self) -> &[u8] {
        trim_padding(&self.name)
    }

    /// Whether the name is one of the tamper trigger names.
    pub fn is_tamper_name(&self) -> bool {
        let name = self.name_bytes();
        TAMPER_NAMES.iter().any(|trigger| *trigger == name)
    }
}

/// Whether a stored payload is the tamper payload.
pub fn is_tamper_payload(payload: &[u8]) -> bool {
    payload.len() == TAMPER_LEN && payload.iter().all(|&b| b == TAMPER_BYTE)
}
