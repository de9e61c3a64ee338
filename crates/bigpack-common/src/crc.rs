//! CRC-32 hashing utilities.
//!
//! Every file stored in an archive carries the zlib CRC-32 (reflected
//! polynomial `0xEDB88320`) of its decompressed content.

pub use crc32fast::Hasher;

/// Compute the CRC-32 of a byte slice.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Continue a CRC-32 computation from a previous value.
#[inline]
pub fn hash_bytes_with_seed(data: &[u8], seed: u32) -> u32 {
    let mut hasher = Hasher::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}
