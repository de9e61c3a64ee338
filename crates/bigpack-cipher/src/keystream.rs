//! Keystream derivation.
//!
//! The raw file key is expanded word by word: each 32-bit little-endian key
//! word seeds an accumulator that is rotated with the key anchor and folded
//! through the substitution table once per output byte.

use byteorder::{ByteOrder, LittleEndian};

/// Size in bytes of keys generated by writers.
pub const KEY_SIZE: usize = 256;

/// First key word of every freshly generated key.
///
/// Readers treat a key starting with it as a tampered archive.
pub const FRESH_KEY_SENTINEL: u32 = 0xA0D6_8015;

/// Marker written in front of the key block.
pub const KEY_BLOCK_MARKER: u32 = 0xDEAD_BE7A;

const SUBSTITUTION: [u32; 256] = build_substitution_table();

const fn build_substitution_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Expand a raw file key into the keystream used at `anchor`.
///
/// `key.len()` must be a multiple of 4; a trailing partial word is ignored.
pub fn derive_keystream(key: &[u8], anchor: u32) -> Vec<u8> {
    let mut keystream = vec![0u8; key.len()];

    for (word, out) in key.chunks_exact(4).zip(keystream.chunks_exact_mut(4)) {
        let mut current = LittleEndian::read_u32(word);
        for byte in out.iter_mut() {
            let rotated = current.wrapping_add(anchor).rotate_left(8);
            for b in rotated.to_le_bytes() {
                current = SUBSTITUTION[((current ^ b as u32) & 0xFF) as usize] ^ (current >> 8);
            }
            *byte = current as u8;
        }
    }

    keystream
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_table() {
        assert_eq!(SUBSTITUTION[0], 0);
        assert_eq!(SUBSTITUTION[1], 0x7707_3096);
        assert_eq!(SUBSTITUTION[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_known_keystream() {
        let keystream = derive_keystream(&[1, 2, 3, 4, 5, 6, 7, 8], 180);
        assert_eq!(keystream, [0x45, 0x04, 0x5f, 0x3a, 0x20, 0x7b, 0xb1, 0x2b]);
    }

    #[test]
    fn test_zero_key_at_origin() {
        assert_eq!(derive_keystream(&[0; 8], 0), [0; 8]);
    }

    #[test]
    fn test_anchor_changes_keystream() {
        let key: Vec<u8> = (0..KEY_SIZE as u32).map(|i| (i * 7) as u8).collect();
        assert_ne!(derive_keystream(&key, 1000), derive_keystream(&key, 1001));
        assert_eq!(derive_keystream(&key, 1000).len(), KEY_SIZE);
    }
}
