//! Adler-32 helpers and zlib framing.

/// Adler-32 of the empty input.
pub const ADLER32_INIT: u32 = miniz_oxide::MZ_ADLER32_INIT;

const ADLER_BASE: u32 = 65521;

/// Continue an Adler-32 computation over `data`.
#[inline]
pub fn adler32(seed: u32, data: &[u8]) -> u32 {
    miniz_oxide::mz_adler32_oxide(seed, data)
}

/// Combine the Adler-32 of two adjacent ranges.
///
/// `adler1` covers the first range, `adler2` the second, and `len2` is the
/// length of the second range.
pub fn adler32_combine(adler1: u32, adler2: u32, len2: usize) -> u32 {
    let rem = (len2 % ADLER_BASE as usize) as u32;
    let mut sum1 = adler1 & 0xFFFF;
    let mut sum2 = (rem * sum1) % ADLER_BASE;

    sum1 += (adler2 & 0xFFFF) + ADLER_BASE - 1;
    sum2 += ((adler1 >> 16) & 0xFFFF) + ((adler2 >> 16) & 0xFFFF) + ADLER_BASE - rem;

    if sum1 >= ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    if sum1 >= ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    if sum2 >= ADLER_BASE << 1 {
        sum2 -= ADLER_BASE << 1;
    }
    if sum2 >= ADLER_BASE {
        sum2 -= ADLER_BASE;
    }

    sum1 | (sum2 << 16)
}

/// Two-byte zlib header for a 32K-window deflate stream, carrying the
/// level hint for `level`.
pub fn zlib_header(level: u32) -> [u8; 2] {
    let hint: u16 = match level {
        9.. => 3,
        1 => 0,
        6.. => 1,
        _ => 2,
    };

    let mut head: u16 = (0x78 << 8) + (hint << 6);
    head += 31 - (head % 31);
    head.to_be_bytes()
}

/// Worst-case zlib output size for `len` input bytes.
#[inline]
pub const fn compress_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}
