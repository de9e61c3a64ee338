//! Single-threaded deflate primitives.

use std::num::NonZeroU64;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use miniz_oxide::deflate::core::{
    compress as miniz_compress, create_comp_flags_from_zip_params, CompressorOxide, TDEFLFlush,
    TDEFLStatus,
};

use crate::checksum::{adler32, compress_bound, ADLER32_INIT};
use crate::{Error, Result, MAX_LEVEL};

/// Raw deflate window size used for partitions.
const WINDOW_BITS: i32 = 15;

/// Zopfli iterations per block at level 10.
const ZOPFLI_ITERATIONS: NonZeroU64 = match NonZeroU64::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

/// Compress `data` into a complete zlib stream.
pub fn zlib_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    match level {
        0..=9 => {
            let mut encoder = Compress::new(Compression::new(level), true);
            run_flate2(&mut encoder, data, FlushCompress::Finish)
        }
        MAX_LEVEL => zopfli_zlib(data),
        other => Err(Error::InvalidLevel(other)),
    }
}

/// Zopfli with block splitting, wrapped as a zlib stream.
fn zopfli_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut options = zopfli::Options::default();
    options.iteration_count = ZOPFLI_ITERATIONS;

    let mut output = Vec::with_capacity(compress_bound(data.len()));
    zopfli::compress(options, zopfli::Format::Zlib, data, &mut output)
        .map_err(|e| Error::Zlib(e.to_string()))?;
    Ok(output)
}

/// Deflate one partition as a raw stream.
///
/// Intermediate partitions end on a full flush so that they can be
/// concatenated; the last one finishes the stream. Level 10 uses miniz's
/// highest-effort encoder here since zopfli cannot leave a stream open. Returns the compressed
/// bytes and the Adler-32 of `data`.
pub fn deflate_part(data: &[u8], level: u32, last: bool) -> Result<(Vec<u8>, u32)> {
    let compressed = match level {
        0..=9 => {
            let flush = if last {
                FlushCompress::Finish
            } else {
                FlushCompress::Full
            };
            let mut encoder = Compress::new(Compression::new(level), false);
            run_flate2(&mut encoder, data, flush)?
        }
        MAX_LEVEL => {
            let flush = if last {
                TDEFLFlush::Finish
            } else {
                TDEFLFlush::Full
            };
            run_miniz_raw(data, flush)?
        }
        other => return Err(Error::InvalidLevel(other)),
    };

    Ok((compressed, adler32(ADLER32_INIT, data)))
}

/// Inflate a zlib stream that must decode to exactly `expected` bytes.
pub fn inflate_exact(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = Decompress::new(true);
    let mut output = Vec::with_capacity(expected + 1);

    let status = decoder
        .decompress_vec(data, &mut output, FlushDecompress::Finish)
        .map_err(|e| Error::Zlib(e.to_string()))?;

    match status {
        Status::StreamEnd if output.len() == expected => Ok(output),
        Status::StreamEnd => Err(Error::LengthMismatch {
            expected,
            actual: output.len(),
        }),
        _ if output.len() > expected => Err(Error::LengthMismatch {
            expected,
            actual: output.len(),
        }),
        _ => Err(Error::Zlib(format!(
            "truncated stream after {} of {expected} bytes",
            output.len()
        ))),
    }
}

fn run_flate2(encoder: &mut Compress, data: &[u8], flush: FlushCompress) -> Result<Vec<u8>> {
    let finishing = matches!(flush, FlushCompress::Finish);
    let mut output = Vec::with_capacity(compress_bound(data.len()) + 16);

    loop {
        let consumed = encoder.total_in() as usize;
        let status = encoder
            .compress_vec(&data[consumed..], &mut output, flush)
            .map_err(|e| Error::Zlib(e.to_string()))?;

        let input_done = encoder.total_in() as usize == data.len();
        let done = match status {
            Status::StreamEnd => true,
            Status::Ok | Status::BufError => {
                !finishing && input_done && output.len() < output.capacity()
            }
        };
        if done {
            return Ok(output);
        }

        output.reserve(output.capacity().max(64));
    }
}

fn run_miniz_raw(data: &[u8], flush: TDEFLFlush) -> Result<Vec<u8>> {
    let flags = create_comp_flags_from_zip_params(MAX_LEVEL as i32, -WINDOW_BITS, 0);
    let mut encoder = Box::new(CompressorOxide::new(flags));
    let finishing = matches!(flush, TDEFLFlush::Finish);

    let mut output = vec![0u8; compress_bound(data.len()) + 16];
    let mut in_pos = 0;
    let mut out_pos = 0;

    loop {
        let (status, bytes_in, bytes_out) =
            miniz_compress(&mut encoder, &data[in_pos..], &mut output[out_pos..], flush);
        in_pos += bytes_in;
        out_pos += bytes_out;

        match status {
            TDEFLStatus::Done => break,
            TDEFLStatus::Okay if !finishing && in_pos == data.len() && out_pos < output.len() => {
                break
            }
            TDEFLStatus::Okay => {
                let grow = output.len().max(64);
                output.resize(output.len() + grow, 0);
            }
            other => return Err(Error::Zlib(format!("deflate failed: {other:?}"))),
        }
    }

    output.truncate(out_pos);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| b"the quick brown fox jumps over the lazy dog "[i % 44] ^ (i / 4096) as u8)
            .collect()
    }

    #[test]
    fn test_zlib_round_trip_all_levels() {
        let data = sample(70_000);
        for level in 0..=MAX_LEVEL {
            let compressed = zlib_compress(&data, level).unwrap();
            assert_eq!(inflate_exact(&compressed, data.len()).unwrap(), data, "level {level}");
        }
    }

    #[test]
    fn test_level_ten_is_zopfli() {
        let data = sample(70_000);
        let best = zlib_compress(&data, MAX_LEVEL).unwrap();
        let default = zlib_compress(&data, 6).unwrap();

        assert_eq!(best[0], 0x78);
        assert_eq!((u16::from(best[0]) << 8 | u16::from(best[1])) % 31, 0);
        assert!(best.len() <= default.len());
        assert_eq!(inflate_exact(&best, data.len()).unwrap(), data);
    }

    #[test]
    fn test_invalid_level() {
        assert!(matches!(zlib_compress(b"x", 11), Err(Error::InvalidLevel(11))));
        assert!(matches!(deflate_part(b"x", 42, true), Err(Error::InvalidLevel(42))));
    }

    #[test]
    fn test_parts_concatenate() {
        let data = sample(300_000);
        for level in [1, 6, MAX_LEVEL] {
            let (a, adler_a) = deflate_part(&data[..100_000], level, false).unwrap();
            let (b, adler_b) = deflate_part(&data[100_000..], level, true).unwrap();
            assert_eq!(adler_a, adler32(ADLER32_INIT, &data[..100_000]));
            assert_eq!(adler_b, adler32(ADLER32_INIT, &data[100_000..]));

            let mut joined = a;
            joined.extend_from_slice(&b);
            let mut decoded = Vec::new();
            flate2::read::DeflateDecoder::new(&joined[..])
                .read_to_end(&mut decoded)
                .unwrap();
            assert_eq!(decoded, data, "level {level}");
        }
    }

    #[test]
    fn test_inflate_length_mismatch() {
        let compressed = zlib_compress(b"abcd", 6).unwrap();
        assert!(matches!(
            inflate_exact(&compressed, 3),
            Err(Error::LengthMismatch { expected: 3, .. })
        ));
        assert!(matches!(
            inflate_exact(&compressed, 5),
            Err(Error::LengthMismatch { expected: 5, actual: 4 })
        ));
    }

    #[test]
    fn test_inflate_garbage() {
        assert!(inflate_exact(&[0x19; 1024], 1024).is_err());
    }

    #[test]
    fn test_small_payload_within_bound() {
        let compressed = zlib_compress(b"abcd", 9).unwrap();
        assert!(compressed.len() <= compress_bound(4));
    }
}
