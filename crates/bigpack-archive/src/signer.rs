//! MD5 signatures stored in the archive header.

use crate::format::{ARCHIVE_SIGNATURE_SALT, TOOL_SIGNATURE_SALT};
use crate::{Error, Result};

/// Bytes read per step while hashing.
pub const SIGN_CHUNK: usize = 4096;

/// A 16-byte MD5 digest.
pub type Digest = [u8; 16];

/// MD5 over `salt` followed by the bytes in `[start, end)`, fetched through
/// `read(position, buffer)`.
pub fn digest_region<F>(salt: &[u8], start: u64, end: u64, mut read: F) -> Result<Digest>
where
    F: FnMut(u64, &mut [u8]) -> Result<usize>,
{
    let mut context = md5::Context::new();
    context.consume(salt);

    let mut buffer = [0u8; SIGN_CHUNK];
    let mut position = start;
    while position < end {
        let want = (end - position).min(SIGN_CHUNK as u64) as usize;
        let got = read(position, &mut buffer[..want])?;
        if got == 0 {
            return Err(Error::Format(format!(
                "signed region ends at {position}, expected {end}"
            )));
        }
        context.consume(&buffer[..got]);
        position += got as u64;
    }

    Ok(context.compute().0)
}

/// Digest of the index region `[start, end)`.
pub fn archive_signature<F>(start: u64, end: u64, read: F) -> Result<Digest>
where
    F: FnMut(u64, &mut [u8]) -> Result<usize>,
{
    digest_region(ARCHIVE_SIGNATURE_SALT, start, end, read)
}

/// Digest of the whole body `[start, end)`.
pub fn tool_signature<F>(start: u64, end: u64, read: F) -> Result<Digest>
where
    F: FnMut(u64, &mut [u8]) -> Result<usize>,
{
    digest_region(TOOL_SIGNATURE_SALT, start, end, read)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_reader(data: &[u8]) -> impl FnMut(u64, &mut [u8]) -> Result<usize> + '_ {
        move |position, buffer| {
            let start = (position as usize).min(data.len());
            let n = buffer.len().min(data.len() - start);
            buffer[..n].copy_from_slice(&data[start..start + n]);
            Ok(n)
        }
    }

    #[test]
    fn test_matches_one_shot_md5() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let digest = archive_signature(100, 9_000, slice_reader(&data)).unwrap();

        let mut whole = ARCHIVE_SIGNATURE_SALT.to_vec();
        whole.extend_from_slice(&data[100..9_000]);
        assert_eq!(digest, md5::compute(&whole).0);
    }

    #[test]
    fn test_empty_region_is_salt_digest() {
        let digest = tool_signature(5, 5, slice_reader(b"")).unwrap();
        assert_eq!(digest, md5::compute(TOOL_SIGNATURE_SALT).0);
    }

    #[test]
    fn test_salts_differ() {
        let data = vec![7u8; 64];
        let a = archive_signature(0, 64, slice_reader(&data)).unwrap();
        let t = tool_signature(0, 64, slice_reader(&data)).unwrap();
        assert_ne!(a, t);
    }

    #[test]
    fn test_short_region() {
        let result = tool_signature(0, 100, slice_reader(&[1u8; 10]));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_digest_renders_as_lowercase_hex() {
        let digest: Digest = md5::compute(b"").0;
        assert_eq!(hex::encode(digest), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
