//! Cursor over the little-endian records of an archive index.
//!
//! Index sections are addressed by byte offsets taken from the section
//! header, so the cursor is seeked to each section and then reads a run of
//! fixed-size records or NUL-terminated names from there.

use zerocopy::FromBytes;

use crate::{Error, Result};

/// A seekable cursor that decodes records without copying the buffer.
///
/// # Example
///
/// ```
/// use bigpack_common::BinaryReader;
///
/// // A key block: marker, length, then the key itself.
/// let block = [0x7A, 0xBE, 0xAD, 0xDE, 0x04, 0x00, 1, 2, 3, 4];
/// let mut reader = BinaryReader::new(&block);
///
/// assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BE7A);
/// let len = reader.read_u16().unwrap() as usize;
/// assert_eq!(reader.read_bytes(len).unwrap(), &[1, 2, 3, 4]);
/// assert_eq!(reader.remaining(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self::new_at(data, 0)
    }

    /// A cursor placed at `position`, which may lie past the end.
    #[inline]
    pub const fn new_at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    #[inline]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bytes between the cursor and the end of the buffer.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move to an absolute offset; bounds are checked by the next read.
    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Truncated {
            position: self.position,
            needed,
            available: self.remaining(),
        }
    }

    /// Take the next `count` bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.truncated(count))?;

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Take one NUL-terminated string, returning it without the terminator.
    pub fn read_cstring_bytes(&mut self) -> Result<&'a [u8]> {
        let start = self.position.min(self.data.len());
        let rest = &self.data[start..];
        let len = memchr::memchr(0, rest).ok_or(Error::UnterminatedString {
            position: self.position,
        })?;

        self.position = start + len + 1;
        Ok(&rest[..len])
    }

    /// Decode one record.
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| self.truncated(size))
    }

    /// Decode a run of `count` consecutive records.
    pub fn read_structs<T: FromBytes>(&mut self, count: usize) -> Result<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let total = size.checked_mul(count).ok_or_else(|| self.truncated(usize::MAX))?;
        let bytes = self.read_bytes(total)?;

        let mut records = Vec::with_capacity(count);
        for chunk in bytes.chunks_exact(size.max(1)).take(count) {
            records.push(T::read_from_bytes(chunk).map_err(|_| self.truncated(size))?);
        }
        Ok(records)
    }
}
