//! The name table: null-terminated strings addressed by byte offset.

use bigpack_common::BinaryReader;
use encoding_rs::Encoding;
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// Decode stored text, trying UTF-8 first and `fallback` second.
pub fn decode_text(bytes: &[u8], fallback: &'static Encoding) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => {
            let (text, had_errors) = fallback.decode_without_bom_handling(bytes);
            if had_errors {
                tracing::debug!(encoding = fallback.name(), "lossy name decode");
            }
            text.into_owned()
        }
    }
}

/// Offset to name lookup built once when an archive is opened.
#[derive(Debug, Default)]
pub struct NameTable {
    names: FxHashMap<u32, String>,
}

impl NameTable {
    /// Parse `count` consecutive null-terminated names from `bytes`.
    pub fn parse(bytes: &[u8], count: usize, encoding: &'static Encoding) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let mut names = FxHashMap::default();
        names.reserve(count);

        for index in 0..count {
            let offset = reader.position() as u32;
            let raw = reader.read_cstring_bytes().map_err(|_| {
                Error::Format(format!("name {index} of {count} is not terminated"))
            })?;
            names.insert(offset, decode_text(raw, encoding));
        }

        Ok(Self { names })
    }

    /// The name starting at `offset`.
    #[inline]
    pub fn get(&self, offset: u32) -> Option<&str> {
        self.names.get(&offset).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Accumulates names and hands out their offsets.
#[derive(Debug, Default, Clone)]
pub struct NameTableBuilder {
    bytes: Vec<u8>,
    count: usize,
}

impl NameTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` and return its offset.
    pub fn push(&mut self, name: &str) -> Result<u32> {
        if name.as_bytes().contains(&0) {
            return Err(Error::InvalidTask(format!("name {name:?} contains a null byte")));
        }

        let offset = u32::try_from(self.bytes.len())
            .map_err(|_| Error::OutOfRange("name table exceeds 4 GiB".into()))?;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        self.count += 1;
        Ok(offset)
    }

    /// Append every name of `other`, returning the offset shift applied to
    /// its offsets.
    pub fn append(&mut self, other: NameTableBuilder) -> Result<u32> {
        let shift = u32::try_from(self.bytes.len())
            .map_err(|_| Error::OutOfRange("name table exceeds 4 GiB".into()))?;
        self.bytes.extend_from_slice(&other.bytes);
        self.count += other.count;
        Ok(shift)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
