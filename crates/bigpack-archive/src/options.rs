//! Immutable options for build and read operations.

use encoding_rs::Encoding;

use crate::{Error, Result};

/// How a new archive is obfuscated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Encryption {
    #[default]
    None,
    /// A fresh key, from `seed` or from OS entropy.
    Generated { seed: Option<u64> },
    /// A caller supplied raw key.
    Key(Vec<u8>),
}

impl Encryption {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Encryption::None)
    }
}

/// Options for [`ArchiveWriter`](crate::ArchiveWriter).
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Worker threads; 0 selects the number of logical cores.
    pub threads: usize,
    /// Compression level, `0..=10`.
    pub compress_level: u32,
    pub skip_tool_signature: bool,
    /// Folder names (trailing `/` or `\`) and file-name wildcards to leave out.
    pub ignore_list: Vec<String>,
    pub encryption: Encryption,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            compress_level: 9,
            skip_tool_signature: true,
            ignore_list: Vec::new(),
            encryption: Encryption::None,
        }
    }
}

/// Options for [`Archive`](crate::Archive).
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Worker threads; 0 selects the number of logical cores.
    pub threads: usize,
    /// Code page tried for names that are not valid UTF-8.
    pub legacy_encoding: &'static Encoding,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            legacy_encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

impl ReadOptions {
    /// Use the code page named by a WHATWG `label`, e.g. `gbk` or `shift_jis`.
    pub fn with_encoding_label(mut self, label: &str) -> Result<Self> {
        self.legacy_encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::Encoding(format!("unknown encoding label {label:?}")))?;
        Ok(self)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}
