//! The position-addressed cipher stream.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bigpack_common::BinaryReader;
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::keystream::{derive_keystream, FRESH_KEY_SENTINEL, KEY_BLOCK_MARKER, KEY_SIZE};
use crate::{Error, Result};

/// Magic tag at the start of every unobfuscated archive.
pub const ARCHIVE_MAGIC: &[u8; 8] = b"_ARCHIVE";

/// Mode of a [`CipherStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Read mode, plain or encrypted decided by sniffing the magic.
    ReadUnknown,
    ReadEncrypted,
    ReadPlain,
    WriteEncrypted,
    WritePlain,
}

impl StreamState {
    /// Whether the stream was opened for reading.
    #[inline]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            StreamState::ReadUnknown | StreamState::ReadEncrypted | StreamState::ReadPlain
        )
    }

    /// Whether bytes pass through the keystream.
    #[inline]
    pub const fn is_encrypted(self) -> bool {
        matches!(self, StreamState::ReadEncrypted | StreamState::WriteEncrypted)
    }
}

enum Medium {
    Mapped(Mmap),
    Handle(File),
}

/// A random-access byte stream over a plain or obfuscated archive file.
///
/// Read streams are backed by a memory map and support concurrent positional
/// reads through [`read_at`](Self::read_at) and [`view_at`](Self::view_at).
/// Write streams own a file handle and are driven by a single thread.
pub struct CipherStream {
    path: PathBuf,
    medium: Medium,
    state: StreamState,
    position: u64,
    key: Vec<u8>,
    keystream: Vec<u8>,
    anchor: Option<u32>,
}

impl CipherStream {
    /// Open `path` in the given state.
    ///
    /// `key_seed` seeds the key generator of a [`StreamState::WriteEncrypted`]
    /// stream; without it the key comes from OS entropy. Passing a seed for
    /// any other state is rejected.
    pub fn open<P: AsRef<Path>>(path: P, state: StreamState, key_seed: Option<u64>) -> Result<Self> {
        let path = path.as_ref();

        if key_seed.is_some() && state != StreamState::WriteEncrypted {
            return Err(Error::OutOfRange(format!(
                "a key seed only applies to encrypted writers, not {state:?}"
            )));
        }

        match state {
            StreamState::ReadUnknown | StreamState::ReadEncrypted | StreamState::ReadPlain => {
                Self::open_read(path, state)
            }
            StreamState::WriteEncrypted => Self::create(path, state, generate_key(key_seed)),
            StreamState::WritePlain => Self::create(path, state, Vec::new()),
        }
    }

    /// Create an encrypted writer that uses `key` as its raw file key.
    ///
    /// The key length must be a non-zero multiple of 4 that fits in a u16.
    pub fn create_with_key<P: AsRef<Path>>(path: P, key: Vec<u8>) -> Result<Self> {
        if !valid_key_len(key.len()) {
            return Err(Error::OutOfRange(format!("invalid key length {}", key.len())));
        }
        Self::create(path.as_ref(), StreamState::WriteEncrypted, key)
    }

    fn open_read(path: &Path, requested: StreamState) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;

        let state = match requested {
            StreamState::ReadUnknown if mmap.starts_with(ARCHIVE_MAGIC) => StreamState::ReadPlain,
            StreamState::ReadUnknown => StreamState::ReadEncrypted,
            other => other,
        };

        let (key, keystream, anchor) = if state == StreamState::ReadEncrypted {
            let (key, anchor) = locate_key(&mmap)?;
            let keystream = derive_keystream(&key, anchor);
            (key, keystream, Some(anchor))
        } else {
            (Vec::new(), Vec::new(), None)
        };

        tracing::debug!(path = %path.display(), ?state, "opened archive stream");

        Ok(Self {
            path: path.to_path_buf(),
            medium: Medium::Mapped(mmap),
            state,
            position: 0,
            key,
            keystream,
            anchor,
        })
    }

    fn create(path: &Path, state: StreamState, key: Vec<u8>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        // Until the anchor is known the keystream is the identity.
        let keystream = vec![0u8; key.len()];

        Ok(Self {
            path: path.to_path_buf(),
            medium: Medium::Handle(file),
            state,
            position: 0,
            key,
            keystream,
            anchor: None,
        })
    }

    /// The resolved stream state.
    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Path of the underlying file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current stream position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the stream position.
    #[inline]
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Position of the key block, once known.
    #[inline]
    pub fn anchor(&self) -> Option<u32> {
        self.anchor
    }

    /// Current length of the underlying file.
    pub fn len(&self) -> Result<u64> {
        match &self.medium {
            Medium::Mapped(mmap) => Ok(mmap.len() as u64),
            Medium::Handle(file) => file
                .metadata()
                .map(|m| m.len())
                .map_err(|e| Error::io(&self.path, e)),
        }
    }

    /// Whether the underlying file is empty.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Read up to `dst.len()` bytes at the current position and advance.
    ///
    /// Returns the number of bytes read, which is short only at end of file.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let position = self.position;
        let n = match &self.medium {
            Medium::Mapped(mmap) => copy_from_map(mmap, position, dst),
            Medium::Handle(file) => read_from_handle(file, &self.path, position, dst)?,
        };

        self.decrypt(position, &mut dst[..n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Read exactly `dst.len()` bytes at the current position and advance.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        let position = self.position;
        let n = self.read(dst)?;
        if n != dst.len() {
            return Err(short_read(position, dst.len(), n));
        }
        Ok(())
    }

    /// Read up to `dst.len()` bytes at `position` without moving the stream.
    ///
    /// Only available on read streams.
    pub fn read_at(&self, position: u64, dst: &mut [u8]) -> Result<usize> {
        let mmap = self.mapped("positional read")?;
        let n = copy_from_map(mmap, position, dst);
        self.decrypt(position, &mut dst[..n]);
        Ok(n)
    }

    /// Read exactly `dst.len()` bytes at `position`.
    pub fn read_exact_at(&self, position: u64, dst: &mut [u8]) -> Result<()> {
        let n = self.read_at(position, dst)?;
        if n != dst.len() {
            return Err(short_read(position, dst.len(), n));
        }
        Ok(())
    }

    /// Borrow `len` bytes at `position`.
    ///
    /// Plain streams hand out a slice of the mapping; encrypted streams
    /// return a decrypted copy.
    pub fn view_at(&self, position: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let mmap = self.mapped("positional view")?;
        let start = usize::try_from(position).unwrap_or(usize::MAX);
        let end = start.checked_add(len).filter(|&end| end <= mmap.len());
        let Some(end) = end else {
            return Err(short_read(position, len, mmap.len().saturating_sub(start)));
        };

        if self.state.is_encrypted() {
            let mut owned = mmap[start..end].to_vec();
            self.decrypt(position, &mut owned);
            Ok(Cow::Owned(owned))
        } else {
            Ok(Cow::Borrowed(&mmap[start..end]))
        }
    }

    /// Write `src` at the current position and advance.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        if self.state.is_read() {
            return Err(Error::OutOfRange(format!("write on {:?} stream", self.state)));
        }

        if self.state.is_encrypted() {
            let position = self.position;
            let keystream = &self.keystream;
            let len = keystream.len() as u64;
            let encrypted: Vec<u8> = src
                .iter()
                .enumerate()
                .map(|(i, &b)| b.wrapping_sub(keystream[((position + i as u64) % len) as usize]))
                .collect();
            self.write_raw(&encrypted)
        } else {
            self.write_raw(src)
        }
    }

    /// Write the key block at the current position and switch to the
    /// keystream anchored there.
    pub fn write_key(&mut self) -> Result<()> {
        if self.state != StreamState::WriteEncrypted || self.anchor.is_some() {
            return Err(Error::OutOfRange(format!(
                "write_key on {:?} stream (anchor {:?})",
                self.state, self.anchor
            )));
        }

        let anchor = u32::try_from(self.position)
            .map_err(|_| Error::OutOfRange(format!("key anchor {} exceeds u32", self.position)))?;

        let mut block = Vec::with_capacity(6 + self.key.len());
        block.extend_from_slice(&KEY_BLOCK_MARKER.to_le_bytes());
        block.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        block.extend_from_slice(&self.key);
        self.write_raw(&block)?;

        self.keystream = derive_keystream(&self.key, anchor);
        self.anchor = Some(anchor);

        tracing::debug!(anchor, key_size = self.key.len(), "wrote key block");
        Ok(())
    }

    /// Append the trailer pointing back at the key block.
    pub fn write_encryption_end(&mut self) -> Result<()> {
        let Some(anchor) = self.anchor.filter(|_| self.state == StreamState::WriteEncrypted) else {
            return Err(Error::OutOfRange(format!(
                "write_encryption_end on {:?} stream without a key block",
                self.state
            )));
        };

        let end = self.len()?;
        let back = u32::try_from(end + 4 - anchor as u64)
            .map_err(|_| Error::OutOfRange(format!("key block {} bytes from end", end + 4)))?;

        self.position = end;
        self.write_raw(&back.to_le_bytes())
    }

    /// Flush file contents to disk.
    pub fn sync(&mut self) -> Result<()> {
        match &mut self.medium {
            Medium::Mapped(_) => Ok(()),
            Medium::Handle(file) => file
                .flush()
                .and_then(|_| file.sync_data())
                .map_err(|e| Error::io(&self.path, e)),
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let Medium::Handle(file) = &mut self.medium else {
            return Err(Error::OutOfRange("write on mapped stream".into()));
        };

        file.seek(SeekFrom::Start(self.position))
            .and_then(|_| file.write_all(bytes))
            .map_err(|e| Error::io(&self.path, e))?;

        self.position += bytes.len() as u64;
        Ok(())
    }

    fn mapped(&self, what: &str) -> Result<&Mmap> {
        match &self.medium {
            Medium::Mapped(mmap) => Ok(mmap),
            Medium::Handle(_) => Err(Error::OutOfRange(format!(
                "{what} on {:?} stream",
                self.state
            ))),
        }
    }

    #[inline]
    fn decrypt(&self, position: u64, buf: &mut [u8]) {
        if !self.state.is_encrypted() || self.keystream.is_empty() {
            return;
        }

        let len = self.keystream.len() as u64;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = b.wrapping_add(self.keystream[((position + i as u64) % len) as usize]);
        }
    }
}

impl std::fmt::Debug for CipherStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherStream")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("position", &self.position)
            .field("anchor", &self.anchor)
            .finish_non_exhaustive()
    }
}

fn generate_key(seed: Option<u64>) -> Vec<u8> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut key = vec![0u8; KEY_SIZE];
    key[..4].copy_from_slice(&FRESH_KEY_SENTINEL.to_le_bytes());
    rng.fill_bytes(&mut key[4..]);
    key
}

#[inline]
fn valid_key_len(len: usize) -> bool {
    len > 0 && len % 4 == 0 && len <= u16::MAX as usize
}

/// Find the key block through the trailer and return the raw key and anchor.
fn locate_key(data: &[u8]) -> Result<(Vec<u8>, u32)> {
    if data.len() < 4 {
        return Err(Error::Format(format!(
            "{} bytes is too short for an encrypted archive",
            data.len()
        )));
    }

    let back = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
    let anchor = data
        .len()
        .checked_sub(back)
        .ok_or_else(|| Error::Format(format!("key block offset {back} before start of file")))?;
    let anchor_u32 =
        u32::try_from(anchor).map_err(|_| Error::Format(format!("key anchor {anchor} exceeds u32")))?;

    let mut reader = BinaryReader::new_at(data, anchor);
    let malformed = |e: bigpack_common::Error| Error::Format(e.to_string());

    let marker = reader.read_u32().map_err(malformed)?;
    if marker != KEY_BLOCK_MARKER {
        tracing::debug!("unexpected key block marker {marker:#010x}");
    }

    let key_size = reader.read_u16().map_err(malformed)? as usize;
    if !valid_key_len(key_size) {
        return Err(Error::Format(format!("invalid key size {key_size}")));
    }
    let key = reader.read_bytes(key_size).map_err(malformed)?.to_vec();

    if LittleEndian::read_u32(&key) == FRESH_KEY_SENTINEL {
        return Err(Error::Fatal);
    }

    Ok((key, anchor_u32))
}

fn copy_from_map(mmap: &[u8], position: u64, dst: &mut [u8]) -> usize {
    let start = usize::try_from(position).unwrap_or(usize::MAX).min(mmap.len());
    let n = dst.len().min(mmap.len() - start);
    dst[..n].copy_from_slice(&mmap[start..start + n]);
    n
}

fn read_from_handle(mut file: &File, path: &Path, position: u64, dst: &mut [u8]) -> Result<usize> {
    file.seek(SeekFrom::Start(position))
        .map_err(|e| Error::io(path, e))?;

    let mut filled = 0;
    while filled < dst.len() {
        match file.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        }
    }
    Ok(filled)
}

fn short_read(position: u64, wanted: usize, got: usize) -> Error {
    Error::Format(format!(
        "unexpected end of stream at {position}: wanted {wanted} bytes, got {got}"
    ))
}
