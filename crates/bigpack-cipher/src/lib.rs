//! Obfuscation stream for `.big` archives.
//!
//! Every byte of an archive is read and written through a [`CipherStream`].
//! A stream is either plain or obfuscated with an additive keystream whose
//! derivation depends on where the key block sits in the file:
//!
//! - Read streams memory-map the file; [`StreamState::ReadUnknown`] picks
//!   plain or encrypted by sniffing the `_ARCHIVE` magic.
//! - Write streams own a read/write file handle. An encrypted writer emits
//!   its header and index in the clear first, then calls
//!   [`CipherStream::write_key`] once the key anchor is known, and finally
//!   [`CipherStream::write_encryption_end`] to record where the key lives.
//!
//! The cipher is an obfuscation layer, not a security boundary.
//!
//! # Example
//!
//! ```no_run
//! use bigpack_cipher::{CipherStream, StreamState};
//!
//! let mut stream = CipherStream::open("Music.big", StreamState::ReadUnknown, None)?;
//! let mut magic = [0u8; 8];
//! stream.read_exact(&mut magic)?;
//! println!("encrypted: {}", stream.state() == StreamState::ReadEncrypted);
//! # Ok::<(), bigpack_cipher::Error>(())
//! ```

mod error;
mod keystream;
mod stream;

pub use error::{Error, Result};
pub use keystream::{derive_keystream, FRESH_KEY_SENTINEL, KEY_BLOCK_MARKER, KEY_SIZE};
pub use stream::{CipherStream, StreamState, ARCHIVE_MAGIC};
