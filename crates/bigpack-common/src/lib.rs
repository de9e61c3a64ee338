//! Common utilities for bigpack.
//!
//! This crate provides the plumbing shared by every bigpack crate:
//!
//! - [`BinaryReader`] - A cursor over the little-endian records of an index
//! - [`crc`] - zlib CRC-32 over file contents
//! - [`WorkerPool`] / [`Pending`] - a fixed-size thread pool whose tasks
//!   hand their result back through an awaitable single-shot handle

mod error;
mod pool;
mod reader;

pub mod crc;

pub use error::{Error, Result};
pub use pool::{pending, Completion, Pending, WorkerPool};
pub use reader::BinaryReader;

