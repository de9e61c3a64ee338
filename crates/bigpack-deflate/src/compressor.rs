//! Pool-driven compressor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bigpack_common::{pending, Completion, Pending, WorkerPool};
use parking_lot::Mutex;

use crate::checksum::{adler32_combine, zlib_header, ADLER32_INIT};
use crate::codec::{deflate_part, inflate_exact, zlib_compress};
use crate::{Error, Result, MAX_LEVEL};

/// Input size of one partition.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// Inputs at least this large are compressed in partitions.
pub const PARTITION_THRESHOLD: usize = 12 * 1024 * 1024;

/// Immutable input shared between the caller and pool tasks.
///
/// Memory maps and vectors both qualify.
pub type SharedBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Compresses and decompresses payloads on a [`WorkerPool`].
pub struct Compressor<'p> {
    pool: &'p WorkerPool,
    abort: Arc<AtomicBool>,
}

impl<'p> Compressor<'p> {
    pub fn new(pool: &'p WorkerPool) -> Self {
        Self {
            pool,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share `abort` with queued tasks. Once it is set, tasks that have not
    /// started yet report [`bigpack_common::Error::TaskAborted`] instead of
    /// compressing.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Compress `data` into a zlib stream at `level` (`0..=10`).
    pub fn compress(&self, data: SharedBytes, level: u32) -> Pending<Result<Vec<u8>>> {
        self.compress_then(data, level, |result| result)
    }

    /// Compress `data` and pass the outcome to `finish` on the worker that
    /// produced it.
    pub fn compress_then<T, F>(&self, data: SharedBytes, level: u32, finish: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(Result<Vec<u8>>) -> T + Send + 'static,
    {
        if level > MAX_LEVEL {
            return Pending::ready(finish(Err(Error::InvalidLevel(level))));
        }

        let len = (*data).as_ref().len();
        if len < PARTITION_THRESHOLD {
            let abort = Arc::clone(&self.abort);
            return self.pool.submit(move || {
                if abort.load(Ordering::Acquire) {
                    return finish(Err(aborted()));
                }
                finish(zlib_compress((*data).as_ref(), level))
            });
        }

        let parts = len.div_ceil(PART_SIZE);
        tracing::debug!(len, parts, level, "compressing in partitions");

        let (completion, handle) = pending();
        let job = Arc::new(PartitionJob {
            data,
            level,
            parts,
            abort: Arc::clone(&self.abort),
            slots: Mutex::new((0..parts).map(|_| None).collect()),
            remaining: AtomicUsize::new(parts),
            finish: Mutex::new(Some((completion, finish))),
        });

        for index in 0..parts {
            let job = Arc::clone(&job);
            self.pool.spawn(move || job.run_part(index));
        }

        handle
    }

    /// Decompress a zlib stream whose decoded size is known exactly.
    ///
    /// Runs on the calling thread, which during extraction is already a
    /// pool worker.
    pub fn decompress(data: &[u8], expected: usize) -> Result<Vec<u8>> {
        inflate_exact(data, expected)
    }
}

type PartResult = Result<(Vec<u8>, u32)>;

fn aborted() -> Error {
    bigpack_common::Error::TaskAborted.into()
}

struct PartitionJob<T, F> {
    data: SharedBytes,
    level: u32,
    parts: usize,
    abort: Arc<AtomicBool>,
    slots: Mutex<Vec<Option<PartResult>>>,
    remaining: AtomicUsize,
    finish: Mutex<Option<(Completion<T>, F)>>,
}

impl<T, F> PartitionJob<T, F>
where
    F: FnOnce(Result<Vec<u8>>) -> T,
{
    fn part_range(&self, index: usize) -> (usize, usize) {
        let len = (*self.data).as_ref().len();
        let start = index * PART_SIZE;
        (start, (start + PART_SIZE).min(len))
    }

    fn run_part(&self, index: usize) {
        let (start, end) = self.part_range(index);
        let result = if self.abort.load(Ordering::Acquire) {
            Err(aborted())
        } else {
            let input = &(*self.data).as_ref()[start..end];
            deflate_part(input, self.level, index + 1 == self.parts)
        };

        self.slots.lock()[index] = Some(result);

        // The task finishing the last outstanding part assembles the stream.
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some((completion, finish)) = self.finish.lock().take() {
                completion.complete(finish(self.assemble()));
            }
        }
    }

    fn assemble(&self) -> Result<Vec<u8>> {
        let slots = std::mem::take(&mut *self.slots.lock());

        let mut parts = Vec::with_capacity(slots.len());
        for slot in slots {
            let part = slot.ok_or_else(|| Error::Zlib("partition missing at assembly".into()))??;
            parts.push(part);
        }

        let body_len: usize = parts.iter().map(|(bytes, _)| bytes.len()).sum();
        let mut output = Vec::with_capacity(2 + body_len + 4);
        output.extend_from_slice(&zlib_header(self.level));

        let mut check = ADLER32_INIT;
        for (index, (bytes, adler)) in parts.iter().enumerate() {
            let (start, end) = self.part_range(index);
            output.extend_from_slice(bytes);
            check = adler32_combine(check, *adler, end - start);
        }
        output.extend_from_slice(&check.to_be_bytes());

        Ok(output)
    }
}
