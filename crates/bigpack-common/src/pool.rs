//! Fixed-size worker pool with awaitable task handles.
//!
//! Tasks run on a dedicated rayon pool and report back through a bounded
//! crossbeam channel of capacity one. The orchestrating thread collects the
//! returned [`Pending`] handles and waits on them in whatever order it needs,
//! which is how build output stays in index order while work completes in
//! any order.

use crossbeam_channel::{Receiver, Sender};

use crate::{Error, Result};

/// A pool of worker threads created once per top-level archive operation.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Create a pool with `threads` workers. Zero selects the number of
    /// logical cores.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bigpack-worker-{i}"))
            .panic_handler(|_| tracing::error!("worker task panicked"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        tracing::debug!(threads = pool.current_num_threads(), "worker pool started");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    #[inline]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` on the pool and return a handle to its result.
    pub fn submit<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (completion, handle) = pending();
        self.pool.spawn(move || completion.complete(task()));
        handle
    }

    /// Run `task` on the pool without a result handle.
    ///
    /// Used when the task completes a [`Completion`] it owns itself.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(task);
    }
}

/// Create a linked completion/handle pair.
pub fn pending<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (Completion { tx }, Pending { rx })
}

/// The producing half of a [`Pending`] handle.
pub struct Completion<T> {
    tx: Sender<T>,
}

impl<T> Completion<T> {
    /// Deliver the result. Dropping a completion without calling this makes
    /// the paired handle report [`Error::TaskAborted`].
    pub fn complete(self, value: T) {
        // The receiver may already be gone if the caller gave up.
        let _ = self.tx.send(value);
    }
}

/// An awaitable, single-shot task result.
#[must_use = "a pending result does nothing unless waited on"]
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// A handle that is already resolved.
    pub fn ready(value: T) -> Self {
        let (completion, handle) = pending();
        completion.complete(value);
        handle
    }

    /// Block until the result is available.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| Error::TaskAborted)
    }
}
