//! WriteQueue: serial worker thread that applies queued writes in FIFO order.
//!
//! One queue may be shared by many [`ProtectedValue`](crate::ProtectedValue)s;
//! jobs from all of them run one at a time in submission order. Clones share
//! the same thread. When the last clone is dropped the thread drains what
//! is already queued and exits; it is never joined, so dropping a queue
//! from inside one of its own jobs is fine.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueInner {
    sender: Sender<Job>,
    thread_id: ThreadId,
}

#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<QueueInner>,
}

impl core::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("thread_id", &self.inner.thread_id)
            .field("queued", &self.inner.sender.len())
            .finish()
    }
}

impl WriteQueue {
    /// Spawn a queue whose worker thread is named `name`.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(name, receiver))?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                sender,
                thread_id: handle.thread().id(),
            }),
        })
    }

    /// Enqueue `job`. Fails only if the worker thread is gone.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.try_submit(Box::new(job)).map_err(|_| Error::Closed)
    }

    /// Enqueue `job`, handing it back if the worker thread is gone.
    pub(crate) fn try_submit(&self, job: Job) -> core::result::Result<(), Job> {
        self.inner.sender.send(job).map_err(|e| e.into_inner())
    }

    /// Block until every job submitted before this call has run.
    ///
    /// Returns `Error::Reentrant` when called from a job on this queue,
    /// since waiting would deadlock the worker.
    pub fn flush(&self) -> Result<()> {
        if self.is_worker_thread() {
            return Err(Error::Reentrant);
        }
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.submit(move || {
            let _ = done_tx.send(());
        })?;
        done_rx.recv().map_err(|_| Error::Closed)
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.sender.len()
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }
}

fn run(name: String, receiver: Receiver<Job>) {
    tracing::debug!(queue = %name, "write queue started");
    for job in receiver {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(queue = %name, "queued write panicked; continuing");
        }
    }
    tracing::debug!(queue = %name, "write queue stopped");
}
