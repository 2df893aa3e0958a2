//! ReadWriteLock: closure-scoped concurrent reads and exclusive writes.
//!
//! Every access to the protected value happens inside a closure, so no
//! reference to the value can escape the critical section. Readers may
//! run in parallel; a writer excludes all readers and other writers.
//!
//! Hazard: there is no acquisition timeout. A writer that never returns
//! from its closure blocks every later reader and writer on the same lock
//! indefinitely. `try_read`/`try_write` exist for callers that must not
//! block, but the blocking paths are never bounded.

use parking_lot::RwLock;

/// Selects how a write is applied to a [`ProtectedValue`](crate::ProtectedValue).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum WriteMode {
    /// Block the caller until the mutation has been applied and return its result.
    #[default]
    Sync,
    /// Enqueue the mutation and return immediately; the result is discarded.
    Async,
}

impl WriteMode {
    /// `true` for [`WriteMode::Async`].
    pub fn is_async(self) -> bool {
        matches!(self, WriteMode::Async)
    }
}

/// Concurrent-read / exclusive-write lock over one value.
///
/// Not reentrant: calling `write` from inside a `read` or `write` closure
/// on the same lock deadlocks the calling thread.
#[derive(Debug, Default)]
pub struct ReadWriteLock<T: ?Sized> {
    inner: RwLock<T>,
}

impl<T> ReadWriteLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> ReadWriteLock<T> {
    /// Run `f` with shared access. May block while a write is in progress.
    #[inline]
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Run `f` with exclusive access (a barrier write) and return its result.
    #[inline]
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    /// Like [`read`](Self::read) but returns `None` instead of blocking.
    pub fn try_read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.inner.try_read()?;
        Some(f(&guard))
    }

    /// Like [`write`](Self::write) but returns `None` instead of blocking.
    pub fn try_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.inner.try_write()?;
        Some(f(&mut guard))
    }

    /// Direct access through `&mut self`; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
