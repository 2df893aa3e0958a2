//! rw-guard: reader/writer-guarded values and containers, plus a
//! gap/debounce task scheduler.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: make every container operation one atomic unit, built from a
//!   single primitive so the locking story is told once.
//! - Layers:
//!   - ReadWriteLock<T>: closure-scoped shared/exclusive access over
//!     `parking_lot::RwLock`. Readers run concurrently; a writer excludes
//!     everything else.
//!   - WriteQueue: a named serial thread that applies fire-and-forget
//!     writes in submission order.
//!   - ProtectedValue<T>: one value behind a ReadWriteLock, with optional
//!     async writes routed to a WriteQueue.
//!   - Containers: ThreadSafeMap, ThreadSafeList, and the weak variants
//!     (ThreadSafeWeakList, ThreadSafeWeakMap, ThreadSafeIdentitySet), each
//!     a thin API over one ProtectedValue.
//!   - Scheduler: a pure state machine (`SchedulerCore`) driven either by
//!     its owner thread (`LocalScheduler`) or by a private worker thread
//!     (`WorkerScheduler`).
//!
//! Constraints
//! - Every public container operation holds the lock for the whole
//!   operation; reads return owned copies or strong handles, never
//!   references into the guarded structure.
//! - Closures passed to `read`/`write` run under the lock. Calling back
//!   into the same value from inside them deadlocks; there is no timeout.
//! - Weak containers never keep a referent alive. Identity is the
//!   allocation address, never `Eq`.
//! - Scheduler state has exactly one writer, its work context. It needs no
//!   lock; misuse is reported through `ContractPolicy`.
//!
//! Async writes
//! - FIFO among async writes on one queue; not ordered against sync
//!   writes issued in between.
//! - A queued write whose value lost every handle first is silently discarded.
//!
//! Errors
//! - Container operations are infallible; absence is `None`/`false`.
//! - Only thread plumbing fails: spawning a worker, talking to a worker
//!   that has shut down, or blocking on a worker from its own thread
//!   (`Error`).
//!
//! Logging
//! - `tracing` events only; the crate never installs a subscriber.

pub mod contract;
pub mod error;
pub mod identity_set;
pub mod list;
pub mod map;
pub mod protected;
pub mod rw_lock;
pub mod scheduler;
pub mod weak_list;
pub mod weak_map;
pub mod weak_ref;
pub mod write_queue;

// Public surface
pub use contract::ContractPolicy;
pub use error::{Error, Result};
pub use identity_set::ThreadSafeIdentitySet;
pub use list::{DuplicatePolicy, ThreadSafeList};
pub use map::ThreadSafeMap;
pub use protected::{ProtectedValue, ThreadSafe};
pub use rw_lock::{ReadWriteLock, WriteMode};
pub use scheduler::{
    LocalScheduler, Marshalling, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerState,
    WorkerScheduler,
};
pub use weak_list::ThreadSafeWeakList;
pub use weak_map::ThreadSafeWeakMap;
pub use weak_ref::WeakRef;
pub use write_queue::WriteQueue;
