//! Contract checks for single-writer scheduler state.
//!
//! Violations are programmer errors, never runtime errors handed back to
//! the caller. `ContractPolicy` decides what a violation does: `Panic`
//! fails fast (default with debug assertions, so tests catch misuse);
//! `Warn` emits a `tracing` warning and lets the call proceed (default in
//! release builds).
//!
//! - `ThreadAffinity` records the thread that owns a piece of state and
//!   checks each entry point against it.
//! - `FlushGuard` is a reentrancy tracker: entering a flush while one is
//!   already running on the same owner is a violation. Embed it and guard
//!   flushes with `let _g = self.flush_guard.enter(policy);`.

use core::cell::Cell;
use std::thread::{self, ThreadId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ContractPolicy {
    Panic,
    Warn,
}

impl Default for ContractPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ContractPolicy::Panic
        } else {
            ContractPolicy::Warn
        }
    }
}

impl ContractPolicy {
    /// Report a violation of `contract` in `operation`.
    #[track_caller]
    pub fn violated(self, operation: &str, contract: &str) {
        match self {
            ContractPolicy::Panic => {
                panic!("contract violation in `{operation}`: {contract}")
            }
            ContractPolicy::Warn => {
                tracing::warn!(operation, contract, "contract violation")
            }
        }
    }
}

/// Owner-thread check for state that must only be touched from one thread.
#[derive(Debug)]
pub struct ThreadAffinity {
    owner: ThreadId,
    policy: ContractPolicy,
}

impl ThreadAffinity {
    /// Bind to the calling thread.
    pub fn current(policy: ContractPolicy) -> Self {
        Self {
            owner: thread::current().id(),
            policy,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn policy(&self) -> ContractPolicy {
        self.policy
    }

    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Returns whether the caller is on the owner thread; reports a violation if not.
    #[track_caller]
    pub fn check(&self, operation: &str) -> bool {
        let ok = self.is_owner();
        if !ok {
            self.policy
                .violated(operation, "called off the scheduler's work thread");
        }
        ok
    }
}

/// Per-owner flush depth tracker.
#[derive(Debug, Default)]
pub struct FlushGuard {
    depth: Cell<u32>,
}

impl FlushGuard {
    pub const fn new() -> Self {
        Self {
            depth: Cell::new(0),
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.depth.get() > 0
    }

    /// Enter a flush. A nested entry is reported through `policy`; under
    /// `Warn` it still proceeds.
    #[track_caller]
    pub fn enter(&self, policy: ContractPolicy) -> FlushToken<'_> {
        let d = self.depth.get();
        if d != 0 {
            policy.violated("flush", "nested flush from inside a running task");
        }
        self.depth.set(d + 1);
        FlushToken { owner: self }
    }
}

/// RAII token returned by `FlushGuard::enter`.
pub struct FlushToken<'a> {
    owner: &'a FlushGuard,
}

impl Drop for FlushToken<'_> {
    fn drop(&mut self) {
        let d = self.owner.depth.get();
        debug_assert!(d > 0);
        self.owner.depth.set(d.saturating_sub(1));
    }
}
