//! State-change listeners: explicit registration instead of property observation.
//!
//! Listeners are stored in a `SlotMap` behind a `ProtectedValue`; the key
//! returned by `add` removes the listener again. Notification snapshots the
//! listener set under a read and calls each one after the lock is released,
//! so a listener may add or remove listeners.

use crate::protected::ProtectedValue;
use crate::scheduler::machine::SchedulerState;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Handle for a registered state listener.
    pub struct ListenerKey;
}

pub type Listener = Arc<dyn Fn(SchedulerState) + Send + Sync + 'static>;

#[derive(Default)]
pub struct StateListeners {
    inner: ProtectedValue<SlotMap<ListenerKey, Listener>>,
}

impl StateListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl Fn(SchedulerState) + Send + Sync + 'static) -> ListenerKey {
        let listener: Listener = Arc::new(listener);
        self.inner.write(|m| m.insert(listener))
    }

    pub fn remove(&self, key: ListenerKey) -> bool {
        self.inner.write(|m| m.remove(key).is_some())
    }

    pub fn len(&self) -> usize {
        self.inner.read(SlotMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read(SlotMap::is_empty)
    }

    pub fn notify(&self, state: SchedulerState) {
        let snapshot: Vec<Listener> = self.inner.read(|m| m.values().cloned().collect());
        for listener in snapshot {
            listener(state);
        }
    }

    /// Notify only when `before != after`.
    pub fn transition(&self, before: SchedulerState, after: SchedulerState) {
        if before != after {
            tracing::trace!(?before, ?after, "scheduler state changed");
            self.notify(after);
        }
    }
}

impl core::fmt::Debug for StateListeners {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateListeners")
            .field("len", &self.len())
            .finish()
    }
}
