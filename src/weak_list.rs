//! ThreadSafeWeakList: insertion-ordered list of non-owning references.
//!
//! An entry whose referent has been released elsewhere is logically absent:
//! it never counts towards `len`, never matches `contains`, and is skipped
//! by enumeration. Its slot is reclaimed by `compact`, or in a batch by the
//! insert that brings the slot count to the purge watermark. After each
//! purge the watermark is twice the surviving count.
//!
//! Strong handles created while the lock is held (to run a predicate or to
//! build a snapshot) are released only after the lock is dropped, so a
//! referent's `Drop` never runs inside this list's critical section.

use crate::list::DuplicatePolicy;
use crate::protected::ProtectedValue;
use crate::weak_ref::WeakRef;
use std::sync::Arc;

const MIN_PURGE_AT: usize = 16;

pub struct ThreadSafeWeakList<T: ?Sized> {
    inner: ProtectedValue<Slots<T>>,
    policy: DuplicatePolicy,
}

struct Slots<T: ?Sized> {
    items: Vec<WeakRef<T>>,
    purge_at: usize,
}

impl<T: ?Sized> Slots<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            purge_at: MIN_PURGE_AT,
        }
    }

    fn purge(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(WeakRef::is_alive);
        self.purge_at = MIN_PURGE_AT.max(self.items.len() * 2);
        before - self.items.len()
    }

    fn purge_if_due(&mut self) {
        if self.items.len() >= self.purge_at {
            self.purge();
        }
    }

    fn live(&self) -> impl Iterator<Item = &WeakRef<T>> {
        self.items.iter().filter(|w| w.is_alive())
    }
}

impl<T: ?Sized> ThreadSafeWeakList<T> {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            inner: ProtectedValue::new(Slots::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read(|slots| slots.live().count())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read(|slots| slots.live().next().is_none())
    }

    /// Number of stored slots, dead ones included.
    pub fn slot_count(&self) -> usize {
        self.inner.read(|slots| slots.items.len())
    }

    /// Append a weak reference to `target`. Under `Reject`, returns `false`
    /// when `target` (by identity) is already present.
    pub fn append(&self, target: &Arc<T>) -> bool {
        self.insert_at(usize::MAX, target)
    }

    /// Insert among live entries at `index` (clamped to the end).
    pub fn insert(&self, index: usize, target: &Arc<T>) -> bool {
        self.insert_at(index, target)
    }

    fn insert_at(&self, index: usize, target: &Arc<T>) -> bool {
        let policy = self.policy;
        self.inner.write(|slots| {
            slots.purge_if_due();
            if !policy.allows_duplicates() && slots.live().any(|w| w.points_to(target)) {
                return false;
            }
            let at = slots
                .items
                .iter()
                .enumerate()
                .filter(|(_, w)| w.is_alive())
                .nth(index)
                .map_or(slots.items.len(), |(pos, _)| pos);
            slots.items.insert(at, WeakRef::new(target));
            true
        })
    }

    /// Identity membership among live entries.
    pub fn contains(&self, target: &Arc<T>) -> bool {
        self.inner
            .read(|slots| slots.live().any(|w| w.points_to(target)))
    }

    /// The `index`-th live entry.
    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.inner
            .read(|slots| slots.live().nth(index).and_then(WeakRef::upgrade))
    }

    /// Remove the first entry pointing at `target`. Returns `true` if found.
    pub fn remove(&self, target: &Arc<T>) -> bool {
        self.inner.write(|slots| {
            match slots.items.iter().position(|w| w.points_to(target)) {
                Some(pos) => {
                    slots.items.remove(pos);
                    true
                }
                None => false,
            }
        })
    }

    /// Remove and return the first live entry whose referent matches `pred`.
    pub fn remove_first_match(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let (found, _scratch) = self.inner.write(|slots| {
            let mut scratch = Vec::new();
            let mut hit = None;
            for (pos, w) in slots.items.iter().enumerate() {
                let Some(strong) = w.upgrade() else { continue };
                if pred(&strong) {
                    hit = Some((pos, strong));
                    break;
                }
                scratch.push(strong);
            }
            let found = hit.map(|(pos, strong)| {
                slots.items.remove(pos);
                strong
            });
            (found, scratch)
        });
        found
    }

    /// Snapshot of live referents in insertion order.
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.inner
            .read(|slots| slots.items.iter().filter_map(WeakRef::upgrade).collect())
    }

    /// Visit live referents in insertion order. The callback runs after
    /// the lock is released, so it may call back into this list.
    pub fn for_each_live(&self, mut f: impl FnMut(&T)) {
        for item in self.entries() {
            f(&item);
        }
    }

    /// Drop slots whose referent is gone; returns how many were purged.
    pub fn compact(&self) -> usize {
        self.inner.write(Slots::purge)
    }

    pub fn clear(&self) {
        self.inner.write(|slots| *slots = Slots::new())
    }
}

impl<T: ?Sized> Default for ThreadSafeWeakList<T> {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl<T: ?Sized> core::fmt::Debug for ThreadSafeWeakList<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slots = self.inner.try_read(|s| s.items.len());
        f.debug_struct("ThreadSafeWeakList")
            .field("policy", &self.policy)
            .field("slots", &slots)
            .finish()
    }
}
