//! ThreadSafeIdentitySet: set of weakly held objects keyed by reference identity.
//!
//! Layout
//! - `IdentityTable<T>`: single-threaded structure. Entries live in a
//!   `SlotMap` (stable generational keys); a `hashbrown::HashTable` indexes
//!   slot keys by the hash of the referent's address. Each entry stores its
//!   precomputed hash so removal never rehashes.
//! - `ThreadSafeIdentitySet<T>`: the table behind one `ProtectedValue`.
//!
//! Identity
//! - Two `Arc`s are the same member iff they point at the same allocation.
//!   `T: Eq/Hash` is never consulted (and not required).
//! - A dead entry keeps its allocation reserved through its `Weak`, so a new
//!   `Arc` can never share its address; stale entries therefore cannot
//!   produce false positives, only extra slots until the next purge.
//! - `insert` purges only when the slot count reaches a watermark, which is
//!   then reset to twice the surviving count. Purge cost stays amortized
//!   O(1) per insert.

use crate::protected::ProtectedValue;
use crate::weak_ref::WeakRef;
use core::hash::BuildHasher;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;
use std::sync::Arc;

const MIN_PURGE_AT: usize = 16;

struct Entry<T: ?Sized> {
    member: WeakRef<T>,
    hash: u64,
}

struct IdentityTable<T: ?Sized, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<T>>,
    purge_at: usize,
}

fn addr_of<T: ?Sized>(target: &Arc<T>) -> usize {
    Arc::as_ptr(target).cast::<()>() as usize
}

impl<T: ?Sized, S: BuildHasher> IdentityTable<T, S> {
    fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
            purge_at: MIN_PURGE_AT,
        }
    }

    fn find(&self, addr: usize) -> Option<DefaultKey> {
        let hash = self.hasher.hash_one(addr);
        let slots = &self.slots;
        self.index
            .find(hash, |&k| slots.get(k).is_some_and(|e| e.member.addr() == addr))
            .copied()
    }

    fn insert(&mut self, target: &Arc<T>) -> bool {
        let addr = addr_of(target);
        let hash = self.hasher.hash_one(addr);
        let slots = &mut self.slots;
        match self.index.entry(
            hash,
            |&k| slots.get(k).is_some_and(|e| e.member.addr() == addr),
            |&k| slots.get(k).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => false,
            hashbrown::hash_table::Entry::Vacant(v) => {
                let k = slots.insert(Entry {
                    member: WeakRef::new(target),
                    hash,
                });
                let _ = v.insert(k);
                true
            }
        }
    }

    fn remove_key(&mut self, k: DefaultKey) -> Option<Entry<T>> {
        let entry = self.slots.remove(k)?;
        if let Ok(occupied) = self.index.find_entry(entry.hash, |&kk| kk == k) {
            occupied.remove();
        }
        Some(entry)
    }

    fn purge(&mut self) -> usize {
        let dead: Vec<DefaultKey> = self
            .slots
            .iter()
            .filter(|(_, e)| !e.member.is_alive())
            .map(|(k, _)| k)
            .collect();
        for &k in &dead {
            self.remove_key(k);
        }
        self.purge_at = MIN_PURGE_AT.max(self.slots.len() * 2);
        dead.len()
    }

    fn purge_if_due(&mut self) {
        if self.slots.len() >= self.purge_at {
            self.purge();
        }
    }

    fn live(&self) -> impl Iterator<Item = &WeakRef<T>> {
        self.slots
            .values()
            .map(|e| &e.member)
            .filter(|w| w.is_alive())
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.purge_at = MIN_PURGE_AT;
    }
}

pub struct ThreadSafeIdentitySet<T: ?Sized, S = RandomState> {
    inner: ProtectedValue<IdentityTable<T, S>>,
}

impl<T: ?Sized> ThreadSafeIdentitySet<T> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<T: ?Sized, S: BuildHasher> ThreadSafeIdentitySet<T, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            inner: ProtectedValue::new(IdentityTable::with_hasher(hasher)),
        }
    }

    /// Add `target`; `false` if the same allocation is already a member.
    pub fn insert(&self, target: &Arc<T>) -> bool {
        self.inner.write(|t| {
            t.purge_if_due();
            t.insert(target)
        })
    }

    pub fn contains(&self, target: &Arc<T>) -> bool {
        let addr = addr_of(target);
        self.inner.read(|t| t.find(addr).is_some())
    }

    /// Remove `target`; `true` if it was a member.
    pub fn remove(&self, target: &Arc<T>) -> bool {
        let addr = addr_of(target);
        self.inner
            .write(|t| t.find(addr).and_then(|k| t.remove_key(k)).is_some())
    }

    /// Number of live members.
    pub fn len(&self) -> usize {
        self.inner.read(|t| t.live().count())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read(|t| t.live().next().is_none())
    }

    /// Number of stored slots, dead ones included.
    pub fn slot_count(&self) -> usize {
        self.inner.read(|t| t.slots.len())
    }

    /// Snapshot of live members, in no particular order.
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.inner
            .read(|t| t.slots.values().filter_map(|e| e.member.upgrade()).collect())
    }

    pub fn compact(&self) -> usize {
        self.inner.write(IdentityTable::purge)
    }

    pub fn clear(&self) {
        self.inner.write(IdentityTable::clear)
    }
}

impl<T: ?Sized> Default for ThreadSafeIdentitySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized, S> core::fmt::Debug for ThreadSafeIdentitySet<T, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slots = self.inner.try_read(|t| t.slots.len());
        f.debug_struct("ThreadSafeIdentitySet")
            .field("slots", &slots)
            .finish()
    }
}
