//! ThreadSafeWeakMap: keyed map whose values are non-owning references.
//!
//! A key whose value has been released elsewhere is logically absent.
//! Dead entries are reclaimed by the next `set`/`remove` or by `compact`.

use crate::protected::ProtectedValue;
use crate::weak_ref::WeakRef;
use core::borrow::Borrow;
use core::hash::Hash;
use hashbrown::HashMap;
use std::sync::Arc;

pub struct ThreadSafeWeakMap<K, V: ?Sized> {
    inner: ProtectedValue<HashMap<K, WeakRef<V>>>,
}

fn purge<K, V: ?Sized>(m: &mut HashMap<K, WeakRef<V>>) -> usize {
    let before = m.len();
    m.retain(|_, w| w.is_alive());
    before - m.len()
}

impl<K, V> ThreadSafeWeakMap<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    pub fn new() -> Self {
        Self {
            inner: ProtectedValue::new(HashMap::new()),
        }
    }

    /// Strong handle to the live value under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.read(|m| m.get(key).and_then(WeakRef::upgrade))
    }

    /// Store a weak reference to `value`; returns the previous live value.
    pub fn set(&self, key: K, value: &Arc<V>) -> Option<Arc<V>> {
        self.inner.write(|m| {
            purge(m);
            m.insert(key, WeakRef::new(value))
                .and_then(|old| old.upgrade())
        })
    }

    /// Remove `key`; returns its value if it was still live.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.write(|m| {
            let old = m.remove(key).and_then(|w| w.upgrade());
            purge(m);
            old
        })
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner
            .read(|m| m.get(key).is_some_and(WeakRef::is_alive))
    }

    pub fn len(&self) -> usize {
        self.inner
            .read(|m| m.values().filter(|w| w.is_alive()).count())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read(|m| !m.values().any(WeakRef::is_alive))
    }

    /// Number of stored entries, dead ones included.
    pub fn slot_count(&self) -> usize {
        self.inner.read(HashMap::len)
    }

    pub fn entries(&self) -> Vec<(K, Arc<V>)>
    where
        K: Clone,
    {
        self.inner.read(|m| {
            m.iter()
                .filter_map(|(k, w)| Some((k.clone(), w.upgrade()?)))
                .collect()
        })
    }

    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.read(|m| {
            m.iter()
                .filter(|(_, w)| w.is_alive())
                .map(|(k, _)| k.clone())
                .collect()
        })
    }

    pub fn compact(&self) -> usize {
        self.inner.write(purge)
    }

    pub fn clear(&self) {
        self.inner.write(HashMap::clear)
    }
}

impl<K, V> Default for ThreadSafeWeakMap<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: core::fmt::Debug, V: ?Sized> core::fmt::Debug for ThreadSafeWeakMap<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ThreadSafeWeakMap").field(&self.inner).finish()
    }
}
