//! ThreadSafeMap: hash map guarded by one `ProtectedValue`.
//!
//! Every method is a single `read` or a single synchronous `write`, so
//! operations are atomic with respect to each other. Snapshot methods
//! (`entries`, `keys`, `values`) copy out under one read; they are not live
//! views. Compound logic that must be atomic goes through [`ThreadSafeMap::write`].

use crate::protected::ProtectedValue;
use core::borrow::Borrow;
use core::hash::Hash;
use hashbrown::HashMap;

pub struct ThreadSafeMap<K, V> {
    inner: ProtectedValue<HashMap<K, V>>,
}

impl<K, V> ThreadSafeMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: ProtectedValue::new(HashMap::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: ProtectedValue::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read(HashMap::len)
    }
    pub fn is_empty(&self) -> bool {
        self.inner.read(HashMap::is_empty)
    }

    /// Copy of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.inner.read(|m| m.get(key).cloned())
    }

    /// Insert or overwrite; returns the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.write(|m| m.insert(key, value))
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.write(|m| m.remove(key))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.read(|m| m.contains_key(key))
    }

    /// Mutate the value under `key` in place; `None` if absent.
    pub fn update<Q, R>(&self, key: &Q, f: impl FnOnce(&mut V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.write(|m| m.get_mut(key).map(f))
    }

    /// Return the value under `key`, inserting `make()` first if absent.
    /// `make` runs at most once and only when the key is missing.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        self.inner.write(|m| m.entry(key).or_insert_with(make).clone())
    }

    pub fn clear(&self) {
        self.inner.write(HashMap::clear)
    }

    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.inner
            .read(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.read(|m| m.keys().cloned().collect())
    }

    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.inner.read(|m| m.values().cloned().collect())
    }

    /// Shared access to the whole map for multi-step reads.
    pub fn read<R>(&self, f: impl FnOnce(&HashMap<K, V>) -> R) -> R {
        self.inner.read(f)
    }

    /// Exclusive access to the whole map; the closure runs as one atomic step.
    pub fn write<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        self.inner.write(f)
    }
}

impl<K, V> ThreadSafeMap<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Fire-and-forget insert; see [`ProtectedValue::write_async`].
    pub fn set_async(&self, key: K, value: V) {
        self.inner.write_async(move |m| {
            m.insert(key, value);
        })
    }

    pub fn remove_async(&self, key: K) {
        self.inner.write_async(move |m| {
            m.remove(&key);
        })
    }

    /// Wait for previously submitted async writes to land.
    pub fn flush_async_writes(&self) {
        self.inner.flush_async_writes()
    }
}

impl<K, V> Default for ThreadSafeMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ThreadSafeMap<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: ProtectedValue::new(iter.into_iter().collect()),
        }
    }
}

impl<K, V> core::fmt::Debug for ThreadSafeMap<K, V>
where
    K: core::fmt::Debug,
    V: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ThreadSafeMap").field(&self.inner).finish()
    }
}
