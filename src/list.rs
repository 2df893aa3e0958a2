//! ThreadSafeList: ordered list guarded by one `ProtectedValue`.

use crate::protected::ProtectedValue;

/// Whether list containers accept an element already present.
///
/// Strong lists compare with `PartialEq`; weak lists compare by reference
/// identity. Fixed at construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum DuplicatePolicy {
    #[default]
    Allow,
    Reject,
}

impl DuplicatePolicy {
    pub fn from_allow_duplicates(allow: bool) -> Self {
        if allow {
            DuplicatePolicy::Allow
        } else {
            DuplicatePolicy::Reject
        }
    }

    pub fn allows_duplicates(self) -> bool {
        matches!(self, DuplicatePolicy::Allow)
    }
}

pub struct ThreadSafeList<T> {
    inner: ProtectedValue<Vec<T>>,
    policy: DuplicatePolicy,
}

impl<T> ThreadSafeList<T> {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            inner: ProtectedValue::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.inner.read(Vec::len)
    }
    pub fn is_empty(&self) -> bool {
        self.inner.read(Vec::is_empty)
    }

    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.inner.read(|v| v.get(index).cloned())
    }

    pub fn first(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.read(|v| v.first().cloned())
    }

    pub fn last(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.read(|v| v.last().cloned())
    }

    /// Replace the element at `index`, returning the old one. Out of range
    /// returns `None` and drops `value`. The duplicate policy is not consulted.
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        self.inner
            .write(|v| v.get_mut(index).map(|slot| core::mem::replace(slot, value)))
    }

    pub fn remove(&self, index: usize) -> Option<T> {
        self.inner
            .write(|v| (index < v.len()).then(|| v.remove(index)))
    }

    /// Remove and return the first element matching `pred`.
    pub fn remove_first_match(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        self.inner.write(|v| {
            let pos = v.iter().position(|e| pred(e))?;
            Some(v.remove(pos))
        })
    }

    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.inner.read(|v| v.iter().position(pred))
    }

    pub fn retain(&self, pred: impl FnMut(&T) -> bool) {
        self.inner.write(|v| v.retain(pred))
    }

    pub fn clear(&self) {
        self.inner.write(Vec::clear)
    }

    pub fn entries(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.read(Vec::clone)
    }

    pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        self.inner.read(|v| f(v))
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        self.inner.write(f)
    }
}

impl<T: PartialEq> ThreadSafeList<T> {
    /// Append `value`; under `Reject`, returns `false` if an equal element exists.
    pub fn append(&self, value: T) -> bool {
        let policy = self.policy;
        self.inner.write(|v| {
            if !policy.allows_duplicates() && v.contains(&value) {
                return false;
            }
            v.push(value);
            true
        })
    }

    /// Insert at `index` (clamped to the end); same duplicate rule as `append`.
    pub fn insert(&self, index: usize, value: T) -> bool {
        let policy = self.policy;
        self.inner.write(|v| {
            if !policy.allows_duplicates() && v.contains(&value) {
                return false;
            }
            let at = index.min(v.len());
            v.insert(at, value);
            true
        })
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.read(|v| v.contains(value))
    }
}

impl<T> Default for ThreadSafeList<T> {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for ThreadSafeList<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadSafeList")
            .field("policy", &self.policy)
            .field("inner", &self.inner)
            .finish()
    }
}
