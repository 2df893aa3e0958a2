//! WeakRef: non-owning handle compared by reference identity.
//!
//! A `WeakRef<T>` never keeps the referent alive. While any `WeakRef` to an
//! allocation exists the allocation itself is not freed (only the value is
//! dropped), so the address stays unique: a dead `WeakRef` can never alias
//! a newer, unrelated `Arc`. Equality and hashing use that address.

use core::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

pub struct WeakRef<T: ?Sized> {
    inner: Weak<T>,
}

impl<T: ?Sized> WeakRef<T> {
    pub fn new(target: &Arc<T>) -> Self {
        Self {
            inner: Arc::downgrade(target),
        }
    }

    /// Strong handle to the referent, or `None` once every owner released it.
    #[inline]
    pub fn upgrade(&self) -> Option<Arc<T>> {
        self.inner.upgrade()
    }

    /// Liveness probe that does not create a strong handle.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// `true` if `target` is the same allocation.
    #[inline]
    pub fn points_to(&self, target: &Arc<T>) -> bool {
        self.addr() == Arc::as_ptr(target).cast::<()>() as usize
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    /// Thin address of the allocation; stable for the lifetime of `self`.
    #[inline]
    pub fn addr(&self) -> usize {
        self.inner.as_ptr().cast::<()>() as usize
    }
}

impl<T: ?Sized> From<&Arc<T>> for WeakRef<T> {
    fn from(target: &Arc<T>) -> Self {
        WeakRef::new(target)
    }
}

impl<T: ?Sized> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> PartialEq for WeakRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> Eq for WeakRef<T> {}

impl<T: ?Sized> Hash for WeakRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> core::fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WeakRef")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("alive", &self.is_alive())
            .finish()
    }
}
