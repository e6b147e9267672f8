//! Values the cache is able to watch.
//!
//! Only something backed by a live, reference-counted allocation can be held
//! weakly. [`Referent`] turns whatever the caller passes to
//! [`WeakCache::set`](crate::WeakCache::set) into a strong handle for the
//! duration of that call, or explains why it cannot.

use std::sync::{Arc, Weak};

use crate::error::Rejected;

/// Conversion into a live `Arc<V>`.
///
/// Implemented for `Arc<V>`, `&Arc<V>`, `Weak<V>`, `&Weak<V>` and `Option` of
/// any of these. `None` is rejected as [`Rejected::Absent`]; a weak reference
/// with no live target (including `Weak::new()`) as [`Rejected::Dangling`].
pub trait Referent<V: ?Sized> {
    /// Produce a strong handle to the target
    fn into_strong(self) -> Result<Arc<V>, Rejected>;
}

impl<V: ?Sized> Referent<V> for Arc<V> {
    fn into_strong(self) -> Result<Arc<V>, Rejected> {
        Ok(self)
    }
}

impl<V: ?Sized> Referent<V> for &Arc<V> {
    fn into_strong(self) -> Result<Arc<V>, Rejected> {
        Ok(Arc::clone(self))
    }
}

impl<V: ?Sized> Referent<V> for Weak<V> {
    fn into_strong(self) -> Result<Arc<V>, Rejected> {
        self.upgrade().ok_or(Rejected::Dangling)
    }
}

impl<V: ?Sized> Referent<V> for &Weak<V> {
    fn into_strong(self) -> Result<Arc<V>, Rejected> {
        self.upgrade().ok_or(Rejected::Dangling)
    }
}

impl<V: ?Sized, R: Referent<V>> Referent<V> for Option<R> {
    fn into_strong(self) -> Result<Arc<V>, Rejected> {
        match self {
            Some(referent) => referent.into_strong(),
            None => Err(Rejected::Absent),
        }
    }
}
