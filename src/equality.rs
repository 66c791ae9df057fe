//! Equality capability used to deduplicate keys sharing one hash value.

/// Decides whether two keys are the same entry. Must agree with the hasher:
/// keys that compare equal must produce the same hash.
pub trait KeyEq<K: ?Sized> {
    fn keys_equal(&self, a: &K, b: &K) -> bool;
}

/// Value equality through `PartialEq`.
///
/// Borrowed C strings (`&CStr`) compare by content under this rule, so
/// null-terminated byte strings need no dedicated predicate.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEq;

impl<K: ?Sized + PartialEq> KeyEq<K> for DefaultEq {
    #[inline]
    fn keys_equal(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// Wraps a closure `Fn(&K, &K) -> bool` as a [`KeyEq`].
#[derive(Clone, Copy)]
pub struct FnEq<F>(pub F);

impl<F> core::fmt::Debug for FnEq<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FnEq")
    }
}

impl<K, F> KeyEq<K> for FnEq<F>
where
    K: ?Sized,
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn keys_equal(&self, a: &K, b: &K) -> bool {
        (self.0)(a, b)
    }
}
