//! Hash capability: the table is generic over a key hasher whose output is an
//! unsigned integer of a declared bit-width.

use core::fmt::Debug;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Unsigned integer produced by a [`KeyHasher`].
///
/// Sealed: only `u8`, `u16`, `u32` and `u64` implement it, so a hasher with a
/// signed or non-integer output is rejected when the table type is built.
pub trait HashValue:
    sealed::Sealed + Copy + Eq + Ord + Hash + Debug + Send + Sync + 'static
{
    /// Width of the hash output in bits. Caps the bucket array size.
    const BITS: u32;
    const ZERO: Self;

    fn to_u64(self) -> u64;

    /// Next hash value, or `None` on overflow.
    fn successor(self) -> Option<Self>;
}

macro_rules! impl_hash_value {
    ($($t:ty),*) => {$(
        impl sealed::Sealed for $t {}

        impl HashValue for $t {
            const BITS: u32 = <$t>::BITS;
            const ZERO: Self = 0;

            #[inline]
            fn to_u64(self) -> u64 {
                self as u64
            }

            #[inline]
            fn successor(self) -> Option<Self> {
                self.checked_add(1)
            }
        }
    )*};
}

impl_hash_value!(u8, u16, u32, u64);

/// Computes the hash used to place a key. Equal keys must hash equally.
pub trait KeyHasher<K: ?Sized> {
    type Hash: HashValue;

    fn hash_key(&self, key: &K) -> Self::Hash;
}

/// Adapts any `BuildHasher` into a 64-bit [`KeyHasher`].
#[derive(Clone, Debug, Default)]
pub struct BuildHasherAdapter<S>(S);

impl<S> BuildHasherAdapter<S> {
    pub fn new(build_hasher: S) -> Self {
        Self(build_hasher)
    }

    pub fn build_hasher(&self) -> &S {
        &self.0
    }
}

impl<K, S> KeyHasher<K> for BuildHasherAdapter<S>
where
    K: ?Sized + Hash,
    S: BuildHasher,
{
    type Hash = u64;

    #[inline]
    fn hash_key(&self, key: &K) -> u64 {
        self.0.hash_one(key)
    }
}

/// Hasher used when none is given: hashbrown's default build hasher.
pub type DefaultKeyHasher = BuildHasherAdapter<hashbrown::hash_map::DefaultHashBuilder>;

/// Wraps a closure `Fn(&K) -> H` as a [`KeyHasher`].
///
/// ```
/// use aggregate_set::{AgHashSet, FnHasher};
///
/// let mut set = AgHashSet::with_hasher(FnHasher::new(|k: &i64| k.unsigned_abs()));
/// assert!(set.insert(-3));
/// assert!(set.insert(3));
/// assert_eq!(set.bucket_stats(set.bucket_of(&3)).unwrap().hash_count, 1);
/// ```
pub struct FnHasher<F, H> {
    f: F,
    _out: PhantomData<fn() -> H>,
}

impl<F, H> FnHasher<F, H> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _out: PhantomData,
        }
    }
}

impl<F: Clone, H> Clone for FnHasher<F, H> {
    fn clone(&self) -> Self {
        Self::new(self.f.clone())
    }
}

impl<F, H> Debug for FnHasher<F, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FnHasher")
    }
}

impl<K, F, H> KeyHasher<K> for FnHasher<F, H>
where
    K: ?Sized,
    F: Fn(&K) -> H,
    H: HashValue,
{
    type Hash = H;

    #[inline]
    fn hash_key(&self, key: &K) -> H {
        (self.f)(key)
    }
}
