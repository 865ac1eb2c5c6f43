//! The [`LockFreeSortedSet`] and other related structures.

use std::alloc;
use std::borrow::Borrow;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::iter::FromIterator;

#[cfg(feature = "rayon")]
use rayon::iter::{FromParallelIterator, IntoParallelIterator, ParallelExtend, ParallelIterator};

use crate::error::AllocError;
use crate::raw::config::Trivial as TrivialConfig;
use crate::raw::{self, Raw};

/// A concurrent lock-free sorted set.
///
/// The values are kept in ascending order and each is present at most once. Any number of
/// threads may add, remove and look up values at the same time; none of them ever waits for a
/// lock. Each operation takes effect atomically at a single instant somewhere between its call and
/// return.
///
/// Note that values returned by looking up or iterating are copied using the `Clone` trait. If
/// you intend to store types that are expensive to copy, you can wrap them in an `Arc`.
///
/// ```rust
/// use conlist::LockFreeSortedSet;
/// use crossbeam_utils::thread;
///
/// let set = LockFreeSortedSet::new();
///
/// thread::scope(|s| {
///     s.spawn(|_| {
///         set.add("world");
///     });
///     s.spawn(|_| {
///         set.add("hello");
///     });
/// }).unwrap();
///
/// assert!(set.contains("hello"));
/// assert!(set.contains("world"));
/// assert!(!set.contains("universe"));
/// assert_eq!(vec!["hello", "world"], set.iter().collect::<Vec<_>>());
/// set.remove("world");
/// assert!(!set.contains("world"));
/// ```
///
/// ```rust
/// use conlist::LockFreeSortedSet;
/// let set: LockFreeSortedSet<usize> = LockFreeSortedSet::new();
///
/// assert!(set.add(1));
/// assert!(!set.add(1));
///
/// assert!(set.remove(&1));
/// assert!(!set.remove(&1));
/// assert!(set.is_empty());
/// ```
pub struct LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    pub(crate) raw: Raw<TrivialConfig<T>>,
}

impl<T> LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    /// Creates a new empty set.
    pub fn new() -> Self {
        Self { raw: Raw::new() }
    }

    /// Creates a new empty set.
    ///
    /// The capacity is only a hint and a linked list has no use for it. This exists for
    /// compatibility with code written for other collections.
    pub fn with_capacity(_capacity: usize) -> Self {
        Self::new()
    }

    /// Adds a value to the set.
    ///
    /// Returns `true` if it got inserted and `false` if an equal value was already present (in
    /// which case the provided one is dropped).
    ///
    /// If the memory for the new node can't be allocated, this reports it through
    /// [`handle_alloc_error`][std::alloc::handle_alloc_error], the same way [`Box::new`] does. Use
    /// [`try_add`][LockFreeSortedSet::try_add] to handle that case yourself.
    pub fn add(&self, value: T) -> bool {
        match self.try_add(value) {
            Ok(added) => added,
            Err(e) => alloc::handle_alloc_error(e.layout()),
        }
    }

    /// Adds a value to the set, reporting allocation failures.
    ///
    /// # Errors
    ///
    /// If there's not enough memory for the new node. The set stays untouched in such case.
    pub fn try_add(&self, value: T) -> Result<bool, AllocError> {
        let pin = crossbeam_epoch::pin();
        Ok(self.raw.insert(value, &pin)?.is_none())
    }

    /// Removes a value from the set.
    ///
    /// Returns `true` if this call removed it. If multiple threads race to remove the same value,
    /// only one of them gets `true`.
    pub fn remove<Q>(&self, value: &Q) -> bool
    where
        Q: ?Sized + Ord,
        T: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.remove(value, &pin).is_some()
    }

    /// Checks if a value is present in the set.
    ///
    /// Note that by the time you can act on it, the presence of the value can change (eg. other
    /// thread can add or remove it in the meantime).
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        Q: ?Sized + Ord,
        T: Borrow<Q>,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.get(value, &pin).is_some()
    }

    /// Looks up a value in the set.
    ///
    /// This creates a copy of the stored value.
    pub fn get<Q>(&self, value: &Q) -> Option<T>
    where
        Q: ?Sized + Ord,
        T: Borrow<Q> + Clone,
    {
        let pin = crossbeam_epoch::pin();
        self.raw.get(value, &pin).cloned()
    }

    /// Checks if the set is currently empty.
    ///
    /// Note that due to being concurrent, the use-case of this method is mostly for debugging
    /// purposes, because the state can change between reading the value and acting on it.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Counts the values in the set.
    ///
    /// This walks the whole list. Under concurrent modification, the result need not match the
    /// size of the set at any single moment.
    pub fn len(&self) -> usize {
        let mut iter = raw::iterator::Iter::new(&self.raw);
        let mut cnt = 0;
        while iter.next().is_some() {
            cnt += 1;
        }
        cnt
    }
}

impl<T> Default for LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for LockFreeSortedSet<T>
where
    T: Debug + Ord + 'static,
{
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mut d = fmt.debug_set();
        let mut iter = raw::iterator::Iter::new(&self.raw);
        while let Some(v) = iter.next() {
            d.entry(v);
        }
        d.finish()
    }
}

impl<T> LockFreeSortedSet<T>
where
    T: Clone + Ord + 'static,
{
    /// Returns an iterator through the elements of the set, in ascending order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: raw::iterator::Iter::new(&self.raw),
        }
    }
}

/// The iterator of the [`LockFreeSortedSet`].
///
/// See the [`iter`][LockFreeSortedSet::iter] method for details.
pub struct Iter<'a, T>
where
    T: Clone + Ord + 'static,
{
    inner: raw::iterator::Iter<'a, TrivialConfig<T>>,
}

impl<'a, T> Iterator for Iter<'a, T>
where
    T: Clone + Ord + 'static,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next().cloned()
    }
}

impl<'a, T> IntoIterator for &'a LockFreeSortedSet<T>
where
    T: Clone + Ord + 'static,
{
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> Extend<T> for &'a LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        for n in iter {
            self.add(n);
        }
    }
}

impl<T> Extend<T> for LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut me: &LockFreeSortedSet<_> = self;
        me.extend(iter);
    }
}

impl<T> FromIterator<T> for LockFreeSortedSet<T>
where
    T: Ord + 'static,
{
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut me = LockFreeSortedSet::new();
        me.extend(iter);
        me
    }
}

#[cfg(feature = "rayon")]
impl<T> ParallelExtend<T> for LockFreeSortedSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = T>,
    {
        let mut me: &LockFreeSortedSet<_> = self;
        me.par_extend(par_iter);
    }
}

#[cfg(feature = "rayon")]
impl<'a, T> ParallelExtend<T> for &'a LockFreeSortedSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    fn par_extend<I>(&mut self, par_iter: I)
    where
        I: IntoParallelIterator<Item = T>,
    {
        let me: &LockFreeSortedSet<_> = self;
        par_iter.into_par_iter().for_each(|v| {
            me.add(v);
        });
    }
}

#[cfg(feature = "rayon")]
impl<T> FromParallelIterator<T> for LockFreeSortedSet<T>
where
    T: Ord + Send + Sync + 'static,
{
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = T>,
    {
        let mut me = LockFreeSortedSet::new();
        me.par_extend(par_iter);
        me
    }
}
