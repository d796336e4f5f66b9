//! An ordered map from disjoint half-open ranges to values.
//!
//! Unlike a general-purpose interval map, stored ranges are never coalesced: adjacent ranges
//! with equal values stay separate entries. Entries are only ever split, either explicitly with
//! [`RangeMap::split_at`] or when an update applies to part of an entry.
//!
//! The entry points that mutate a map in bulk are [`RangeMap::infill_update_range`], which
//! fills holes and updates stored values over a range through an [`InfillUpdateOps`], and
//! [`RangeMap::splice`], which applies every entry of another map through a [`SpliceOps`].

pub use self::parallel::ParallelIterator;
use std::{
    cmp,
    collections::{btree_map, BTreeMap},
    fmt::{Debug, Error as FmtError, Formatter},
    iter::FusedIterator,
    ops::{Bound, Range},
};

pub mod parallel;

/// A map whose keys are stored as (half-open) ranges bounded
/// inclusively below and exclusively above `(start..end)`.
///
/// Stored ranges never overlap, and are never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct RangeMap<K, V> {
    // Stores the range start in the key and the range end in the corresponding value.
    btm: BTreeMap<K, Entry<K, V>>,
}

#[derive(Clone, PartialEq, Eq)]
struct Entry<K, V> {
    end: K,
    value: V,
}

/// How [`RangeMap::infill_update_range`] treats the parts of a range.
pub trait InfillUpdateOps<K, V> {
    /// Returns the value to store in `hole`, a part of the range that has no entry, or `None`
    /// to leave it empty.
    fn infill(&self, hole: &Range<K>) -> Option<V>;

    /// Updates a stored value in place. Returns whether the value changed.
    ///
    /// This is called on a copy of the stored value first; the stored entry is only split when
    /// the update reports a change.
    fn update(&self, value: &mut V) -> bool;
}

/// How [`RangeMap::splice`] applies the entries of a source map to a destination map.
pub trait SpliceOps<V, S> {
    /// Returns the value to store where the destination has no entry, or `None` to leave it
    /// empty.
    fn insert(&self, src: &S) -> Option<V>;

    /// Updates a destination value with the source value covering the same range. Returns
    /// whether the destination value changed.
    fn update(&self, dst: &mut V, src: &S) -> bool;
}

impl<K, V> Default for RangeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RangeMap<K, V>
where
    K: Ord + Clone,
{
    /// Makes a new empty `RangeMap`.
    #[inline]
    pub fn new() -> Self {
        RangeMap {
            btm: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.btm.is_empty()
    }

    /// Returns the number of stored entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.btm.len()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.btm.clear();
    }

    /// Returns a reference to the value corresponding to the given key,
    /// if the key is covered by any range in the map.
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_range, value)| value)
    }

    /// Returns the range-value pair (as a pair of references) corresponding
    /// to the given key, if the key is covered by any range in the map.
    #[inline]
    pub fn get_key_value(&self, key: &K) -> Option<(Range<K>, &V)> {
        self.btm
            // The only stored range that could contain the given key is the
            // last stored range whose start is less than or equal to this key.
            .range((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .filter(|(_start, Entry { end, .. })| end > key)
            .map(|(start, Entry { end, value })| (start.clone()..end.clone(), value))
    }

    /// Returns `true` if any part of the provided range overlaps with a range in the map.
    #[inline]
    pub fn contains_any(&self, range: &Range<K>) -> bool {
        self.range(range).next().is_some()
    }

    /// Gets an iterator over all pairs of key range and value,
    /// ordered by key range.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.btm.range::<K, _>(..),
        }
    }

    /// Gets an iterator over the entries whose range ends after `key`: the entry containing
    /// `key` if there is one, and every entry after it.
    pub fn iter_from(&self, key: &K) -> Iter<'_, K, V> {
        let start = self
            .get_key_value(key)
            .map_or_else(|| key.clone(), |(range, _)| range.start);

        Iter {
            inner: self.btm.range((Bound::Included(start), Bound::Unbounded)),
        }
    }

    /// Gets an iterator over all pairs of key range and value, where the key range overlaps with
    /// the provided range. The ranges are not clipped.
    pub fn range(&self, range: &Range<K>) -> Iter<'_, K, V> {
        let start = self
            .get_key_value(&range.start)
            .map_or_else(|| range.start.clone(), |(k, _v)| k.start);
        let end = cmp::max(&start, &range.end).clone();

        Iter {
            inner: self
                .btm
                .range((Bound::Included(start), Bound::Excluded(end))),
        }
    }

}

impl<K, V> RangeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Stores `value` over `range`, replacing whatever was stored there. Entries that partially
    /// overlap `range` are trimmed.
    ///
    /// # Panics
    ///
    /// Panics if range `start >= end`.
    pub fn insert(&mut self, range: Range<K>, value: V) {
        assert!(range.start < range.end);

        self.split_at(&range.start);
        self.split_at(&range.end);

        let covered: Vec<K> = self
            .btm
            .range(range.start.clone()..range.end.clone())
            .map(|(start, _)| start.clone())
            .collect();

        for start in covered {
            self.btm.remove(&start);
        }

        self.btm.insert(
            range.start,
            Entry {
                end: range.end,
                value,
            },
        );
    }

    /// Splits a range in two at the provided key.
    ///
    /// Does nothing if no range exists at the key, or if the key is at a range boundary.
    pub fn split_at(&mut self, key: &K) {
        // Find a range that contains the key, but doesn't start or end with the key.
        let bounds = (Bound::Unbounded, Bound::Excluded(key));

        if let Some((_start, entry)) = self
            .btm
            .range_mut::<K, _>(bounds)
            .next_back()
            .filter(|(_start, Entry { end, .. })| end > key)
        {
            let second_half = Entry {
                end: entry.end.clone(),
                value: entry.value.clone(),
            };
            entry.end = key.clone();
            self.btm.insert(key.clone(), second_half);
        }
    }

    /// Walks `range` left to right. Holes are passed to [`InfillUpdateOps::infill`], and stored
    /// values to [`InfillUpdateOps::update`]. A stored entry that extends beyond `range` is split
    /// at the boundary only if its value changes.
    ///
    /// Returns whether anything was inserted or changed.
    pub fn infill_update_range<O>(&mut self, range: Range<K>, ops: &O) -> bool
    where
        O: InfillUpdateOps<K, V> + ?Sized,
    {
        let mut changed = false;
        let mut pos = range.start;

        while pos < range.end {
            if let Some((stored, value)) = self.get_key_value(&pos) {
                let end = cmp::min(stored.end, range.end.clone());
                let mut value = value.clone();

                if ops.update(&mut value) {
                    self.split_at(&pos);
                    self.split_at(&end);

                    if let Some(entry) = self.btm.get_mut(&pos) {
                        entry.value = value;
                    }

                    changed = true;
                }

                pos = end;
            } else {
                let hole_end = self
                    .btm
                    .range((Bound::Excluded(&pos), Bound::Unbounded))
                    .next()
                    .map_or_else(
                        || range.end.clone(),
                        |(start, _)| cmp::min(start, &range.end).clone(),
                    );
                let hole = pos..hole_end;

                if let Some(value) = ops.infill(&hole) {
                    self.btm.insert(
                        hole.start,
                        Entry {
                            end: hole.end.clone(),
                            value,
                        },
                    );
                    changed = true;
                }

                pos = hole.end;
            }
        }

        changed
    }

    /// Calls `visitor` with every stored entry that overlaps `range`, clipped to `range`, until
    /// it returns `true`. Returns whether any call returned `true`.
    pub fn any_in_range(
        &self,
        range: &Range<K>,
        mut visitor: impl FnMut(Range<K>, &V) -> bool,
    ) -> bool {
        self.range(range).any(|(stored, value)| {
            let clipped = cmp::max(stored.start, range.start.clone())
                ..cmp::min(stored.end, range.end.clone());

            visitor(clipped, value)
        })
    }

    /// Applies every entry of `src` to `self`: holes in `self` are filled through
    /// [`SpliceOps::insert`], and stored values are updated through [`SpliceOps::update`].
    ///
    /// Returns whether anything changed.
    pub fn splice<S, O>(&mut self, src: &RangeMap<K, S>, ops: &O) -> bool
    where
        O: SpliceOps<V, S> + ?Sized,
    {
        let mut changed = false;

        for (range, src_value) in src.iter() {
            changed |= self.infill_update_range(range, &SpliceAdapter { ops, src: src_value });
        }

        changed
    }
}

struct SpliceAdapter<'a, O: ?Sized, S> {
    ops: &'a O,
    src: &'a S,
}

impl<K, V, S, O> InfillUpdateOps<K, V> for SpliceAdapter<'_, O, S>
where
    O: SpliceOps<V, S> + ?Sized,
{
    #[inline]
    fn infill(&self, _hole: &Range<K>) -> Option<V> {
        self.ops.insert(self.src)
    }

    #[inline]
    fn update(&self, value: &mut V) -> bool {
        self.ops.update(value, self.src)
    }
}

/// An iterator over the entries of a `RangeMap`, ordered by key range.
///
/// The iterator element type is `(Range<K>, &'a V)`.
///
/// This `struct` is created by the [`iter`], [`iter_from`] and [`range`] methods on
/// [`RangeMap`].
///
/// [`iter`]: RangeMap::iter
/// [`iter_from`]: RangeMap::iter_from
/// [`range`]: RangeMap::range
#[derive(Clone)]
pub struct Iter<'a, K, V> {
    inner: btree_map::Range<'a, K, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: 'a + Clone,
    V: 'a,
{
    type Item = (Range<K>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(start, Entry { end, value })| (start.clone()..end.clone(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V>
where
    K: 'a + Clone,
    V: 'a,
{
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner
            .next_back()
            .map(|(start, Entry { end, value })| (start.clone()..end.clone(), value))
    }
}

impl<K: Clone, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> FromIterator<(Range<K>, V)> for RangeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn from_iter<T: IntoIterator<Item = (Range<K>, V)>>(iter: T) -> Self {
        let mut range_map = RangeMap::new();

        for (range, value) in iter {
            range_map.insert(range, value);
        }

        range_map
    }
}

// We can't just derive this automatically, because that would
// expose irrelevant (and private) implementation details.
impl<K, V> Debug for RangeMap<K, V>
where
    K: Debug + Ord + Clone,
    V: Debug + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.debug_map().entries(self.iter()).finish()
    }
}
