//! Simultaneous traversal of two range maps.

use super::{Iter, RangeMap};
use std::{cmp, ops::Range};

/// How many entries a cursor steps over before it falls back to a fresh lookup.
const SEEK_STEPS: usize = 4;

/// A cursor over two [`RangeMap`]s at once.
///
/// At any index, the cursor exposes the entry of each map covering that index, if any, and the
/// longest range starting at that index over which neither map changes entry. The range ends at
/// the nearest entry boundary of either map. Once both maps have no entries at or after the
/// index, the range is empty.
///
/// The cursor is positioned with [`seek`](Self::seek), which may jump arbitrarily far, or moved
/// one step with [`advance`](Self::advance). It also iterates as
/// `(range, value in a, value in b)` triples.
pub struct ParallelIterator<'a, K, A, B> {
    range: Range<K>,
    pos_a: Cursor<'a, K, A>,
    pos_b: Cursor<'a, K, B>,
}

impl<'a, K, A, B> ParallelIterator<'a, K, A, B>
where
    K: Ord + Clone,
    A: Clone,
    B: Clone,
{
    /// Positions a new cursor at `index`.
    pub fn new(map_a: &'a RangeMap<K, A>, map_b: &'a RangeMap<K, B>, index: K) -> Self {
        let mut iter = ParallelIterator {
            pos_a: Cursor::new(map_a, &index),
            pos_b: Cursor::new(map_b, &index),
            range: index.clone()..index,
        };
        iter.update_range();

        iter
    }

    /// Returns the range over which both current values hold.
    #[inline]
    pub fn range(&self) -> &Range<K> {
        &self.range
    }

    /// Returns the value of the first map at the current index, if there is one.
    #[inline]
    pub fn pos_a(&self) -> Option<&'a A> {
        self.pos_a.value(&self.range.start)
    }

    /// Returns the value of the second map at the current index, if there is one.
    #[inline]
    pub fn pos_b(&self) -> Option<&'a B> {
        self.pos_b.value(&self.range.start)
    }

    /// Moves the cursor to `index`.
    pub fn seek(&mut self, index: K) {
        if index < self.range.start {
            self.pos_a = Cursor::new(self.pos_a.map, &index);
            self.pos_b = Cursor::new(self.pos_b.map, &index);
        } else {
            self.pos_a.seek(&index);
            self.pos_b.seek(&index);
        }

        self.range = index.clone()..index;
        self.update_range();
    }

    /// Moves the cursor to the end of the current range. Does nothing if the range is empty.
    #[inline]
    pub fn advance(&mut self) {
        if !self.range.is_empty() {
            self.seek(self.range.end.clone());
        }
    }

    fn update_range(&mut self) {
        let index = &self.range.start;
        let end = match (
            self.pos_a.next_boundary(index),
            self.pos_b.next_boundary(index),
        ) {
            (Some(a), Some(b)) => cmp::min(a, b),
            (Some(end), None) | (None, Some(end)) => end,
            (None, None) => index.clone(),
        };

        self.range.end = end;
    }
}

impl<'a, K, A, B> Iterator for ParallelIterator<'a, K, A, B>
where
    K: Ord + Clone,
    A: Clone,
    B: Clone,
{
    type Item = (Range<K>, Option<&'a A>, Option<&'a B>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.range.is_empty() {
            return None;
        }

        let item = (self.range.clone(), self.pos_a(), self.pos_b());
        self.advance();

        Some(item)
    }
}

/// One side of a `ParallelIterator`: the first entry of the map that ends after the index.
struct Cursor<'a, K, V> {
    map: &'a RangeMap<K, V>,
    iter: Iter<'a, K, V>,
    current: Option<(Range<K>, &'a V)>,
}

impl<'a, K, V> Cursor<'a, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn new(map: &'a RangeMap<K, V>, index: &K) -> Self {
        let mut iter = map.iter_from(index);
        let current = iter.next();

        Cursor { map, iter, current }
    }

    fn is_behind(&self, index: &K) -> bool {
        matches!(&self.current, Some((range, _)) if range.end <= *index)
    }

    fn seek(&mut self, index: &K) {
        for _ in 0..SEEK_STEPS {
            if !self.is_behind(index) {
                return;
            }

            self.current = self.iter.next();
        }

        if self.is_behind(index) {
            *self = Cursor::new(self.map, index);
        }
    }

    fn value(&self, index: &K) -> Option<&'a V> {
        self.current
            .as_ref()
            .filter(|(range, _)| range.start <= *index)
            .map(|&(_, value)| value)
    }

    /// The next index after `index` at which this side changes entry. `None` means never.
    fn next_boundary(&self, index: &K) -> Option<K> {
        self.current.as_ref().map(|(range, _)| {
            if range.start <= *index {
                range.end.clone()
            } else {
                range.start.clone()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn map(entries: &[(Range<u32>, char)]) -> RangeMap<u32, char> {
        entries.iter().cloned().collect()
    }

    #[test]
    fn walks_both_maps() {
        // 0 1 2 3 4 5 6 7 8 9
        // ◌ a-----◌ ◌ b---◌ ◌
        // ◌ ◌ ◌ x-------◌ ◌ ◌
        let a = map(&[(1..4, 'a'), (6..8, 'b')]);
        let b = map(&[(3..7, 'x')]);

        let steps: Vec<_> = ParallelIterator::new(&a, &b, 0)
            .map(|(range, a, b)| (range, a.copied(), b.copied()))
            .collect();
        assert_eq!(
            steps,
            [
                (0..1, None, None),
                (1..3, Some('a'), None),
                (3..4, Some('a'), Some('x')),
                (4..6, None, Some('x')),
                (6..7, Some('b'), Some('x')),
                (7..8, Some('b'), None),
            ],
        );
    }

    #[test]
    fn seek_jumps_and_rewinds() {
        let a = map(&(0..20).map(|i| (i * 2..i * 2 + 1, 'a')).collect::<Vec<_>>());
        let b = map(&[(0..40, 'b')]);

        let mut iter = ParallelIterator::new(&a, &b, 0);
        iter.seek(31);
        assert_eq!(iter.range(), &(31..32));
        assert_eq!(iter.pos_a(), None);
        assert_eq!(iter.pos_b(), Some(&'b'));

        iter.seek(3);
        assert_eq!(iter.range(), &(3..4));

        iter.seek(40);
        assert!(iter.range().is_empty());
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn empty_maps() {
        let a: RangeMap<u32, char> = RangeMap::new();
        let b = map(&[(5..6, 'b')]);

        let iter = ParallelIterator::new(&a, &a, 0);
        assert!(iter.range().is_empty());

        let mut iter = ParallelIterator::new(&a, &b, 0);
        assert_eq!(iter.range(), &(0..5));
        iter.advance();
        assert_eq!(iter.range(), &(5..6));
        assert_eq!(iter.pos_b(), Some(&'b'));
        iter.advance();
        assert!(iter.range().is_empty());
    }

    fn random_map(rng: &mut StdRng, size: u32) -> RangeMap<u32, u32> {
        let mut map = RangeMap::new();

        for value in 0..rng.gen_range(0..12) {
            let start = rng.gen_range(0..size);
            let end = rng.gen_range(start + 1..=size);
            map.insert(start..end, value);
        }

        map
    }

    fn entry_start(map: &RangeMap<u32, u32>, index: u32) -> Option<u32> {
        map.get_key_value(&index).map(|(range, _)| range.start)
    }

    #[test]
    fn matches_pointwise_lookups() {
        const SIZE: u32 = 64;
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..200 {
            let a = random_map(&mut rng, SIZE);
            let b = random_map(&mut rng, SIZE);
            let mut iter = ParallelIterator::new(&a, &b, rng.gen_range(0..SIZE));

            loop {
                let range = iter.range().clone();

                if range.is_empty() {
                    // Nothing is stored at or after the index.
                    assert!((range.start..SIZE)
                        .all(|i| a.get(&i).is_none() && b.get(&i).is_none()));
                    break;
                }

                for i in range.clone() {
                    assert_eq!(iter.pos_a(), a.get(&i));
                    assert_eq!(iter.pos_b(), b.get(&i));
                    assert_eq!(entry_start(&a, i), entry_start(&a, range.start));
                    assert_eq!(entry_start(&b, i), entry_start(&b, range.start));
                }

                // The range is maximal: one of the maps changes entry at its end.
                let last = range.end - 1;
                assert!(
                    entry_start(&a, last) != entry_start(&a, range.end)
                        || entry_start(&b, last) != entry_start(&b, range.end)
                        || (a.get(&range.end).is_none() && b.get(&range.end).is_none()),
                );

                if rng.gen_bool(0.3) {
                    iter.seek(rng.gen_range(range.start..=range.end + 4));
                } else {
                    iter.advance();
                }
            }
        }
    }
}
