//! Streaming execution of grouped sorts.
//!
//! When an index already delivers rows ordered by the first `k` sort keys,
//! only rows that agree on those keys need sorting among themselves.
//! [`GroupedSort`] buffers one such group at a time, sorts it on the
//! remaining keys and emits it before reading further, so memory is bounded
//! by the largest group rather than the whole input.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::vec;

/// Iterator adapter sorting consecutive groups of rows independently.
///
/// Groups are maximal runs of rows for which `same_group(first, row)` holds,
/// where `first` is the first row of the run. Each group is stable-sorted
/// with `compare`; groups are emitted in input order.
pub struct GroupedSort<I, G, C>
where
    I: Iterator,
{
    input: Peekable<I>,
    same_group: G,
    compare: C,
    current: vec::IntoIter<I::Item>,
}

impl<I, G, C> GroupedSort<I, G, C>
where
    I: Iterator,
    G: FnMut(&I::Item, &I::Item) -> bool,
    C: FnMut(&I::Item, &I::Item) -> Ordering,
{
    /// Wraps `input`.
    pub fn new(input: I, same_group: G, compare: C) -> Self {
        Self {
            input: input.peekable(),
            same_group,
            compare,
            current: Vec::new().into_iter(),
        }
    }

    fn fill(&mut self) -> bool {
        let Some(first) = self.input.next() else {
            return false;
        };
        let mut group = vec![first];
        while let Some(next) = self.input.peek() {
            if !(self.same_group)(&group[0], next) {
                break;
            }
            if let Some(row) = self.input.next() {
                group.push(row);
            }
        }
        let compare = &mut self.compare;
        group.sort_by(|a, b| compare(a, b));
        self.current = group.into_iter();
        true
    }
}

impl<I, G, C> Iterator for GroupedSort<I, G, C>
where
    I: Iterator,
    G: FnMut(&I::Item, &I::Item) -> bool,
    C: FnMut(&I::Item, &I::Item) -> Ordering,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.current.next() {
                return Some(row);
            }
            if !self.fill() {
                return None;
            }
        }
    }
}

/// Convenience constructor for [`GroupedSort`].
pub fn grouped_sort<I, G, C>(input: I, same_group: G, compare: C) -> GroupedSort<I::IntoIter, G, C>
where
    I: IntoIterator,
    G: FnMut(&I::Item, &I::Item) -> bool,
    C: FnMut(&I::Item, &I::Item) -> Ordering,
{
    GroupedSort::new(input.into_iter(), same_group, compare)
}
