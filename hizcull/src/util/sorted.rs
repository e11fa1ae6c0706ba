//! Insertion into already sorted lists.

use std::cmp::Ordering;

/// Keeps a list sorted while inserting into it.
pub trait SortedInsert<T> {
    /// Inserts `value` at the position `compare` dictates.
    ///
    /// `compare(existing, value)` follows [`Ord::cmp`]: `Less` means
    /// `existing` stays in front of `value`, `Greater` puts `value` first.
    ///
    /// If an element comparing equal is already present the list is left
    /// untouched and `false` is returned.
    fn insert_sorted_by<F>(&mut self, value: T, compare: F) -> bool
    where
        F: FnMut(&T, &T) -> Ordering;

    /// [`SortedInsert::insert_sorted_by`] using the natural ordering.
    fn insert_sorted(&mut self, value: T) -> bool
    where
        T: Ord,
    {
        self.insert_sorted_by(value, Ord::cmp)
    }
}

impl<T> SortedInsert<T> for Vec<T> {
    fn insert_sorted_by<F>(&mut self, value: T, mut compare: F) -> bool
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut low = 0;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match compare(&self[mid], &value) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return false,
            }
        }
        self.insert(low, value);
        true
    }
}
