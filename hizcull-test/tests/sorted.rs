use std::cmp::Ordering;

use hizcull::util::sorted::SortedInsert;
use rand::{rngs::StdRng, Rng, SeedableRng};

#[test]
fn duplicate_insert_is_a_no_op() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut values = Vec::new();
    for _ in 0..500 {
        let value: u16 = rng.gen_range(0..200);
        let was_present = values.contains(&value);
        assert_eq!(values.insert_sorted(value), !was_present);

        let before = values.clone();
        assert!(!values.insert_sorted(value));
        assert_eq!(values, before);
    }
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn small_sequences() {
    let mut empty: Vec<i32> = Vec::new();
    assert!(empty.insert_sorted(5));
    assert_eq!(empty, [5]);

    let mut one = vec![5];
    assert!(one.insert_sorted(1));
    assert_eq!(one, [1, 5]);

    for (value, expected) in [(0, [0, 1, 5]), (3, [1, 3, 5]), (9, [1, 5, 9])] {
        let mut two = vec![1, 5];
        assert!(two.insert_sorted(value));
        assert_eq!(two, expected);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: u32,
    name: &'static str,
}

/// The comparator decides identity, not the whole value.
#[test]
fn comparator_defines_equality() {
    let by_key = |a: &Entry, b: &Entry| a.key.cmp(&b.key);
    let mut entries = Vec::new();
    assert!(entries.insert_sorted_by(Entry { key: 2, name: "b" }, by_key));
    assert!(entries.insert_sorted_by(Entry { key: 1, name: "a" }, by_key));
    assert!(!entries.insert_sorted_by(Entry { key: 2, name: "other" }, by_key));

    assert_eq!(entries.iter().map(|e| e.name).collect::<Vec<_>>(), ["a", "b"]);

    let reversed = |a: &Entry, b: &Entry| -> Ordering { b.key.cmp(&a.key) };
    let mut descending = Vec::new();
    for key in [3, 1, 2] {
        descending.insert_sorted_by(Entry { key, name: "" }, reversed);
    }
    assert_eq!(descending.iter().map(|e| e.key).collect::<Vec<_>>(), [3, 2, 1]);
}
