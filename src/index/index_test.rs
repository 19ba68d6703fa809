// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::alloc::Arena;
    use crate::config::DbOptions;
    use crate::error::{TroveError, TroveResult};
    use crate::index::radix::RadixTree;
    use crate::index::trie::StringIndex;
    use crate::index::{FindResult, IndexAccessor, IndexPayload};
    use crate::keys::ObjKey;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Test accessor over an in-memory value map.
    struct MapAccessor {
        values: RefCell<HashMap<i64, IndexPayload>>,
    }

    impl MapAccessor {
        fn new() -> Self {
            Self {
                values: RefCell::new(HashMap::new()),
            }
        }

        fn set(&self, key: i64, payload: IndexPayload) {
            self.values.borrow_mut().insert(key, payload);
        }

        fn set_str(&self, key: i64, s: &str) {
            self.set(key, IndexPayload::String(s.to_string()));
        }

        fn set_int(&self, key: i64, v: i64) {
            self.set(
                key,
                IndexPayload::Bytes(crate::index::canonical_int(v).to_be_bytes().to_vec()),
            );
        }

        fn remove(&self, key: i64) {
            self.values.borrow_mut().remove(&key);
        }
    }

    impl IndexAccessor for MapAccessor {
        fn payload(&self, _arena: &Arena, key: ObjKey) -> TroveResult<IndexPayload> {
            self.values
                .borrow()
                .get(&key.0)
                .cloned()
                .ok_or(TroveError::InvalidKey { key: key.0 })
        }
    }

    fn arena() -> (tempfile::TempDir, Arena) {
        let dir = tempfile::tempdir().unwrap();
        let arena = Arena::open(dir.path().join("t.trove"), &DbOptions::default()).unwrap();
        (dir, arena)
    }

    fn str_payload(s: &str) -> IndexPayload {
        IndexPayload::String(s.to_string())
    }

    fn int_payload(v: i64) -> IndexPayload {
        IndexPayload::Bytes(crate::index::canonical_int(v).to_be_bytes().to_vec())
    }

    #[test]
    fn test_duplicate_key_detection_and_distinct() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        let words = ["alpha", "beta", "alpha", "gamma", "beta", "beta"];
        for (k, w) in words.iter().enumerate() {
            acc.set_str(k as i64, w);
            index
                .insert(&mut a, &acc, ObjKey(k as i64), &str_payload(w))
                .unwrap();
        }
        index.verify(&a, &acc).unwrap();

        assert!(index.has_duplicates(&a, &acc).unwrap());
        assert_eq!(
            index.distinct(&a, &acc).unwrap(),
            vec![ObjKey(0), ObjKey(1), ObjKey(3)]
        );
        assert_eq!(index.count(&a, &acc, &str_payload("beta")).unwrap(), 3);
        assert_eq!(
            index.find_all(&a, &acc, &str_payload("beta"), false).unwrap(),
            vec![ObjKey(1), ObjKey(4), ObjKey(5)]
        );
        assert_eq!(
            index.find_first(&a, &acc, &str_payload("gamma")).unwrap(),
            Some(ObjKey(3))
        );
        assert_eq!(
            index.find_first(&a, &acc, &str_payload("delta")).unwrap(),
            None
        );
    }

    #[test]
    fn test_long_prefix_split() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        let s1 = format!("{}b", "a".repeat(107));
        let s2 = format!("{}c", "a".repeat(107));
        acc.set_str(0, &s1);
        acc.set_str(1, &s2);
        index.insert(&mut a, &acc, ObjKey(0), &str_payload(&s1)).unwrap();
        index.insert(&mut a, &acc, ObjKey(1), &str_payload(&s2)).unwrap();
        index.verify(&a, &acc).unwrap();

        assert_eq!(
            index.find_first(&a, &acc, &str_payload(&s1)).unwrap(),
            Some(ObjKey(0))
        );
        assert_eq!(
            index.find_first(&a, &acc, &str_payload(&s2)).unwrap(),
            Some(ObjKey(1))
        );

        // A very long string must not overflow the trie depth.
        let s3 = format!("{}b", "a".repeat(100_000));
        acc.set_str(2, &s3);
        index.insert(&mut a, &acc, ObjKey(2), &str_payload(&s3)).unwrap();
        index.verify(&a, &acc).unwrap();
        assert_eq!(
            index.find_first(&a, &acc, &str_payload(&s3)).unwrap(),
            Some(ObjKey(2))
        );
        // The shorter strings still resolve on their own.
        assert_eq!(
            index.find_first(&a, &acc, &str_payload(&s1)).unwrap(),
            Some(ObjKey(0))
        );
    }

    #[test]
    fn test_prefix_exhaustion_forces_terminal_list() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        // Shared 240-byte prefix exceeds the offset budget.
        let prefix = "x".repeat(240);
        let s1 = format!("{}1", prefix);
        let s2 = format!("{}2", prefix);
        acc.set_str(0, &s1);
        acc.set_str(1, &s2);
        index.insert(&mut a, &acc, ObjKey(0), &str_payload(&s1)).unwrap();
        index.insert(&mut a, &acc, ObjKey(1), &str_payload(&s2)).unwrap();
        index.verify(&a, &acc).unwrap();

        assert_eq!(
            index.find_all(&a, &acc, &str_payload(&s1), false).unwrap(),
            vec![ObjKey(0)]
        );
        assert_eq!(
            index.find_all(&a, &acc, &str_payload(&s2), false).unwrap(),
            vec![ObjKey(1)]
        );
    }

    #[test]
    fn test_embedded_nul_distinguished_from_prefix() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        acc.set_str(0, "ab");
        acc.set(1, IndexPayload::String("ab\0".to_string()));
        index.insert(&mut a, &acc, ObjKey(0), &str_payload("ab")).unwrap();
        index
            .insert(&mut a, &acc, ObjKey(1), &IndexPayload::String("ab\0".to_string()))
            .unwrap();
        index.verify(&a, &acc).unwrap();

        assert_eq!(
            index.find_all(&a, &acc, &str_payload("ab"), false).unwrap(),
            vec![ObjKey(0)]
        );
        assert_eq!(
            index
                .find_all(&a, &acc, &IndexPayload::String("ab\0".to_string()), false)
                .unwrap(),
            vec![ObjKey(1)]
        );
    }

    #[test]
    fn test_case_insensitive_find() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        for (k, w) in ["John", "john", "JOHN", "Jane"].iter().enumerate() {
            acc.set_str(k as i64, w);
            index
                .insert(&mut a, &acc, ObjKey(k as i64), &str_payload(w))
                .unwrap();
        }
        let hits = index.find_all(&a, &acc, &str_payload("JOHN"), true).unwrap();
        assert_eq!(hits, vec![ObjKey(0), ObjKey(1), ObjKey(2)]);

        // Case-sensitive only sees the exact form.
        let exact = index.find_all(&a, &acc, &str_payload("JOHN"), false).unwrap();
        assert_eq!(exact, vec![ObjKey(2)]);
    }

    #[test]
    fn test_insert_idempotent() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        acc.set_str(7, "same");
        for _ in 0..3 {
            index.insert(&mut a, &acc, ObjKey(7), &str_payload("same")).unwrap();
        }
        assert_eq!(index.count(&a, &acc, &str_payload("same")).unwrap(), 1);

        // Also idempotent inside a duplicate list.
        acc.set_str(8, "same");
        index.insert(&mut a, &acc, ObjKey(8), &str_payload("same")).unwrap();
        index.insert(&mut a, &acc, ObjKey(8), &str_payload("same")).unwrap();
        assert_eq!(index.count(&a, &acc, &str_payload("same")).unwrap(), 2);
        index.verify(&a, &acc).unwrap();
    }

    #[test]
    fn test_erase_collapses() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        let words = ["red", "green", "green", "blue"];
        for (k, w) in words.iter().enumerate() {
            acc.set_str(k as i64, w);
            index
                .insert(&mut a, &acc, ObjKey(k as i64), &str_payload(w))
                .unwrap();
        }
        // Erasing one duplicate keeps the other.
        index.erase(&mut a, &acc, ObjKey(1), &str_payload("green")).unwrap();
        acc.remove(1);
        assert_eq!(
            index.find_all(&a, &acc, &str_payload("green"), false).unwrap(),
            vec![ObjKey(2)]
        );
        index.verify(&a, &acc).unwrap();

        // Erasing a missing pair is a no-op.
        index.erase(&mut a, &acc, ObjKey(42), &str_payload("red")).unwrap();
        assert_eq!(index.count(&a, &acc, &str_payload("red")).unwrap(), 1);

        // Draining everything leaves an empty index.
        index.erase(&mut a, &acc, ObjKey(0), &str_payload("red")).unwrap();
        index.erase(&mut a, &acc, ObjKey(2), &str_payload("green")).unwrap();
        index.erase(&mut a, &acc, ObjKey(3), &str_payload("blue")).unwrap();
        assert!(index.is_empty(&a));
    }

    #[test]
    fn test_update_ref_moves_key() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        acc.set_str(1, "value");
        index.insert(&mut a, &acc, ObjKey(1), &str_payload("value")).unwrap();
        acc.set_str(9, "value");
        acc.remove(1);
        index
            .update_ref(&mut a, &acc, ObjKey(1), ObjKey(9), &str_payload("value"))
            .unwrap();
        assert_eq!(
            index.find_all(&a, &acc, &str_payload("value"), false).unwrap(),
            vec![ObjKey(9)]
        );
    }

    #[test]
    fn test_find_result_no_copy() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        acc.set_str(0, "solo");
        index.insert(&mut a, &acc, ObjKey(0), &str_payload("solo")).unwrap();
        assert_eq!(
            index.find_all_no_copy(&a, &acc, &str_payload("solo")).unwrap(),
            FindResult::Single(ObjKey(0))
        );
        assert_eq!(
            index.find_all_no_copy(&a, &acc, &str_payload("none")).unwrap(),
            FindResult::NotFound
        );

        acc.set_str(1, "dup");
        acc.set_str(2, "dup");
        index.insert(&mut a, &acc, ObjKey(1), &str_payload("dup")).unwrap();
        index.insert(&mut a, &acc, ObjKey(2), &str_payload("dup")).unwrap();
        match index.find_all_no_copy(&a, &acc, &str_payload("dup")).unwrap() {
            FindResult::Column { start, end, .. } => assert_eq!(end - start, 2),
            other => panic!("expected column slice, got {:?}", other),
        }
    }

    #[test]
    fn test_null_values_indexed() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        acc.set(0, IndexPayload::Null);
        acc.set_str(1, "");
        index.insert(&mut a, &acc, ObjKey(0), &IndexPayload::Null).unwrap();
        index.insert(&mut a, &acc, ObjKey(1), &str_payload("")).unwrap();

        // Null and empty string collide on the chunk but stay distinct.
        assert_eq!(
            index.find_all(&a, &acc, &IndexPayload::Null, false).unwrap(),
            vec![ObjKey(0)]
        );
        assert_eq!(
            index.find_all(&a, &acc, &str_payload(""), false).unwrap(),
            vec![ObjKey(1)]
        );
    }

    #[test]
    fn test_trie_range_scan() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        for (k, w) in ["apple", "banana", "cherry", "date", "elder"].iter().enumerate() {
            acc.set_str(k as i64, w);
            index
                .insert(&mut a, &acc, ObjKey(k as i64), &str_payload(w))
                .unwrap();
        }
        let hits = index
            .find_all_range(&a, &acc, &str_payload("banana"), &str_payload("date"))
            .unwrap();
        assert_eq!(hits, vec![ObjKey(1), ObjKey(2), ObjKey(3)]);
    }

    #[test]
    fn test_trie_many_values_node_splits() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = StringIndex::create(&mut a).unwrap();

        // Distinct leading chunks far beyond one node's fan-out.
        for k in 0..600i64 {
            let w = format!("{:04}suffix", k);
            acc.set_str(k, &w);
            index.insert(&mut a, &acc, ObjKey(k), &str_payload(&w)).unwrap();
        }
        index.verify(&a, &acc).unwrap();
        for k in (0..600i64).step_by(37) {
            let w = format!("{:04}suffix", k);
            assert_eq!(
                index.find_first(&a, &acc, &str_payload(&w)).unwrap(),
                Some(ObjKey(k)),
                "lost key {}",
                k
            );
        }
        // And tear it all down again.
        for k in 0..600i64 {
            let w = format!("{:04}suffix", k);
            index.erase(&mut a, &acc, ObjKey(k), &str_payload(&w)).unwrap();
        }
        assert!(index.is_empty(&a));
    }

    // ---- radix -----------------------------------------------------------

    #[test]
    fn test_radix_basic_roundtrip() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = RadixTree::create(&mut a, 6, 4).unwrap();

        for (k, v) in [(0i64, 10i64), (1, -5), (2, 10), (3, i64::MAX), (4, i64::MIN)] {
            acc.set_int(k, v);
            index.insert(&mut a, &acc, ObjKey(k), &int_payload(v)).unwrap();
        }
        index.verify(&a, &acc).unwrap();

        assert_eq!(
            index.find_all(&a, &acc, &int_payload(10), false).unwrap(),
            vec![ObjKey(0), ObjKey(2)]
        );
        assert_eq!(
            index.find_first(&a, &acc, &int_payload(-5)).unwrap(),
            Some(ObjKey(1))
        );
        assert_eq!(
            index.find_first(&a, &acc, &int_payload(11)).unwrap(),
            None
        );
        assert!(index.has_duplicates(&a, &acc).unwrap());
    }

    #[test]
    fn test_radix_compact_list_expansion() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        // Small threshold exercises fan-out quickly.
        let mut index = RadixTree::create(&mut a, 8, 3).unwrap();

        for v in 0..50i64 {
            acc.set_int(v, v * 3);
            index.insert(&mut a, &acc, ObjKey(v), &int_payload(v * 3)).unwrap();
        }
        index.verify(&a, &acc).unwrap();
        for v in 0..50i64 {
            assert_eq!(
                index.find_first(&a, &acc, &int_payload(v * 3)).unwrap(),
                Some(ObjKey(v))
            );
        }
        assert!(!index.has_duplicates(&a, &acc).unwrap());

        for v in 0..50i64 {
            index.erase(&mut a, &acc, ObjKey(v), &int_payload(v * 3)).unwrap();
        }
        assert!(index.is_empty(&a));
    }

    #[test]
    fn test_radix_range() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = RadixTree::create(&mut a, 6, 2).unwrap();

        for v in [-100i64, -1, 0, 1, 50, 1000] {
            acc.set_int(v, v);
            index.insert(&mut a, &acc, ObjKey(v), &int_payload(v)).unwrap();
        }
        let hits = index
            .find_all_range(&a, &acc, &int_payload(-1), &int_payload(50))
            .unwrap();
        assert_eq!(hits, vec![ObjKey(-1), ObjKey(0), ObjKey(1), ObjKey(50)]);
    }

    #[test]
    fn test_radix_nulls() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = RadixTree::create(&mut a, 6, 4).unwrap();

        acc.set(0, IndexPayload::Null);
        acc.set(1, IndexPayload::Null);
        acc.set_int(2, 9);
        index.insert(&mut a, &acc, ObjKey(0), &IndexPayload::Null).unwrap();
        index.insert(&mut a, &acc, ObjKey(1), &IndexPayload::Null).unwrap();
        index.insert(&mut a, &acc, ObjKey(2), &int_payload(9)).unwrap();

        assert_eq!(
            index.find_all(&a, &acc, &IndexPayload::Null, false).unwrap(),
            vec![ObjKey(0), ObjKey(1)]
        );
        assert!(index.has_duplicates(&a, &acc).unwrap());
        index.erase(&mut a, &acc, ObjKey(0), &IndexPayload::Null).unwrap();
        index.erase(&mut a, &acc, ObjKey(1), &IndexPayload::Null).unwrap();
        assert_eq!(
            index.find_all(&a, &acc, &IndexPayload::Null, false).unwrap(),
            Vec::<ObjKey>::new()
        );
    }

    #[test]
    fn test_radix_distinct() {
        let (_d, mut a) = arena();
        let acc = MapAccessor::new();
        let mut index = RadixTree::create(&mut a, 6, 4).unwrap();

        for (k, v) in [(0i64, 5i64), (1, 5), (2, 7), (3, 5)] {
            acc.set_int(k, v);
            index.insert(&mut a, &acc, ObjKey(k), &int_payload(v)).unwrap();
        }
        let distinct = index.distinct(&a, &acc).unwrap();
        assert_eq!(distinct, vec![ObjKey(0), ObjKey(2)]);
    }
}
