// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::error::TroveError;
    use crate::group::Group;
    use crate::keys::{CollectionKind, ObjKey, TableKey};
    use crate::tql::{ArgumentList, Expression, KeyPathMapping};
    use crate::value::{ColumnType, Value};

    fn open_group() -> (tempfile::TempDir, Group) {
        let dir = tempfile::tempdir().unwrap();
        let g = Group::open(dir.path().join("q.trove")).unwrap();
        (dir, g)
    }

    fn people_with_friend(g: &mut Group) -> TableKey {
        let people = g.add_table("people").unwrap();
        g.add_column(people, ColumnType::String, "name", true).unwrap();
        g.add_column(people, ColumnType::Int, "age", false).unwrap();
        g.add_column_link(people, "friend", people, CollectionKind::None)
            .unwrap();
        people
    }

    #[test]
    fn test_simple_filters() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        for (name, age) in [("Ann", 30i64), ("Bob", 17), ("Cyd", 45)] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "name", Value::String(name.into())).unwrap();
            g.set_value(t, k, "age", Value::Int(age)).unwrap();
        }

        let q = g.query_simple(t, "age >= 18").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(2)]);
        assert_eq!(q.count(&g).unwrap(), 2);

        let q = g.query_simple(t, "name == 'Bob' OR age > 40").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(1), ObjKey(2)]);

        let q = g.query_simple(t, "NOT age < 18").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(2)]);

        // Result keys are strictly ascending without a sort.
        let q = g.query_simple(t, "TRUEPREDICATE").unwrap();
        let keys = q.find_all(&g).unwrap();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_find_first_with_start() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        for age in [10i64, 20, 30, 40] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "age", Value::Int(age)).unwrap();
        }
        let q = g.query_simple(t, "age >= 20").unwrap();
        assert_eq!(q.find_first(&g, None).unwrap(), Some(ObjKey(1)));
        assert_eq!(q.find_first(&g, Some(ObjKey(2))).unwrap(), Some(ObjKey(2)));
        assert_eq!(q.find_first(&g, Some(ObjKey(4))).unwrap(), None);
    }

    #[test]
    fn test_link_traversal_two_hops() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        let r0 = g.create_object(t).unwrap();
        let r1 = g.create_object(t).unwrap();
        let r2 = g.create_object(t).unwrap();
        g.set_value(t, r0, "friend", Value::Link(r1)).unwrap();
        g.set_value(t, r1, "friend", Value::Link(r2)).unwrap();
        g.set_value(t, r2, "name", Value::String("Alice".into())).unwrap();

        let q = g.query_simple(t, "friend.friend.name == 'Alice'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![r0]);

        // Broken links produce no match rather than an error.
        g.remove_object(t, r2).unwrap();
        let q = g.query_simple(t, "friend.friend.name == 'Alice'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), Vec::<ObjKey>::new());
    }

    #[test]
    fn test_in_fast_path() {
        let (_d, mut g) = open_group();
        let t = g.add_table("nums").unwrap();
        g.add_column(t, ColumnType::Int, "id", false).unwrap();
        let mut keys = Vec::new();
        for id in [1i64, 2, 3, 4, 5] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "id", Value::Int(id)).unwrap();
            keys.push(k);
        }

        let q = g.query_simple(t, "id IN {2, 4, 99}").unwrap();
        // The plain-property membership lowers to the specialized node.
        assert!(matches!(q.expr, Expression::InConst { .. }));
        assert_eq!(q.find_all(&g).unwrap(), vec![keys[1], keys[3]]);

        // Same result through the index-accelerated plan.
        g.add_search_index(t, "id").unwrap();
        let q = g.query_simple(t, "id IN {2, 4, 99}").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![keys[1], keys[3]]);
    }

    #[test]
    fn test_indexed_equality_and_range() {
        let (_d, mut g) = open_group();
        let t = g.add_table("r").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        g.add_search_index(t, "n").unwrap();
        for n in 0..100i64 {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "n", Value::Int(n % 10)).unwrap();
        }
        let q = g.query_simple(t, "n == 7").unwrap();
        let hits = q.find_all(&g).unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.windows(2).all(|w| w[0] < w[1]));

        let q = crate::tql::Query::between(&g, t, "n", Value::Int(3), Value::Int(5)).unwrap();
        assert_eq!(q.find_all(&g).unwrap().len(), 30);
    }

    #[test]
    fn test_quantifiers_over_collection() {
        let (_d, mut g) = open_group();
        let t = g.add_table("s").unwrap();
        g.add_column_collection(t, ColumnType::Int, "scores", false, CollectionKind::List)
            .unwrap();
        let lists = [vec![5i64, 6, 7], vec![2, 9], vec![], vec![9, 9]];
        for list in &lists {
            let k = g.create_object(t).unwrap();
            g.set_value(
                t,
                k,
                "scores",
                Value::List(list.iter().map(|v| Value::Int(*v)).collect()),
            )
            .unwrap();
        }

        let q = g.query_simple(t, "ANY scores > 8").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(1), ObjKey(3)]);

        // ALL is vacuously true on the empty list.
        let q = g.query_simple(t, "ALL scores > 4").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(2), ObjKey(3)]);

        let q = g.query_simple(t, "NONE scores > 8").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(2)]);
    }

    #[test]
    fn test_aggregates_and_postops() {
        let (_d, mut g) = open_group();
        let t = g.add_table("s").unwrap();
        g.add_column(t, ColumnType::String, "name", false).unwrap();
        g.add_column_collection(t, ColumnType::Int, "scores", false, CollectionKind::List)
            .unwrap();
        let k0 = g.create_object(t).unwrap();
        g.set_value(t, k0, "name", Value::String("abcd".into())).unwrap();
        g.set_value(
            t,
            k0,
            "scores",
            Value::List(vec![Value::Int(4), Value::Int(6)]),
        )
        .unwrap();
        let k1 = g.create_object(t).unwrap();
        g.set_value(t, k1, "name", Value::String("xy".into())).unwrap();

        let q = g.query_simple(t, "scores.@avg >= 5").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
        let q = g.query_simple(t, "scores.@sum == 10").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
        let q = g.query_simple(t, "scores.@count == 0").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k1]);
        let q = g.query_simple(t, "scores.@min == 4 AND scores.@max == 6").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
        let q = g.query_simple(t, "name.@size == 4").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
    }

    #[test]
    fn test_backlink_queries() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        let a = g.create_object(t).unwrap();
        let b = g.create_object(t).unwrap();
        let c = g.create_object(t).unwrap();
        g.set_value(t, b, "friend", Value::Link(a)).unwrap();
        g.set_value(t, c, "friend", Value::Link(a)).unwrap();

        // Rows referenced by at least one 'friend' link.
        let q = g
            .query_simple(t, "@links.people.friend.@count > 0")
            .unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![a]);

        // Hop back to the origins' names.
        g.set_value(t, b, "name", Value::String("Bea".into())).unwrap();
        let q = g
            .query_simple(t, "@links.people.friend.name == 'Bea'")
            .unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![a]);
    }

    #[test]
    fn test_string_operators() {
        let (_d, mut g) = open_group();
        let t = g.add_table("s").unwrap();
        g.add_column(t, ColumnType::String, "s", true).unwrap();
        for v in ["Hello World", "hello there", "Goodbye", ""] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "s", Value::String(v.into())).unwrap();
        }

        let q = g.query_simple(t, "s BEGINSWITH 'Hello'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0)]);
        let q = g.query_simple(t, "s BEGINSWITH[c] 'hello'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(1)]);
        let q = g.query_simple(t, "s ENDSWITH 'World'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0)]);
        let q = g.query_simple(t, "s CONTAINS 'o'").unwrap();
        assert_eq!(
            q.find_all(&g).unwrap(),
            vec![ObjKey(0), ObjKey(1), ObjKey(2)]
        );
        let q = g.query_simple(t, "s LIKE '*ello*'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0), ObjKey(1)]);
        let q = g.query_simple(t, "s TEXT 'hello world'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0)]);
        let q = g.query_simple(t, "s == ''").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(3)]);
    }

    #[test]
    fn test_arguments() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        for (name, age) in [("Ann", 30i64), ("Bob", 17)] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "name", Value::String(name.into())).unwrap();
            g.set_value(t, k, "age", Value::Int(age)).unwrap();
        }
        let mapping = KeyPathMapping::new();

        let args = ArgumentList::new(vec![Value::Int(20), Value::String("Ann".into())]);
        let q = g.query(t, "age > $0 AND name == $1", &args, &mapping).unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0)]);

        // Null argument.
        let args = ArgumentList::new(vec![Value::Null]);
        let q = g.query(t, "name == $0", &args, &mapping).unwrap();
        assert_eq!(q.find_all(&g).unwrap(), Vec::<ObjKey>::new());

        // List argument feeds IN.
        let args = ArgumentList::new(vec![Value::List(vec![Value::Int(17), Value::Int(99)])]);
        let q = g.query(t, "age IN $0", &args, &mapping).unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(1)]);

        // Type mismatch surfaces as an argument error.
        let args = ArgumentList::new(vec![Value::String("x".into())]);
        assert!(matches!(
            g.query(t, "age > $0", &args, &mapping),
            Err(TroveError::InvalidQueryArg { .. })
        ));
    }

    #[test]
    fn test_keypath_mapping_aliases() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "name", Value::String("Zoe".into())).unwrap();

        let mut mapping = KeyPathMapping::new();
        mapping.add_mapping(t, "nick", "name");
        let q = g
            .query(t, "nick == 'Zoe'", &ArgumentList::default(), &mapping)
            .unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k]);

        // Alias expanding to a dotted path.
        let friend = g.create_object(t).unwrap();
        g.set_value(t, friend, "name", Value::String("Pal".into())).unwrap();
        g.set_value(t, k, "friend", Value::Link(friend)).unwrap();
        mapping.add_mapping(t, "pal_name", "friend.name");
        let q = g
            .query(t, "pal_name == 'Pal'", &ArgumentList::default(), &mapping)
            .unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k]);
    }

    #[test]
    fn test_constant_folding() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        g.create_object(t).unwrap();

        let q = g.query_simple(t, "1 == 1").unwrap();
        assert!(matches!(q.expr, Expression::True));
        let q = g.query_simple(t, "2 + 2 == 5").unwrap();
        assert!(matches!(q.expr, Expression::False));
        let q = g.query_simple(t, "3 * 2 > 5.5").unwrap();
        assert!(matches!(q.expr, Expression::True));
    }

    #[test]
    fn test_compile_errors() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        g.create_object(t).unwrap();

        // Unknown property.
        assert!(matches!(
            g.query_simple(t, "nope == 1"),
            Err(TroveError::ColumnIndexOutOfRange { .. })
        ));
        // Ordered comparison on a link.
        assert!(matches!(
            g.query_simple(t, "friend > 3"),
            Err(TroveError::InvalidQuery { .. })
        ));
        // Case modifier on a non-string column.
        assert!(matches!(
            g.query_simple(t, "age ==[c] 3"),
            Err(TroveError::InvalidQuery { .. })
        ));
        // Lossy float-to-int constant.
        assert!(matches!(
            g.query_simple(t, "age == 3.5"),
            Err(TroveError::InvalidQuery { .. })
        ));
        // String operator on an int column.
        assert!(matches!(
            g.query_simple(t, "age BEGINSWITH 'x'"),
            Err(TroveError::InvalidQuery { .. })
        ));
        // Incompatible operand types.
        assert!(matches!(
            g.query_simple(t, "age == 'three'"),
            Err(TroveError::InvalidQuery { .. })
        ));
        // Syntax errors come from the parser.
        assert!(matches!(
            g.query_simple(t, "age =="),
            Err(TroveError::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_query_with_descriptors_runs() {
        let (_d, mut g) = open_group();
        let t = people_with_friend(&mut g);
        for (name, age) in [("c", 3i64), ("a", 1), ("b", 2), ("a", 9)] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "name", Value::String(name.into())).unwrap();
            g.set_value(t, k, "age", Value::Int(age)).unwrap();
        }
        let q = g
            .query_simple(t, "TRUEPREDICATE SORT(name ASC, age DESC) LIMIT(3)")
            .unwrap();
        let view = q.run(&g).unwrap();
        assert_eq!(view.len(), 3);
        // name asc, age desc inside equal names.
        assert_eq!(view.get_key(0), Some(ObjKey(3))); // ("a", 9)
        assert_eq!(view.get_key(1), Some(ObjKey(1))); // ("a", 1)
        assert_eq!(view.get_key(2), Some(ObjKey(2))); // ("b", 2)
    }

    #[test]
    fn test_dictionary_access() {
        let (_d, mut g) = open_group();
        let t = g.add_table("d").unwrap();
        g.add_column_collection(t, ColumnType::Mixed, "attrs", false, CollectionKind::Dictionary)
            .unwrap();
        let k0 = g.create_object(t).unwrap();
        g.set_value(
            t,
            k0,
            "attrs",
            Value::Dictionary(vec![
                ("color".into(), Value::String("red".into())),
                ("size".into(), Value::Int(9)),
            ]),
        )
        .unwrap();
        let k1 = g.create_object(t).unwrap();
        g.set_value(
            t,
            k1,
            "attrs",
            Value::Dictionary(vec![("color".into(), Value::String("blue".into()))]),
        )
        .unwrap();

        let q = g.query_simple(t, "attrs['color'] == 'red'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
        let q = g.query_simple(t, "ANY attrs.@keys == 'size'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k0]);
        let q = g.query_simple(t, "ANY attrs.@values == 'blue'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![k1]);
    }

    #[test]
    fn test_mixed_column_queries() {
        let (_d, mut g) = open_group();
        let t = g.add_table("m").unwrap();
        g.add_column(t, ColumnType::Mixed, "v", true).unwrap();
        let vals = [
            Value::Int(5),
            Value::String("five".into()),
            Value::Bool(true),
            Value::Null,
        ];
        for v in &vals {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "v", v.clone()).unwrap();
        }

        let q = g.query_simple(t, "v == 5").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(0)]);
        let q = g.query_simple(t, "v == 'five'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(1)]);
        let q = g.query_simple(t, "v == NULL").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(3)]);
        let q = g.query_simple(t, "v.@type == 'string'").unwrap();
        assert_eq!(q.find_all(&g).unwrap(), vec![ObjKey(1)]);
    }
}
