// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::error::TroveError;
    use crate::group::Group;
    use crate::keys::{CollectionKind, ObjKey, TableKey};
    use crate::value::{ColumnType, Value};
    use crate::view::TableView;

    fn open_group() -> (tempfile::TempDir, Group) {
        let dir = tempfile::tempdir().unwrap();
        let g = Group::open(dir.path().join("v.trove")).unwrap();
        (dir, g)
    }

    fn string_table(g: &mut Group, values: &[Option<&str>]) -> TableKey {
        let t = g.add_table("rows").unwrap();
        g.add_column(t, ColumnType::String, "s", true).unwrap();
        for v in values {
            let k = g.create_object(t).unwrap();
            match v {
                Some(s) => g.set_value(t, k, "s", Value::String((*s).into())).unwrap(),
                None => {}
            }
        }
        t
    }

    #[test]
    fn test_sort_then_distinct_stability() {
        let (_d, mut g) = open_group();
        // Values at keys k0..k6.
        let t = string_table(
            &mut g,
            &[
                Some(""),
                None,
                Some(""),
                None,
                Some("foo"),
                Some("foo"),
                Some("bar"),
            ],
        );
        let q = g.query_simple(t, "TRUEPREDICATE").unwrap();
        let mut view = q.run(&g).unwrap();
        view.sort(&g, vec![(vec!["s".to_string()], false)]).unwrap();
        view.distinct(&g, vec![vec!["s".to_string()]]).unwrap();

        // Descending: "foo","foo","bar","","",null,null; distinct keeps
        // the first occurrence of each value.
        let keys: Vec<ObjKey> = view.iter().collect();
        assert_eq!(keys, vec![ObjKey(4), ObjKey(6), ObjKey(0), ObjKey(1)]);
    }

    #[test]
    fn test_sort_stable_for_ties() {
        let (_d, mut g) = open_group();
        let t = g.add_table("t").unwrap();
        g.add_column(t, ColumnType::Int, "grp", false).unwrap();
        g.add_column(t, ColumnType::Int, "ord", false).unwrap();
        for (grp, ord) in [(1i64, 0i64), (0, 1), (1, 2), (0, 3)] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "grp", Value::Int(grp)).unwrap();
            g.set_value(t, k, "ord", Value::Int(ord)).unwrap();
        }
        let q = g.query_simple(t, "TRUEPREDICATE").unwrap();
        let mut view = q.run(&g).unwrap();
        view.sort(&g, vec![(vec!["grp".to_string()], true)]).unwrap();
        // Equal keys keep their input (key) order.
        let keys: Vec<ObjKey> = view.iter().collect();
        assert_eq!(keys, vec![ObjKey(1), ObjKey(3), ObjKey(0), ObjKey(2)]);
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let (_d, mut g) = open_group();
        let t = g.add_table("t").unwrap();
        g.add_column(t, ColumnType::Int, "n", true).unwrap();
        for v in [Some(4i64), None, Some(10), Some(1)] {
            let k = g.create_object(t).unwrap();
            if let Some(v) = v {
                g.set_value(t, k, "n", Value::Int(v)).unwrap();
            }
        }
        let view = g.query_simple(t, "TRUEPREDICATE").unwrap().run(&g).unwrap();
        assert_eq!(view.min(&g, "n").unwrap(), Value::Int(1));
        assert_eq!(view.max(&g, "n").unwrap(), Value::Int(10));
        assert_eq!(view.sum(&g, "n").unwrap(), Value::Int(15));
        assert_eq!(view.avg(&g, "n").unwrap(), Value::Double(5.0));
        assert_eq!(view.count_non_null(&g, "n").unwrap(), 3);
    }

    #[test]
    fn test_aggregate_type_checks() {
        let (_d, mut g) = open_group();
        let t = g.add_table("t").unwrap();
        g.add_column(t, ColumnType::String, "s", false).unwrap();
        g.add_column(t, ColumnType::Timestamp, "ts", false).unwrap();
        g.create_object(t).unwrap();
        let view = g.query_simple(t, "TRUEPREDICATE").unwrap().run(&g).unwrap();
        assert!(matches!(
            view.sum(&g, "s"),
            Err(TroveError::IllegalCombination { .. })
        ));
        // Timestamps order but do not sum.
        assert!(view.min(&g, "ts").is_ok());
        assert!(matches!(
            view.sum(&g, "ts"),
            Err(TroveError::IllegalCombination { .. })
        ));
    }

    #[test]
    fn test_view_find_over_view() {
        let (_d, mut g) = open_group();
        let t = string_table(&mut g, &[Some("a"), Some("b"), Some("a")]);
        let view = g.query_simple(t, "TRUEPREDICATE").unwrap().run(&g).unwrap();
        assert_eq!(
            view.find_first_value(&g, "s", &Value::String("a".into())).unwrap(),
            Some(0)
        );
        assert_eq!(
            view.find_all_value(&g, "s", &Value::String("a".into())).unwrap(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_sync_if_needed() {
        let (_d, mut g) = open_group();
        let t = g.add_table("t").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        for v in [1i64, 5, 9] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "n", Value::Int(v)).unwrap();
        }
        let q = g.query_simple(t, "n > 3").unwrap();
        let mut view = q.run(&g).unwrap();
        assert_eq!(view.len(), 2);
        assert!(view.is_in_sync(&g).unwrap());

        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "n", Value::Int(100)).unwrap();
        assert!(!view.is_in_sync(&g).unwrap());

        view.sync_if_needed(&g).unwrap();
        assert!(view.is_in_sync(&g).unwrap());
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_sync_reapplies_descriptors() {
        let (_d, mut g) = open_group();
        let t = g.add_table("t").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        for v in [3i64, 1] {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "n", Value::Int(v)).unwrap();
        }
        let q = g.query_simple(t, "TRUEPREDICATE SORT(n ASC)").unwrap();
        let mut view = q.run(&g).unwrap();
        assert_eq!(view.get_key(0), Some(ObjKey(1)));

        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "n", Value::Int(2)).unwrap();
        view.sync_if_needed(&g).unwrap();
        // New row lands in sorted position.
        let values: Vec<Value> = (0..view.len())
            .map(|i| {
                g.obj(t, view.get_key(i).unwrap())
                    .unwrap()
                    .get("n")
                    .unwrap()
            })
            .collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_view_mutation() {
        let (_d, mut g) = open_group();
        let t = string_table(&mut g, &[Some("x"), Some("y"), Some("z")]);
        let mut view = g.query_simple(t, "TRUEPREDICATE").unwrap().run(&g).unwrap();

        view.remove(&mut g, 1).unwrap();
        assert_eq!(view.len(), 2);
        assert!(g.obj(t, ObjKey(1)).is_err());

        view.remove_last(&mut g).unwrap();
        assert_eq!(view.len(), 1);

        view.clear(&mut g).unwrap();
        assert!(view.is_empty());
        assert_eq!(g.table(t).unwrap().size(g.arena()), 0);
    }

    #[test]
    fn test_backlink_view_detaches_on_anchor_delete() {
        let (_d, mut g) = open_group();
        let people = g.add_table("people").unwrap();
        g.add_column(people, ColumnType::String, "name", true).unwrap();
        g.add_column_link(people, "boss", people, CollectionKind::None).unwrap();
        let boss_col = g.table(people).unwrap().col_position("boss").unwrap();

        let boss = g.create_object(people).unwrap();
        let worker = g.create_object(people).unwrap();
        g.set_value(people, worker, "boss", Value::Link(boss)).unwrap();

        let mut view =
            TableView::from_backlinks(&g, people, boss, people, boss_col).unwrap();
        assert_eq!(view.keys(), &[worker]);
        assert!(!view.depends_on_deleted_object(&g));

        g.remove_object(people, boss).unwrap();
        assert!(view.depends_on_deleted_object(&g));
        view.sync_if_needed(&g).unwrap();
        assert!(view.is_empty());
        // Once detached the view stays permanently in sync.
        assert!(view.is_in_sync(&g).unwrap());
        g.create_object(people).unwrap();
        assert!(view.is_in_sync(&g).unwrap());
    }

    #[test]
    fn test_limit_descriptor() {
        let (_d, mut g) = open_group();
        let t = string_table(&mut g, &[Some("a"), Some("b"), Some("c")]);
        let mut view = g.query_simple(t, "TRUEPREDICATE").unwrap().run(&g).unwrap();
        view.limit(&g, 2).unwrap();
        assert_eq!(view.len(), 2);
        view.limit(&g, 10).unwrap();
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_sort_via_link_chain() {
        let (_d, mut g) = open_group();
        let people = g.add_table("people").unwrap();
        g.add_column(people, ColumnType::String, "name", true).unwrap();
        g.add_column_link(people, "boss", people, CollectionKind::None).unwrap();

        let b1 = g.create_object(people).unwrap();
        g.set_value(people, b1, "name", Value::String("zeta".into())).unwrap();
        let b2 = g.create_object(people).unwrap();
        g.set_value(people, b2, "name", Value::String("alpha".into())).unwrap();
        let w1 = g.create_object(people).unwrap();
        g.set_value(people, w1, "boss", Value::Link(b1)).unwrap();
        let w2 = g.create_object(people).unwrap();
        g.set_value(people, w2, "boss", Value::Link(b2)).unwrap();

        let q = g.query_simple(people, "boss != NULL").unwrap();
        let mut view = q.run(&g).unwrap();
        view.sort(&g, vec![(vec!["boss".to_string(), "name".to_string()], true)])
            .unwrap();
        let keys: Vec<ObjKey> = view.iter().collect();
        assert_eq!(keys, vec![w2, w1]);
    }
}
