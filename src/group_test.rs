// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod tests {
    use crate::error::TroveError;
    use crate::group::Group;
    use crate::keys::{CollectionKind, ObjKey};
    use crate::value::{ColumnType, Timestamp, Value};
    use uuid::Uuid;

    fn open_group() -> (tempfile::TempDir, Group) {
        let dir = tempfile::tempdir().unwrap();
        let g = Group::open(dir.path().join("test.trove")).unwrap();
        (dir, g)
    }

    #[test]
    fn test_create_get_remove_object() {
        let (_d, mut g) = open_group();
        let t = g.add_table("items").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();

        let k0 = g.create_object(t).unwrap();
        let k1 = g.create_object(t).unwrap();
        assert_ne!(k0, k1);
        assert_eq!(g.table(t).unwrap().size(g.arena()), 2);

        g.set_value(t, k0, "n", Value::Int(41)).unwrap();
        assert_eq!(g.get_value(t, k0, "n").unwrap(), Value::Int(41));

        g.remove_object(t, k0).unwrap();
        assert!(matches!(
            g.obj(t, k0),
            Err(TroveError::InvalidKey { .. })
        ));
        // Keys are not reused after deletion.
        let k2 = g.create_object(t).unwrap();
        assert!(k2 > k0);
        assert!(k2 > k1);
    }

    #[test]
    fn test_explicit_key_collision_fails() {
        let (_d, mut g) = open_group();
        let t = g.add_table("items").unwrap();
        g.create_object_with_key(t, ObjKey(5)).unwrap();
        assert!(matches!(
            g.create_object_with_key(t, ObjKey(5)),
            Err(TroveError::InvalidKey { key: 5 })
        ));
        assert!(g.create_object_with_key(t, ObjKey(-1)).is_err());
    }

    #[test]
    fn test_all_scalar_types_roundtrip() {
        let (_d, mut g) = open_group();
        let t = g.add_table("all").unwrap();
        g.add_column(t, ColumnType::Int, "i", true).unwrap();
        g.add_column(t, ColumnType::Bool, "b", false).unwrap();
        g.add_column(t, ColumnType::String, "s", true).unwrap();
        g.add_column(t, ColumnType::Binary, "bin", true).unwrap();
        g.add_column(t, ColumnType::Float, "f", false).unwrap();
        g.add_column(t, ColumnType::Double, "d", true).unwrap();
        g.add_column(t, ColumnType::Decimal, "dec", false).unwrap();
        g.add_column(t, ColumnType::Timestamp, "ts", false).unwrap();
        g.add_column(t, ColumnType::Uuid, "u", false).unwrap();
        g.add_column(t, ColumnType::Mixed, "m", true).unwrap();

        let k = g.create_object(t).unwrap();
        let uuid = Uuid::new_v4();
        let ts = Timestamp::new(1_700_000_000, 999).unwrap();
        g.set_value(t, k, "i", Value::Int(i64::MIN)).unwrap();
        g.set_value(t, k, "b", Value::Bool(true)).unwrap();
        g.set_value(t, k, "s", Value::String("héllo\0world".into()))
            .unwrap();
        g.set_value(t, k, "bin", Value::Binary(vec![0, 1, 255])).unwrap();
        g.set_value(t, k, "f", Value::Float(1.5)).unwrap();
        g.set_value(t, k, "d", Value::Double(-2.25)).unwrap();
        g.set_value(
            t,
            k,
            "dec",
            Value::Decimal(crate::value::Decimal128::parse("12.34").unwrap()),
        )
        .unwrap();
        g.set_value(t, k, "ts", Value::Timestamp(ts)).unwrap();
        g.set_value(t, k, "u", Value::Uuid(uuid)).unwrap();
        g.set_value(t, k, "m", Value::String("mixed".into())).unwrap();

        assert_eq!(g.get_value(t, k, "i").unwrap(), Value::Int(i64::MIN));
        assert_eq!(g.get_value(t, k, "b").unwrap(), Value::Bool(true));
        assert_eq!(
            g.get_value(t, k, "s").unwrap(),
            Value::String("héllo\0world".into())
        );
        assert_eq!(
            g.get_value(t, k, "bin").unwrap(),
            Value::Binary(vec![0, 1, 255])
        );
        assert_eq!(g.get_value(t, k, "f").unwrap(), Value::Float(1.5));
        assert_eq!(g.get_value(t, k, "d").unwrap(), Value::Double(-2.25));
        assert_eq!(g.get_value(t, k, "ts").unwrap(), Value::Timestamp(ts));
        assert_eq!(g.get_value(t, k, "u").unwrap(), Value::Uuid(uuid));
        assert_eq!(
            g.get_value(t, k, "m").unwrap(),
            Value::String("mixed".into())
        );

        // Null round-trips on nullable columns only.
        g.set_null(t, k, "i").unwrap();
        assert_eq!(g.get_value(t, k, "i").unwrap(), Value::Null);
        assert!(matches!(
            g.set_null(t, k, "b"),
            Err(TroveError::ColumnNotNullable { .. })
        ));
    }

    #[test]
    fn test_null_vs_empty_string() {
        let (_d, mut g) = open_group();
        let t = g.add_table("strs").unwrap();
        g.add_column(t, ColumnType::String, "s", true).unwrap();
        let k0 = g.create_object(t).unwrap();
        let k1 = g.create_object(t).unwrap();
        g.set_value(t, k0, "s", Value::String(String::new())).unwrap();
        g.set_null(t, k1, "s").unwrap();
        assert_eq!(g.get_value(t, k0, "s").unwrap(), Value::String(String::new()));
        assert_eq!(g.get_value(t, k1, "s").unwrap(), Value::Null);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let (_d, mut g) = open_group();
        let t = g.add_table("typed").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        let k = g.create_object(t).unwrap();
        assert!(matches!(
            g.set_value(t, k, "n", Value::String("nope".into())),
            Err(TroveError::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.set_value(t, k, "missing", Value::Int(1)),
            Err(TroveError::ColumnIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_column_name_length_cap() {
        let (_d, mut g) = open_group();
        let t = g.add_table("caps").unwrap();
        let long = "x".repeat(64);
        assert!(matches!(
            g.add_column(t, ColumnType::Int, &long, false),
            Err(TroveError::ColumnNameTooLong { .. })
        ));
        let ok = "x".repeat(63);
        assert!(g.add_column(t, ColumnType::Int, &ok, false).is_ok());
    }

    #[test]
    fn test_commit_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persist.trove");
        let t_key;
        let obj_key;
        {
            let mut g = Group::open(&path).unwrap();
            let t = g.add_table("notes").unwrap();
            g.add_column(t, ColumnType::String, "text", false).unwrap();
            g.add_column(t, ColumnType::Int, "rank", false).unwrap();
            g.add_search_index(t, "text").unwrap();
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "text", Value::String("remember".into()))
                .unwrap();
            g.set_value(t, k, "rank", Value::Int(3)).unwrap();
            g.commit().unwrap();
            t_key = t;
            obj_key = k;
        }
        let g = Group::open(&path).unwrap();
        assert_eq!(
            g.get_value(t_key, obj_key, "text").unwrap(),
            Value::String("remember".into())
        );
        assert_eq!(g.get_value(t_key, obj_key, "rank").unwrap(), Value::Int(3));
        // The persisted search index still answers.
        assert_eq!(
            g.find_first_value(t_key, "text", &Value::String("remember".into()))
                .unwrap(),
            Some(obj_key)
        );
    }

    #[test]
    fn test_rollback_discards_changes() {
        let (_d, mut g) = open_group();
        let t = g.add_table("r").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "n", Value::Int(1)).unwrap();
        g.commit().unwrap();

        g.set_value(t, k, "n", Value::Int(2)).unwrap();
        let k2 = g.create_object(t).unwrap();
        g.rollback().unwrap();

        assert_eq!(g.get_value(t, k, "n").unwrap(), Value::Int(1));
        assert!(g.obj(t, k2).is_err());
    }

    #[test]
    fn test_links_and_backlinks() {
        let (_d, mut g) = open_group();
        let people = g.add_table("people").unwrap();
        g.add_column(people, ColumnType::String, "name", false).unwrap();
        let dogs = g.add_table("dogs").unwrap();
        g.add_column(dogs, ColumnType::String, "name", false).unwrap();
        g.add_column_link(dogs, "owner", people, CollectionKind::None)
            .unwrap();
        let owner_col = g.table(dogs).unwrap().col_position("owner").unwrap();

        let alice = g.create_object(people).unwrap();
        let rex = g.create_object(dogs).unwrap();
        let fido = g.create_object(dogs).unwrap();
        g.set_value(dogs, rex, "owner", Value::Link(alice)).unwrap();
        g.set_value(dogs, fido, "owner", Value::Link(alice)).unwrap();

        let links = g.obj(people, alice).unwrap().backlinks(dogs, owner_col);
        assert_eq!(links, vec![rex, fido]);

        // Re-pointing one link updates the backlink cell.
        g.set_null(dogs, rex, "owner").unwrap();
        let links = g.obj(people, alice).unwrap().backlinks(dogs, owner_col);
        assert_eq!(links, vec![fido]);

        // Linking to a missing row fails up front.
        assert!(matches!(
            g.set_value(dogs, rex, "owner", Value::Link(ObjKey(999))),
            Err(TroveError::TargetRowIndexOutOfRange { key: 999 })
        ));

        // Deleting the target nullifies remaining origins.
        g.remove_object(people, alice).unwrap();
        assert_eq!(g.get_value(dogs, fido, "owner").unwrap(), Value::Null);
    }

    #[test]
    fn test_link_list_backlinks() {
        let (_d, mut g) = open_group();
        let people = g.add_table("people").unwrap();
        g.add_column(people, ColumnType::String, "name", false).unwrap();
        g.add_column_link(people, "friends", people, CollectionKind::List)
            .unwrap();
        let friends_col = g.table(people).unwrap().col_position("friends").unwrap();

        let a = g.create_object(people).unwrap();
        let b = g.create_object(people).unwrap();
        let c = g.create_object(people).unwrap();
        g.set_value(
            people,
            a,
            "friends",
            Value::List(vec![Value::Link(b), Value::Link(c)]),
        )
        .unwrap();

        assert_eq!(
            g.obj(people, b).unwrap().backlinks(people, friends_col),
            vec![a]
        );
        // Removing a linked row drops it from the origin list.
        g.remove_object(people, c).unwrap();
        assert_eq!(
            g.get_value(people, a, "friends").unwrap(),
            Value::List(vec![Value::Link(b)])
        );
    }

    #[test]
    fn test_collections_roundtrip() {
        let (_d, mut g) = open_group();
        let t = g.add_table("coll").unwrap();
        g.add_column_collection(t, ColumnType::Int, "nums", false, CollectionKind::List)
            .unwrap();
        g.add_column_collection(t, ColumnType::String, "tags", false, CollectionKind::Set)
            .unwrap();
        g.add_column_collection(t, ColumnType::Mixed, "meta", false, CollectionKind::Dictionary)
            .unwrap();

        let k = g.create_object(t).unwrap();
        assert_eq!(g.get_value(t, k, "nums").unwrap(), Value::List(vec![]));

        g.set_value(
            t,
            k,
            "nums",
            Value::List(vec![Value::Int(3), Value::Int(1)]),
        )
        .unwrap();
        g.set_value(
            t,
            k,
            "meta",
            Value::Dictionary(vec![("a".into(), Value::Bool(true))]),
        )
        .unwrap();
        assert_eq!(
            g.get_value(t, k, "nums").unwrap(),
            Value::List(vec![Value::Int(3), Value::Int(1)])
        );
        assert_eq!(
            g.get_value(t, k, "meta").unwrap(),
            Value::Dictionary(vec![("a".into(), Value::Bool(true))])
        );
    }

    #[test]
    fn test_search_index_maintenance() {
        let (_d, mut g) = open_group();
        let t = g.add_table("idx").unwrap();
        g.add_column(t, ColumnType::String, "s", true).unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        g.add_search_index(t, "s").unwrap();
        g.add_search_index(t, "n").unwrap();

        let mut keys = Vec::new();
        for i in 0..20i64 {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "s", Value::String(format!("v{}", i % 5))).unwrap();
            g.set_value(t, k, "n", Value::Int(i % 3)).unwrap();
            keys.push(k);
        }
        let hits = g
            .find_all_value(t, "s", &Value::String("v2".into()))
            .unwrap();
        assert_eq!(hits.len(), 4);
        let hits = g.find_all_value(t, "n", &Value::Int(1)).unwrap();
        assert_eq!(hits.len(), 7);

        // Updates move the row between index buckets.
        g.set_value(t, keys[0], "s", Value::String("fresh".into())).unwrap();
        assert_eq!(
            g.find_all_value(t, "s", &Value::String("fresh".into())).unwrap(),
            vec![keys[0]]
        );
        assert_eq!(
            g.find_all_value(t, "s", &Value::String("v0".into())).unwrap().len(),
            3
        );

        // Removal drops the entries.
        g.remove_object(t, keys[0]).unwrap();
        assert!(g
            .find_all_value(t, "s", &Value::String("fresh".into()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_index_illegal_types() {
        let (_d, mut g) = open_group();
        let t = g.add_table("bad").unwrap();
        g.add_column(t, ColumnType::Double, "d", false).unwrap();
        g.add_column(t, ColumnType::Binary, "b", false).unwrap();
        g.add_column_collection(t, ColumnType::Int, "list", false, CollectionKind::List)
            .unwrap();
        for name in ["d", "b", "list"] {
            assert!(matches!(
                g.add_search_index(t, name),
                Err(TroveError::IllegalCombination { .. })
            ));
        }
    }

    #[test]
    fn test_clear_table_releases_everything() {
        let (_d, mut g) = open_group();
        let t = g.add_table("c").unwrap();
        g.add_column(t, ColumnType::String, "s", false).unwrap();
        g.add_search_index(t, "s").unwrap();
        for i in 0..300 {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "s", Value::String(format!("row{}", i))).unwrap();
        }
        g.clear_table(t).unwrap();
        assert_eq!(g.table(t).unwrap().size(g.arena()), 0);
        assert!(g
            .find_first_value(t, "s", &Value::String("row7".into()))
            .unwrap()
            .is_none());
        // The table remains usable.
        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "s", Value::String("new".into())).unwrap();
        assert_eq!(g.table(t).unwrap().size(g.arena()), 1);
    }

    #[test]
    fn test_add_column_to_populated_table() {
        let (_d, mut g) = open_group();
        let t = g.add_table("grow").unwrap();
        g.add_column(t, ColumnType::Int, "a", false).unwrap();
        let k = g.create_object(t).unwrap();
        g.set_value(t, k, "a", Value::Int(7)).unwrap();

        g.add_column(t, ColumnType::String, "b", true).unwrap();
        assert_eq!(g.get_value(t, k, "a").unwrap(), Value::Int(7));
        assert_eq!(g.get_value(t, k, "b").unwrap(), Value::Null);

        g.remove_column(t, "a").unwrap();
        assert!(g.get_value(t, k, "a").is_err());
        assert_eq!(g.get_value(t, k, "b").unwrap(), Value::Null);
    }

    #[test]
    fn test_table_management_errors() {
        let (_d, mut g) = open_group();
        let t = g.add_table("one").unwrap();
        assert!(matches!(
            g.add_table("one"),
            Err(TroveError::TableAlreadyExists { .. })
        ));
        let two = g.add_table("two").unwrap();
        g.add_column_link(two, "ref", t, CollectionKind::None).unwrap();
        // A link target cannot be removed while referenced.
        assert!(matches!(
            g.remove_table(t),
            Err(TroveError::IllegalCombination { .. })
        ));
        g.remove_table(two).unwrap();
        g.remove_table(t).unwrap();
        assert!(g.table_by_name("one").is_err());
    }

    #[test]
    fn test_set_json_mixed() {
        let (_d, mut g) = open_group();
        let t = g.add_table("m").unwrap();
        g.add_column(t, ColumnType::Mixed, "payload", true).unwrap();
        let k = g.create_object(t).unwrap();
        g.set_json(t, k, "payload", r#"{"depth": [1, 2.5, null]}"#).unwrap();
        match g.get_value(t, k, "payload").unwrap() {
            Value::Dictionary(entries) => {
                assert_eq!(entries[0].0, "depth");
            }
            other => panic!("expected dictionary, got {:?}", other),
        }
        assert!(matches!(
            g.set_json(t, k, "payload", "{broken"),
            Err(TroveError::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_second_writer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.trove");
        let _g1 = Group::open(&path).unwrap();
        let opts = crate::config::DbOptions {
            lock_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            Group::open_with_options(&path, opts),
            Err(TroveError::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_many_rows_span_clusters() {
        let (_d, mut g) = open_group();
        let t = g.add_table("big").unwrap();
        g.add_column(t, ColumnType::Int, "n", false).unwrap();
        for i in 0..1000i64 {
            let k = g.create_object(t).unwrap();
            g.set_value(t, k, "n", Value::Int(i * i)).unwrap();
        }
        assert_eq!(g.table(t).unwrap().size(g.arena()), 1000);
        // Spot checks across leaves.
        for probe in [0i64, 255, 256, 511, 999] {
            assert_eq!(
                g.get_value(t, ObjKey(probe), "n").unwrap(),
                Value::Int(probe * probe)
            );
        }
        // Iteration covers exactly the created keys, in order.
        let keys = g.table(t).unwrap().tree.keys(g.arena());
        assert_eq!(keys.len(), 1000);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }
}
