//! Indexed object store for nestdb.
//!
//! Entities live as rows (buckets) inside a transactional nested key space.
//! A [`Schema`] declares the stores, their fields, secondary indexes,
//! foreign keys and many-to-many link collections; every mutation keeps the
//! indexes and both sides of every relationship consistent inside the same
//! transaction, and an offline integrity pass can verify and repair them.
//!
//! # Key Types
//!
//! - [`Schema`] / [`SchemaBuilder`] -- the immutable registry of stores
//! - [`Store`] -- per-entity-type CRUD, queries and link accessors
//! - [`MutateContext`] -- one write transaction with a sticky error
//! - [`Record`] -- field values in transport form; [`Entity`] for typed rows
//! - [`Symbol`] -- a resolved field name, possibly chained across stores
//! - [`EventBus`] -- post-commit entity events
//!
//! # Quick Start
//!
//! ```rust
//! use nest_codec::Tag;
//! use nest_kv::Database;
//! use nest_store::{Record, Schema, StoreConfig};
//!
//! let mut builder = Schema::builder(StoreConfig::default());
//! builder.store("employee").scalar("name", Tag::String).unique("name");
//! let schema = builder.build()?;
//! let db = Database::new();
//! schema.initialize(&db)?;
//!
//! let employees = schema.store("employee")?;
//! schema.mutate(&db, |ctx| {
//!     employees.create(ctx, &Record::new("e1").with("name", "Joe Hill"))
//! })?;
//!
//! let page = schema.view(&db, |tx| employees.query_ids(tx, r#"name = "Joe Hill""#))?;
//! assert_eq!(page.ids, vec!["e1"]);
//! assert_eq!(page.total, 1);
//! # Ok::<(), nest_store::StoreError>(())
//! ```

pub mod config;
mod constraint;
pub mod context;
pub mod error;
pub mod events;
pub mod integrity;
mod link;
pub mod record;
mod scan;
pub mod schema;
pub mod store;
pub mod symbol;

// Re-exports for convenience.
pub use config::StoreConfig;
pub use constraint::SetChange;
pub use context::MutateContext;
pub use error::{StoreError, StoreResult};
pub use events::{EntityEvent, EventBus, EventKind, ListenerId};
pub use integrity::{IntegrityCheck, IntegrityReport, IntegritySink};
pub use link::LinkDiff;
pub use record::{new_id, Entity, FieldValue, Record};
pub use scan::{Direction, QueryPage};
pub use schema::{FkOptions, OnDelete, Schema, SchemaBuilder, StoreBuilder, StoreId};
pub use store::Store;
pub use symbol::{EntitySymbol, Symbol, SymbolKind};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use nest_codec::{list_key, CodecError, MapEntry, MapValue, Tag, Value};
    use nest_kv::{BucketPath, Database, KvRead};
    use nest_query::QueryError;
    use parking_lot::Mutex;

    use super::*;

    /// Locations, managers and employees, plus contractors nested inside
    /// employees.
    fn fixture_builder() -> SchemaBuilder {
        fixture_builder_with(StoreConfig::default())
    }

    fn fixture_builder_with(config: StoreConfig) -> SchemaBuilder {
        let mut b = Schema::builder(config);
        b.store("location")
            .scalar("name", Tag::String)
            .link_set("employees", "employee", "locations");
        b.store("manager")
            .scalar("name", Tag::String)
            .scalar("system", Tag::Bool)
            .system_flag("system");
        b.store("employee")
            .scalar("name", Tag::String)
            .scalar("firstName", Tag::String)
            .scalar("lastName", Tag::String)
            .scalar("salary", Tag::Int64)
            .set("tags", Tag::String)
            .map("address")
            .link("manager", "manager")
            .private("salary")
            .unique_nullable("name")
            .set_index("tags")
            .foreign_key_with(
                "manager",
                "reports",
                FkOptions {
                    nullable: true,
                    on_delete: OnDelete::Restrict,
                },
            )
            .link_set("locations", "location", "employees");
        b.store("contractor")
            .child_of("employee")
            .scalar("agency", Tag::String);
        b
    }

    fn fixture() -> (Schema, Database) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let schema = fixture_builder().build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();
        (schema, db)
    }

    fn create(schema: &Schema, db: &Database, store: &str, record: Record) -> StoreResult<()> {
        let store = schema.store(store)?;
        schema.mutate(db, |ctx| store.create(ctx, &record))
    }

    fn employee(id: &str, name: &str) -> Record {
        Record::new(id).with("name", name)
    }

    fn query(schema: &Schema, db: &Database, store: &str, text: &str) -> StoreResult<QueryPage> {
        let store = schema.store(store)?;
        schema.view(db, |tx| store.query_ids(tx, text))
    }

    // -----------------------------------------------------------------------
    // 1. Unique index
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_unique_value_is_rejected() {
        let (schema, db) = fixture();
        create(&schema, &db, "employee", employee("e1", "Joe Hill")).unwrap();
        let err = create(&schema, &db, "employee", employee("e2", "Joe Hill")).unwrap_err();
        assert!(err.is_duplicate());
        match err {
            StoreError::Duplicate {
                entity_type,
                field,
                existing_id,
                ..
            } => {
                assert_eq!(entity_type, "employee");
                assert_eq!(field, "name");
                assert_eq!(existing_id, "e1");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let emp = schema.store("employee").unwrap();
        schema
            .view(&db, |tx| {
                assert!(!emp.exists(tx, "e2"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn renaming_releases_the_old_value() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe Hill")).unwrap();
        schema
            .mutate(&db, |ctx| emp.update(ctx, &employee("e1", "Joe Strummer"), None))
            .unwrap();
        // The old name is free again.
        create(&schema, &db, "employee", employee("e2", "Joe Hill")).unwrap();

        let index = BucketPath::from("meta/indexes/employee/name");
        schema
            .view(&db, |tx| {
                let hill = list_key(&Value::from("Joe Hill")).unwrap();
                let strummer = list_key(&Value::from("Joe Strummer")).unwrap();
                assert_eq!(tx.get(&index, &hill), Some(&b"e2"[..]));
                assert_eq!(tx.get(&index, &strummer), Some(&b"e1"[..]));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn swapping_values_in_one_update_sequence_fails_cleanly() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "A")).unwrap();
        create(&schema, &db, "employee", employee("e2", "B")).unwrap();
        let err = schema
            .mutate(&db, |ctx| emp.update(ctx, &employee("e1", "B"), None))
            .unwrap_err();
        assert!(err.is_duplicate());
        let loaded = schema.view(&db, |tx| emp.load_one_by_id(tx, "e1")).unwrap();
        assert_eq!(loaded.str("name"), Some("A"));
    }

    // -----------------------------------------------------------------------
    // 2. Sticky errors
    // -----------------------------------------------------------------------
    #[test]
    fn first_failure_poisons_the_transaction() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let err = schema
            .mutate(&db, |ctx| {
                emp.create(ctx, &employee("e1", "Joe"))?;
                let first = emp.create(ctx, &employee("e1", "Joe")).unwrap_err();
                assert!(matches!(first, StoreError::AlreadyExists { .. }));
                // Later calls fail fast with the recorded error.
                let again = emp.create(ctx, &employee("e2", "Ann")).unwrap_err();
                assert_eq!(again, first);
                assert!(ctx.error().is_some());
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(schema.view(&db, |tx| Ok(emp.count(tx))).unwrap(), 0);
    }

    #[test]
    fn create_validates_ids_and_fields() {
        let (schema, db) = fixture();
        let err = create(&schema, &db, "employee", Record::new("")).unwrap_err();
        assert!(matches!(err, StoreError::MissingId { .. }));

        let err = create(&schema, &db, "employee", Record::new("e1").with("nope", 1)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));

        let err = create(&schema, &db, "employee", Record::new("e1").with("name", 5)).unwrap_err();
        assert!(matches!(err, StoreError::FieldType { .. }));

        let err = create(
            &schema,
            &db,
            "employee",
            Record::new("e1").with_set("locations", ["l1"]),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyField { .. }));

        let long = "x".repeat(5000);
        let err = create(&schema, &db, "employee", Record::new(long)).unwrap_err();
        assert!(matches!(err, StoreError::KeyTooLarge { .. }));
    }

    #[test]
    fn loaded_record_writes_back_with_one_change() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let mgr = schema.store("manager").unwrap();
        create(&schema, &db, "manager", Record::new("m1").with("name", "Boss")).unwrap();
        create(
            &schema,
            &db,
            "employee",
            employee("e1", "Joe").with("manager", "m1").with_set("tags", ["x"]),
        )
        .unwrap();
        create(&schema, &db, "location", Record::new("l1")).unwrap();
        schema
            .mutate(&db, |ctx| emp.add_link(ctx, "locations", "e1", "l1"))
            .unwrap();

        let mut rec = schema.view(&db, |tx| emp.load_one_by_id(tx, "e1")).unwrap();
        assert!(rec.values("locations").is_some());
        rec.set("name", "Joe Hill");
        schema.mutate(&db, |ctx| emp.update(ctx, &rec, None)).unwrap();

        let mut boss = schema.view(&db, |tx| mgr.load_one_by_id(tx, "m1")).unwrap();
        assert_eq!(boss.values("reports"), Some(&[Value::from("e1")][..]));
        boss.set("name", "Big Boss");
        schema.mutate(&db, |ctx| mgr.update(ctx, &boss, None)).unwrap();

        schema
            .view(&db, |tx| {
                assert_eq!(emp.load_one_by_id(tx, "e1")?.str("name"), Some("Joe Hill"));
                assert_eq!(emp.get_links(tx, "locations", "e1")?, vec!["l1"]);
                assert_eq!(mgr.load_one_by_id(tx, "m1")?.str("name"), Some("Big Boss"));
                Ok(())
            })
            .unwrap();

        // Changing a maintained field through a record is still refused.
        let mut rec = schema.view(&db, |tx| emp.load_one_by_id(tx, "e1")).unwrap();
        rec.fields
            .insert("locations".into(), FieldValue::Set(vec![Value::from("l2")]));
        let err = schema.mutate(&db, |ctx| emp.update(ctx, &rec, None)).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyField { .. }), "{err:?}");
    }

    // -----------------------------------------------------------------------
    // 3. Foreign keys
    // -----------------------------------------------------------------------
    #[test]
    fn query_by_manager_returns_reports() {
        let (schema, db) = fixture();
        create(&schema, &db, "manager", Record::new("m1").with("name", "Boss")).unwrap();
        create(&schema, &db, "employee", employee("a", "Ann").with("manager", "m1")).unwrap();
        create(&schema, &db, "employee", employee("b", "Bob").with("manager", "m1")).unwrap();
        create(&schema, &db, "employee", employee("c", "Cat")).unwrap();

        let page = query(&schema, &db, "employee", r#"manager = "m1""#).unwrap();
        assert_eq!(page.ids, vec!["a", "b"]);
        assert_eq!(page.total, 2);

        let page = query(&schema, &db, "employee", r#"manager.name = "Boss""#).unwrap();
        assert_eq!(page.ids, vec!["a", "b"]);

        let mgr = schema.store("manager").unwrap();
        let page = schema
            .view(&db, |tx| mgr.query_ids(tx, r#"reports = "a""#))
            .unwrap();
        assert_eq!(page.ids, vec!["m1"]);
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let (schema, db) = fixture();
        let err = create(&schema, &db, "employee", employee("a", "Ann").with("manager", "ghost")).unwrap_err();
        match err {
            StoreError::InvalidReference {
                target_type,
                target_id,
                ..
            } => {
                assert_eq!(target_type, "manager");
                assert_eq!(target_id, "ghost");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn referenced_row_cannot_be_deleted_until_released() {
        let (schema, db) = fixture();
        let mgr = schema.store("manager").unwrap();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "manager", Record::new("m1").with("name", "Boss")).unwrap();
        create(&schema, &db, "employee", employee("a", "Ann").with("manager", "m1")).unwrap();

        let err = schema.mutate(&db, |ctx| mgr.delete_by_id(ctx, "m1")).unwrap_err();
        match &err {
            StoreError::Referenced {
                entity_type,
                id,
                referencing_type,
                referencing_id,
            } => {
                assert_eq!(entity_type, "manager");
                assert_eq!(id, "m1");
                assert_eq!(referencing_type, "employee");
                assert_eq!(referencing_id, "a");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_referenced());

        schema
            .mutate(&db, |ctx| {
                emp.update(ctx, &Record::new("a"), Some(&["manager"]))?;
                mgr.delete_by_id(ctx, "m1")
            })
            .unwrap();
        schema
            .view(&db, |tx| {
                assert!(!mgr.exists(tx, "m1"));
                assert_eq!(emp.load_one_by_id(tx, "a")?.scalar("manager"), None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn nullify_clears_references_on_delete() {
        let mut b = Schema::builder(StoreConfig::default());
        b.store("team").scalar("name", Tag::String);
        b.store("player").link("team", "team").foreign_key_with(
            "team",
            "players",
            FkOptions {
                nullable: true,
                on_delete: OnDelete::Nullify,
            },
        );
        let schema = b.build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();

        create(&schema, &db, "team", Record::new("t1")).unwrap();
        create(&schema, &db, "player", Record::new("p1").with("team", "t1")).unwrap();
        let team = schema.store("team").unwrap();
        schema.mutate(&db, |ctx| team.delete_by_id(ctx, "t1")).unwrap();

        let page = query(&schema, &db, "player", "team is null").unwrap();
        assert_eq!(page.ids, vec!["p1"]);
    }

    #[test]
    fn nullify_requires_a_nullable_key() {
        let mut b = Schema::builder(StoreConfig::default());
        b.store("team");
        b.store("player").link("team", "team").foreign_key_with(
            "team",
            "players",
            FkOptions {
                nullable: false,
                on_delete: OnDelete::Nullify,
            },
        );
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));
    }

    // -----------------------------------------------------------------------
    // 4. Link collections
    // -----------------------------------------------------------------------
    #[test]
    fn links_are_reciprocal() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let loc = schema.store("location").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        create(&schema, &db, "location", Record::new("l1").with("name", "Oslo")).unwrap();

        let added = schema
            .mutate(&db, |ctx| emp.add_link(ctx, "locations", "e1", "l1"))
            .unwrap();
        assert!(added);
        schema
            .view(&db, |tx| {
                assert_eq!(emp.get_links(tx, "locations", "e1")?, vec!["l1"]);
                assert_eq!(loc.get_links(tx, "employees", "l1")?, vec!["e1"]);
                assert!(emp.is_linked(tx, "locations", "e1", "l1")?);
                assert!(!emp.is_linked(tx, "locations", "e1", "l2")?);
                Ok(())
            })
            .unwrap();

        schema
            .mutate(&db, |ctx| loc.remove_link(ctx, "employees", "l1", "e1"))
            .unwrap();
        schema
            .view(&db, |tx| {
                assert!(emp.get_links(tx, "locations", "e1")?.is_empty());
                assert!(loc.get_links(tx, "employees", "l1")?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn linking_to_a_missing_row_fails() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        let err = schema
            .mutate(&db, |ctx| emp.add_link(ctx, "locations", "e1", "nowhere"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn set_links_is_idempotent() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        for id in ["l1", "l2", "l3"] {
            create(&schema, &db, "location", Record::new(id)).unwrap();
        }

        let first = schema
            .mutate(&db, |ctx| emp.set_links(ctx, "locations", "e1", &["l3", "l1", "l1"]))
            .unwrap();
        assert_eq!(first.added, vec!["l1", "l3"]);
        let second = schema
            .mutate(&db, |ctx| emp.set_links(ctx, "locations", "e1", &["l1", "l3"]))
            .unwrap();
        assert!(second.is_empty());

        let third = schema
            .mutate(&db, |ctx| emp.set_links(ctx, "locations", "e1", &["l2", "l3"]))
            .unwrap();
        assert_eq!(third.added, vec!["l2"]);
        assert_eq!(third.removed, vec!["l1"]);
    }

    #[test]
    fn deleting_a_row_tears_down_its_links() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let loc = schema.store("location").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        create(&schema, &db, "location", Record::new("l1")).unwrap();
        schema
            .mutate(&db, |ctx| {
                emp.add_link(ctx, "locations", "e1", "l1")?;
                loc.delete_by_id(ctx, "l1")
            })
            .unwrap();
        schema
            .view(&db, |tx| {
                assert!(emp.get_links(tx, "locations", "e1")?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn integrity_fix_removes_a_dangling_link() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e", "Joe")).unwrap();
        create(&schema, &db, "location", Record::new("l1")).unwrap();
        create(&schema, &db, "location", Record::new("l2")).unwrap();
        schema
            .mutate(&db, |ctx| emp.set_links(ctx, "locations", "e", &["l1", "l2"]))
            .unwrap();

        // Remove L1 behind the store's back.
        let mut tx = db.begin_write();
        assert!(tx.delete_bucket(&BucketPath::from("data/location/l1")).unwrap());
        tx.commit().unwrap();

        let mut reports = Vec::new();
        schema
            .mutate(&db, |ctx| {
                schema.check_integrity(ctx, true, &mut |r: IntegrityReport| reports.push(r))
            })
            .unwrap();
        assert_eq!(reports.len(), 1, "{reports:?}");
        assert_eq!(reports[0].check, IntegrityCheck::Link);
        assert_eq!(reports[0].id, "e");
        assert!(reports[0].fixed);

        let links = schema.view(&db, |tx| emp.get_links(tx, "locations", "e")).unwrap();
        assert_eq!(links, vec!["l2"]);

        let mut again = Vec::new();
        schema
            .mutate(&db, |ctx| {
                schema.check_integrity(ctx, false, &mut |r: IntegrityReport| again.push(r))
            })
            .unwrap();
        assert!(again.is_empty(), "{again:?}");
    }

    #[test]
    fn unmirrored_link_collection_is_a_config_finding() {
        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").link_set("bs", "b", "as");
        b.store("b");
        let schema = b.build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();

        let mut reports = Vec::new();
        schema
            .mutate(&db, |ctx| {
                schema.check_integrity(ctx, true, &mut |r: IntegrityReport| reports.push(r))
            })
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].check, IntegrityCheck::LinkConfig);
        assert!(!reports[0].fixed);
    }

    // -----------------------------------------------------------------------
    // 5. Set index
    // -----------------------------------------------------------------------
    #[test]
    fn set_index_tracks_members_and_notifies() {
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = changes.clone();
        let mut b = fixture_builder();
        b.on_set_change("employee", "tags", move |_, change| {
            assert_eq!(change.field, "tags");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let schema = b.build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();
        let emp = schema.store("employee").unwrap();

        create(&schema, &db, "employee", Record::new("e1").with_set("tags", ["a", "b"])).unwrap();
        schema
            .mutate(&db, |ctx| emp.update(ctx, &Record::new("e1").with_set("tags", ["b", "c"]), None))
            .unwrap();
        // Same members: no index work, no notification.
        schema
            .mutate(&db, |ctx| emp.update(ctx, &Record::new("e1").with_set("tags", ["c", "b"]), None))
            .unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 2);

        let root = BucketPath::from("meta/indexes/employee/tags");
        schema
            .view(&db, |tx| {
                let bucket_for = |v: &str| root.child(list_key(&Value::from(v)).unwrap());
                assert!(tx.bucket(&bucket_for("a")).is_none());
                assert!(tx.get(&bucket_for("b"), b"e1").is_some());
                assert!(tx.get(&bucket_for("c"), b"e1").is_some());
                Ok(())
            })
            .unwrap();

        let page = query(&schema, &db, "employee", r#"tags = "c""#).unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        let page = query(&schema, &db, "employee", r#"tags != "a""#).unwrap();
        assert_eq!(page.ids, vec!["e1"]);

        schema.mutate(&db, |ctx| emp.delete_by_id(ctx, "e1")).unwrap();
        schema
            .view(&db, |tx| {
                assert!(tx.bucket(&root).is_some_and(|b| b.is_empty()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn integrity_rebuilds_a_missing_set_entry() {
        let (schema, db) = fixture();
        create(&schema, &db, "employee", Record::new("e1").with_set("tags", ["x"])).unwrap();

        let mut tx = db.begin_write();
        tx.delete_bucket(&BucketPath::from("meta/indexes/employee/tags")).unwrap();
        tx.commit().unwrap();

        let emp = schema.store("employee").unwrap();
        let mut reports = Vec::new();
        schema
            .mutate(&db, |ctx| emp.check_integrity(ctx, true, &mut |r: IntegrityReport| reports.push(r)))
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].check, IntegrityCheck::SetIndex);

        let mut again = Vec::new();
        schema
            .mutate(&db, |ctx| emp.check_integrity(ctx, false, &mut |r: IntegrityReport| again.push(r)))
            .unwrap();
        assert!(again.is_empty(), "{again:?}");
    }

    #[test]
    fn unique_conflict_between_live_rows_is_unfixable() {
        let (schema, db) = fixture();
        create(&schema, &db, "employee", employee("e1", "Same")).unwrap();
        create(&schema, &db, "employee", employee("e2", "Other")).unwrap();

        // Give e2 the same name without going through the index.
        let mut tx = db.begin_write();
        tx.put(
            &BucketPath::from("data/employee/e2"),
            "name",
            nest_codec::encode(&Value::from("Same")),
        )
        .unwrap();
        tx.commit().unwrap();

        let emp = schema.store("employee").unwrap();
        let mut reports = Vec::new();
        schema
            .mutate(&db, |ctx| emp.check_integrity(ctx, true, &mut |r: IntegrityReport| reports.push(r)))
            .unwrap();
        let unique: Vec<_> = reports
            .iter()
            .filter(|r| r.check == IntegrityCheck::UniqueIndex)
            .collect();
        // The stale "Other" entry is fixable; the shared value is not.
        assert_eq!(unique.len(), 2, "{reports:?}");
        assert!(unique.iter().any(|r| r.id == "e2" && r.fixed));
        assert!(unique.iter().any(|r| r.id == "e2" && !r.fixed));
    }

    // -----------------------------------------------------------------------
    // 6. System entities
    // -----------------------------------------------------------------------
    #[test]
    fn system_rows_need_a_system_context() {
        let (schema, db) = fixture();
        let mgr = schema.store("manager").unwrap();

        let err = create(&schema, &db, "manager", Record::new("root").with("system", true)).unwrap_err();
        assert!(matches!(err, StoreError::SystemEntity { .. }));

        schema
            .mutate_system(&db, |ctx| {
                mgr.create(ctx, &Record::new("root").with("name", "Root").with("system", true))
            })
            .unwrap();

        let err = schema
            .mutate(&db, |ctx| mgr.update(ctx, &Record::new("root").with("name", "X"), None))
            .unwrap_err();
        assert!(err.is_constraint_violation());
        let err = schema
            .mutate(&db, |ctx| mgr.update(ctx, &Record::new("root").with("system", false), None))
            .unwrap_err();
        assert!(matches!(err, StoreError::SystemEntity { .. }));
        let err = schema.mutate(&db, |ctx| mgr.delete_by_id(ctx, "root")).unwrap_err();
        assert!(matches!(err, StoreError::SystemEntity { .. }));

        schema
            .mutate_system(&db, |ctx| mgr.delete_by_id(ctx, "root"))
            .unwrap();

        create(&schema, &db, "manager", Record::new("m1").with("system", false)).unwrap();
        schema
            .mutate(&db, |ctx| mgr.update(ctx, &Record::new("m1").with("name", "Ok"), None))
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // 7. Queries
    // -----------------------------------------------------------------------
    #[test]
    fn sorted_paged_query_over_forty_rows() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let mut rows = Vec::new();
        schema
            .mutate(&db, |ctx| {
                for i in 0..40 {
                    let id = format!("e{i:02}");
                    let last = format!("L{}", i % 8);
                    let first = format!("F{}", i / 8);
                    emp.create(
                        ctx,
                        &Record::new(id.as_str())
                            .with("lastName", last.as_str())
                            .with("firstName", first.as_str()),
                    )?;
                    rows.push((last, first, id));
                }
                Ok(())
            })
            .unwrap();
        rows.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        let expected: Vec<String> = rows[10..20].iter().map(|r| r.2.clone()).collect();

        let page = query(
            &schema,
            &db,
            "employee",
            "sort by lastName desc, firstName asc skip 10 limit 10",
        )
        .unwrap();
        assert_eq!(page.total, 40);
        assert_eq!(page.ids, expected);
    }

    #[test]
    fn id_order_scans_page_inline() {
        let (schema, db) = fixture();
        for id in ["a", "b", "c", "d", "e"] {
            create(&schema, &db, "employee", Record::new(id).with_set("tags", ["t"])).unwrap();
        }
        let page = query(&schema, &db, "employee", r#"tags = "t" sort by id desc skip 1 limit 2"#).unwrap();
        assert_eq!(page.ids, vec!["d", "c"]);
        assert_eq!(page.total, 5);

        let page = query(&schema, &db, "employee", "skip 3").unwrap();
        assert_eq!(page.ids, vec!["d", "e"]);
        assert_eq!(page.total, 5);

        let emp = schema.store("employee").unwrap();
        let ids = schema.view(&db, |tx| Ok(emp.ids(tx, Direction::Descending))).unwrap();
        assert_eq!(ids, vec!["e", "d", "c", "b", "a"]);
    }

    #[test]
    fn composite_symbols_fan_out_across_links() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        create(&schema, &db, "employee", employee("e2", "Ann")).unwrap();
        create(&schema, &db, "location", Record::new("l1").with("name", "Oslo")).unwrap();
        create(&schema, &db, "location", Record::new("l2").with("name", "Rome")).unwrap();
        schema
            .mutate(&db, |ctx| {
                emp.set_links(ctx, "locations", "e1", &["l1", "l2"])?;
                emp.set_links(ctx, "locations", "e2", &["l2"])
            })
            .unwrap();

        let page = query(&schema, &db, "employee", r#"locations.name = "Oslo""#).unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        let page = query(&schema, &db, "employee", r#"locations.name = "Rome""#).unwrap();
        assert_eq!(page.ids, vec!["e1", "e2"]);
        // Two set hops: location -> employees -> locations.
        let page = query(&schema, &db, "location", r#"employees.locations.name = "Oslo""#).unwrap();
        assert_eq!(page.ids, vec!["l1", "l2"]);

        let sym = emp.resolve("locations.id").unwrap();
        assert_eq!(sym.hops().len(), 1);
        assert!(sym.is_set());
        assert!(emp.resolve("locations.nope").is_none());
    }

    #[test]
    fn map_fields_are_queryable_by_path() {
        let (schema, db) = fixture();
        let mut geo = MapValue::new();
        geo.insert("lat".into(), MapEntry::Value(Value::Float64(59.9)));
        let mut address = MapValue::new();
        address.insert("city".into(), MapEntry::Value(Value::from("Oslo")));
        address.insert("geo".into(), MapEntry::Map(geo));
        create(&schema, &db, "employee", Record::new("e1").with_map("address", address.clone())).unwrap();
        create(&schema, &db, "employee", Record::new("e2")).unwrap();

        let page = query(&schema, &db, "employee", r#"address.city = "Oslo""#).unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        let page = query(&schema, &db, "employee", "address.geo.lat > 50").unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        let page = query(&schema, &db, "employee", "address.city is null").unwrap();
        assert_eq!(page.ids, vec!["e2"]);

        let emp = schema.store("employee").unwrap();
        let loaded = schema.view(&db, |tx| emp.load_one_by_id(tx, "e1")).unwrap();
        assert_eq!(loaded.map("address"), Some(&address));
    }

    #[test]
    fn private_fields_need_a_trusted_query() {
        let (schema, db) = fixture();
        create(&schema, &db, "employee", Record::new("e1").with("salary", 100)).unwrap();
        create(&schema, &db, "employee", Record::new("e2").with("salary", 5)).unwrap();

        let err = query(&schema, &db, "employee", "salary > 10").unwrap_err();
        assert_eq!(err, StoreError::Query(QueryError::NotPublic("salary".into())));

        let emp = schema.store("employee").unwrap();
        let page = schema
            .view(&db, |tx| emp.query_ids_trusted(tx, "salary > 10"))
            .unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        assert!(!emp.symbol_names(true).contains(&"salary".to_string()));
        assert!(emp.symbol_names(false).contains(&"salary".to_string()));
    }

    #[test]
    fn unknown_symbols_are_query_errors() {
        let (schema, db) = fixture();
        let err = query(&schema, &db, "employee", r#"shoeSize = 9"#).unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn load_one_by_query_and_delete_where() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        create(&schema, &db, "employee", employee("e1", "Joe").with_set("tags", ["old"])).unwrap();
        create(&schema, &db, "employee", employee("e2", "Ann").with_set("tags", ["old"])).unwrap();
        create(&schema, &db, "employee", employee("e3", "Cat")).unwrap();

        let found = schema
            .view(&db, |tx| emp.load_one_by_query(tx, r#"name = "Ann""#))
            .unwrap();
        assert_eq!(found.id, "e2");
        let missing = schema
            .view(&db, |tx| emp.load_one_by_query(tx, r#"name = "Zed""#))
            .unwrap_err();
        assert!(missing.is_not_found());

        let deleted = schema
            .mutate(&db, |ctx| emp.delete_where(ctx, r#"tags = "old""#))
            .unwrap();
        assert_eq!(deleted, 2);
        let ids = schema.view(&db, |tx| Ok(emp.ids(tx, Direction::Ascending))).unwrap();
        assert_eq!(ids, vec!["e3"]);
    }

    // -----------------------------------------------------------------------
    // 8. Child stores
    // -----------------------------------------------------------------------
    #[test]
    fn child_rows_compose_with_their_parent() {
        let (schema, db) = fixture();
        let contractor = schema.store("contractor").unwrap();
        let emp = schema.store("employee").unwrap();
        assert_eq!(contractor.parent().map(|p| p.entity_type()), Some("employee"));

        let err = create(&schema, &db, "contractor", Record::new("e1").with("agency", "Acme")).unwrap_err();
        assert!(err.is_not_found());

        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        create(&schema, &db, "employee", employee("e2", "Ann")).unwrap();
        create(&schema, &db, "contractor", Record::new("e1").with("agency", "Acme")).unwrap();

        let loaded = schema.view(&db, |tx| contractor.load_one_by_id(tx, "e1")).unwrap();
        assert_eq!(loaded.str("agency"), Some("Acme"));
        assert_eq!(loaded.str("name"), Some("Joe"));

        let page = query(&schema, &db, "contractor", r#"name = "Joe""#).unwrap();
        assert_eq!(page.ids, vec!["e1"]);
        let page = query(&schema, &db, "contractor", "").unwrap();
        assert_eq!(page.total, 1);

        // Inherited fields are written through the child.
        schema
            .mutate(&db, |ctx| contractor.update(ctx, &Record::new("e1").with("name", "Joseph"), None))
            .unwrap();
        let err = create(&schema, &db, "employee", employee("e9", "Joseph")).unwrap_err();
        assert!(err.is_duplicate());

        schema
            .mutate(&db, |ctx| contractor.delete_by_id(ctx, "e1"))
            .unwrap();
        schema
            .view(&db, |tx| {
                assert!(!emp.exists(tx, "e1"));
                assert!(!contractor.exists(tx, "e1"));
                assert!(emp.exists(tx, "e2"));
                Ok(())
            })
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // 9. Events
    // -----------------------------------------------------------------------
    #[test]
    fn events_fire_after_commit_only() {
        let (schema, db) = fixture();
        let emp = schema.store("employee").unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        emp.add_listener(EventKind::Created, move |e| {
            let _ = tx.lock().send(e.clone());
        });
        let (dtx, drx) = mpsc::channel();
        let dtx = Mutex::new(dtx);
        schema.add_listener(EventKind::Deleted, move |e| {
            let _ = dtx.lock().send(e.clone());
        });

        create(&schema, &db, "employee", employee("e1", "Joe")).unwrap();
        let _ = create(&schema, &db, "employee", employee("e2", "Joe"));
        schema.events().flush();

        let created: Vec<String> = rx.try_iter().map(|e| e.id).collect();
        assert_eq!(created, vec!["e1"]);

        create(&schema, &db, "contractor", Record::new("e1")).unwrap();
        schema.mutate(&db, |ctx| emp.delete_by_id(ctx, "e1")).unwrap();
        let deleted = drx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(deleted.entity_type, "employee");
        let child = drx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(child.entity_type, "contractor");
    }

    #[test]
    fn commits_inside_an_async_runtime_with_a_bounded_queue() {
        let config = StoreConfig {
            event_queue_capacity: 1,
            ..StoreConfig::default()
        };
        let schema = fixture_builder_with(config).build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        schema.add_listener(EventKind::Created, move |e| {
            let _ = tx.lock().send(e.id.clone());
        });

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            for i in 0..5 {
                create(&schema, &db, "location", Record::new(format!("l{i}"))).unwrap();
            }
        });
        schema.events().flush();

        let loc = schema.store("location").unwrap();
        assert_eq!(schema.view(&db, |tx| Ok(loc.count(tx))).unwrap(), 5);
        let delivered = rx.try_iter().count();
        assert!((1..=5).contains(&delivered), "{delivered}");
    }

    // -----------------------------------------------------------------------
    // 10. Schema lifecycle
    // -----------------------------------------------------------------------
    #[test]
    fn migrations_run_once_per_version() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut b = fixture_builder();
        b.migration("core", 1, move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            let loc = ctx.store("location")?;
            loc.create(ctx, &Record::new("hq").with("name", "Head office"))
        });
        b.migration("core", 2, |_| Ok(()));
        let schema = b.build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();
        schema.initialize(&db).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let loc = schema.store("location").unwrap();
        schema
            .view(&db, |tx| {
                assert_eq!(schema.version(tx, "core"), 2);
                assert_eq!(schema.version(tx, "other"), 0);
                assert!(loc.exists(tx, "hq"));
                assert!(tx.contains_bucket(&BucketPath::from("meta/indexes/employee/name")));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn builder_rejects_bad_declarations() {
        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").child_of("missing");
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));

        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").scalar("x", Tag::String).scalar("x", Tag::Int32);
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));

        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").child_of("b");
        b.store("b").child_of("a");
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));

        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").scalar("x", Tag::String).set_index("x");
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));

        let mut b = Schema::builder(StoreConfig::default());
        b.store("a").scalar("flag", Tag::Int32).system_flag("flag");
        assert!(matches!(b.build(), Err(StoreError::Schema(_))));
    }

    #[test]
    fn store_lookup_and_symbols() {
        let (schema, _db) = fixture();
        assert!(matches!(schema.store("nope"), Err(StoreError::UnknownStore(_))));
        let emp = schema.store("employee").unwrap();
        let names = emp.symbol_names(true);
        for expected in ["id", "name", "tags", "locations", "manager"] {
            assert!(names.contains(&expected.to_string()), "{names:?}");
        }
        let mgr = schema.store("manager").unwrap();
        assert!(mgr.symbol_names(true).contains(&"reports".to_string()));
        assert_eq!(schema.stores().count(), 4);
    }

    // -----------------------------------------------------------------------
    // 11. Typed entities
    // -----------------------------------------------------------------------
    #[derive(Debug, PartialEq)]
    struct Location {
        id: String,
        name: String,
    }

    impl Entity for Location {
        fn entity_type() -> &'static str {
            "location"
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn to_record(&self) -> Record {
            Record::new(self.id.as_str()).with("name", self.name.as_str())
        }

        fn from_record(record: Record) -> StoreResult<Self> {
            let name = record.str("name").unwrap_or_default().to_string();
            Ok(Self {
                id: record.id,
                name,
            })
        }
    }

    #[test]
    fn typed_entities_round_trip() {
        let (schema, db) = fixture();
        let mut hq = Location {
            id: new_id(),
            name: "HQ".into(),
        };
        schema.mutate(&db, |ctx| schema.insert(ctx, &hq)).unwrap();
        hq.name = "Head office".into();
        schema.mutate(&db, |ctx| schema.save(ctx, &hq)).unwrap();
        let loaded: Location = schema.view(&db, |tx| schema.load(tx, &hq.id)).unwrap();
        assert_eq!(loaded, hq);
    }

    // -----------------------------------------------------------------------
    // 12. Configuration
    // -----------------------------------------------------------------------
    #[test]
    fn configured_key_limit_covers_members_map_keys_and_index_keys() {
        let config = StoreConfig {
            max_key_component: 16,
            ..StoreConfig::default()
        };
        let schema = fixture_builder_with(config).build().unwrap();
        let db = Database::new();
        schema.initialize(&db).unwrap();
        let too_large = |err: &StoreError| {
            matches!(err, StoreError::Codec(CodecError::KeyTooLarge { max: 16, .. }))
        };

        let err = create(
            &schema,
            &db,
            "employee",
            Record::new("e1").with_set("tags", ["x".repeat(1000)]),
        )
        .unwrap_err();
        assert!(too_large(&err), "{err:?}");

        let mut address = MapValue::new();
        address.insert("k".repeat(17), MapEntry::Value(Value::from("v")));
        let err = create(&schema, &db, "employee", Record::new("e1").with_map("address", address)).unwrap_err();
        assert!(too_large(&err), "{err:?}");

        let err = create(&schema, &db, "employee", employee("e1", &"n".repeat(20))).unwrap_err();
        assert!(too_large(&err), "{err:?}");

        let err = create(&schema, &db, "employee", Record::new("e".repeat(17))).unwrap_err();
        assert!(matches!(err, StoreError::KeyTooLarge { max: 16, .. }), "{err:?}");

        create(&schema, &db, "employee", employee("e1", "Joe").with_set("tags", ["short"])).unwrap();
    }
}
