//! Invariant tests over assembled descriptors, driven through the cache
//! with a stub source so no database is needed.
//!
//! Run with: cargo test --package fluxbase-schema --test descriptor_invariants

use async_trait::async_trait;
use fluxbase_schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, RelationKind, SchemaCache,
    SchemaLoad, SchemaSource, TableDescriptor,
};
use std::sync::Arc;
use std::time::Duration;

fn column(name: &str, position: i32) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        data_type: "text".to_string(),
        nullable: true,
        default: None,
        max_length: None,
        position,
        is_pk: false,
        is_fk: false,
        is_unique: false,
    }
}

/// A small but realistic schema: two tables with keys, a view, a matview.
struct FixtureSource;

#[async_trait]
impl SchemaSource for FixtureSource {
    async fn load(&self, _schemas: &[String]) -> Result<SchemaLoad, fluxbase_db::DbError> {
        let mut users = TableDescriptor::new("public", "user", RelationKind::Table);
        users.set_columns(vec![column("id", 1), column("email", 2)]);
        users.primary_key = vec!["id".to_string()];
        users.indexes = vec![IndexDescriptor {
            name: "user_pkey".to_string(),
            columns: vec!["id".to_string()],
            unique: true,
            primary: true,
        }];
        users.mark_key_columns();

        let mut orders = TableDescriptor::new("public", "order", RelationKind::Table);
        orders.set_columns(vec![column("id", 1), column("user_id", 2)]);
        orders.primary_key = vec!["id".to_string()];
        orders.foreign_keys = vec![ForeignKeyDescriptor {
            name: "order_user_id_fkey".to_string(),
            column: "user_id".to_string(),
            ref_table: "public.user".to_string(),
            ref_column: "id".to_string(),
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        }];
        orders.mark_key_columns();

        let mut report = TableDescriptor::new("public", "order_summary", RelationKind::View);
        report.set_columns(vec![column("user_id", 1), column("total", 2)]);

        let mut search = TableDescriptor::new("public", "search_index", RelationKind::Matview);
        search.set_columns(vec![column("doc_id", 1)]);
        search.indexes = vec![IndexDescriptor {
            name: "search_index_doc_id_idx".to_string(),
            columns: vec!["doc_id".to_string()],
            unique: true,
            primary: false,
        }];

        Ok(SchemaLoad {
            schemas: vec!["public".to_string()],
            tables: vec![users, orders],
            views: vec![report],
            matviews: vec![search],
            functions: Vec::new(),
        })
    }
}

fn fixture_cache() -> SchemaCache {
    SchemaCache::new(
        Arc::new(FixtureSource),
        vec!["public".to_string()],
        Duration::from_secs(300),
    )
}

#[tokio::test]
async fn views_and_matviews_carry_no_keys() {
    let cache = fixture_cache();
    for relation in cache
        .get_views()
        .await
        .unwrap()
        .into_iter()
        .chain(cache.get_matviews().await.unwrap())
    {
        assert!(relation.primary_key.is_empty(), "{}", relation.key());
        assert!(relation.foreign_keys.is_empty(), "{}", relation.key());
    }
}

#[tokio::test]
async fn only_tables_and_matviews_carry_indexes() {
    let cache = fixture_cache();
    for view in cache.get_views().await.unwrap() {
        assert!(view.indexes.is_empty());
    }
    let matviews = cache.get_matviews().await.unwrap();
    assert!(matviews.iter().any(|m| !m.indexes.is_empty()));
}

#[tokio::test]
async fn key_flags_agree_with_key_lists() {
    let cache = fixture_cache();
    for table in cache.get_tables().await.unwrap() {
        for col in &table.columns {
            if col.is_pk {
                assert!(table.primary_key.contains(&col.name));
            }
            if col.is_fk {
                assert!(table.foreign_keys.iter().any(|fk| fk.column == col.name));
            }
        }
        // And the converse: every listed key column is flagged.
        for pk in &table.primary_key {
            assert!(table.column(pk).unwrap().is_pk);
        }
        for fk in &table.foreign_keys {
            assert!(table.column(&fk.column).unwrap().is_fk);
        }
    }
}

#[tokio::test]
async fn rest_paths_are_deterministic_and_schema_aware() {
    let cache = fixture_cache();
    let tables = cache.get_tables().await.unwrap();
    let orders = tables.iter().find(|t| t.name == "order").unwrap();
    assert_eq!(orders.rest_path, "/api/rest/orders");

    let again = cache.get_table("public", "order").await.unwrap().unwrap();
    assert_eq!(again.rest_path, orders.rest_path);
}

#[tokio::test]
async fn writability_follows_relation_kind() {
    let cache = fixture_cache();
    assert!(cache.is_writable("public", "user").await.unwrap());
    assert!(!cache.is_writable("public", "order_summary").await.unwrap());
    assert!(!cache.is_writable("public", "search_index").await.unwrap());
}

#[tokio::test]
async fn column_lookup_is_by_name() {
    let cache = fixture_cache();
    let users = cache.get_table("public", "user").await.unwrap().unwrap();
    assert!(users.has_column("email"));
    assert!(!users.has_column("EMAIL"));
    assert_eq!(users.column("id").unwrap().position, 1);
}
