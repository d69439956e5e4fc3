//! Live catalog introspection.
//!
//! Every collection is fetched with a single batched query over all
//! requested schemas and post-processed into `"schema.name"`-keyed maps, so
//! assembling N tables costs a fixed number of round-trips regardless of N.

use crate::model::{
    ColumnDescriptor, ForeignKeyDescriptor, FunctionDescriptor, FunctionParam, IndexDescriptor,
    RelationKind, TableDescriptor, VectorColumn, Volatility,
};
use async_trait::async_trait;
use fluxbase_db::DbError;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;

/// Schemas that are never exposed, regardless of what callers request.
const EXCLUDED_SCHEMAS: [&str; 3] = ["pg_catalog", "information_schema", "migrations"];

/// Whether a schema is internal to Postgres or to Fluxbase itself.
pub fn is_system_schema(name: &str) -> bool {
    name.starts_with("pg_") || EXCLUDED_SCHEMAS.contains(&name)
}

/// Everything one refresh pass produces.
#[derive(Debug, Default)]
pub struct SchemaLoad {
    pub schemas: Vec<String>,
    pub tables: Vec<TableDescriptor>,
    pub views: Vec<TableDescriptor>,
    pub matviews: Vec<TableDescriptor>,
    pub functions: Vec<FunctionDescriptor>,
}

/// Source of schema data, a seam so the cache can be tested without a
/// database.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load(&self, schemas: &[String]) -> Result<SchemaLoad, DbError>;
}

/// Catalog inspector over the runtime pool.
#[derive(Clone)]
pub struct SchemaInspector {
    pool: PgPool,
}

impl SchemaInspector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn effective_schemas(schemas: &[String]) -> Vec<String> {
        let filtered: Vec<String> = schemas
            .iter()
            .filter(|s| !is_system_schema(s))
            .cloned()
            .collect();
        if filtered.is_empty() {
            vec!["public".to_string()]
        } else {
            filtered
        }
    }

    /// All user-visible schemas.
    pub async fn get_schemas(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'migrations')
              AND schema_name NOT LIKE 'pg\_%'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("schema_name"))
            .collect())
    }

    /// Fully-assembled table descriptors for the given schemas.
    pub async fn get_tables(&self, schemas: &[String]) -> Result<Vec<TableDescriptor>, DbError> {
        let schemas = Self::effective_schemas(schemas);

        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema,
                   c.relname AS table_name,
                   c.relrowsecurity AS rls_enabled
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'r'
              AND n.nspname = ANY($1)
            ORDER BY n.nspname, c.relname
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut tables: Vec<TableDescriptor> = rows
            .into_iter()
            .map(|r| {
                let mut t = TableDescriptor::new(
                    r.get::<String, _>("table_schema"),
                    r.get::<String, _>("table_name"),
                    RelationKind::Table,
                );
                t.rls_enabled = r.get::<bool, _>("rls_enabled");
                t
            })
            .collect();

        let mut columns = self.columns_by_relation(&schemas).await?;
        let mut primary_keys = self.primary_keys_by_relation(&schemas).await?;
        let mut foreign_keys = self.foreign_keys_by_relation(&schemas).await?;
        let mut indexes = self.indexes_by_relation(&schemas).await?;

        for table in &mut tables {
            let key = table.key();
            table.set_columns(columns.remove(&key).unwrap_or_default());
            table.primary_key = primary_keys.remove(&key).unwrap_or_default();
            table.foreign_keys = foreign_keys.remove(&key).unwrap_or_default();
            table.indexes = indexes.remove(&key).unwrap_or_default();
            mark_unique_columns(table);
            table.mark_key_columns();
        }

        Ok(tables)
    }

    /// View descriptors: columns only, no keys, no indexes.
    pub async fn get_views(&self, schemas: &[String]) -> Result<Vec<TableDescriptor>, DbError> {
        let schemas = Self::effective_schemas(schemas);

        let rows = sqlx::query(
            r#"
            SELECT table_schema, table_name
            FROM information_schema.views
            WHERE table_schema = ANY($1)
            ORDER BY table_schema, table_name
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut views: Vec<TableDescriptor> = rows
            .into_iter()
            .map(|r| {
                TableDescriptor::new(
                    r.get::<String, _>("table_schema"),
                    r.get::<String, _>("table_name"),
                    RelationKind::View,
                )
            })
            .collect();

        let mut columns = self.columns_by_relation(&schemas).await?;
        for view in &mut views {
            let key = view.key();
            view.set_columns(columns.remove(&key).unwrap_or_default());
        }

        Ok(views)
    }

    /// Materialized view descriptors: columns and indexes, no keys.
    ///
    /// Matview columns come from `pg_attribute`; they are invisible to
    /// `information_schema.columns`.
    pub async fn get_matviews(&self, schemas: &[String]) -> Result<Vec<TableDescriptor>, DbError> {
        let schemas = Self::effective_schemas(schemas);

        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema, c.relname AS table_name
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'm'
              AND n.nspname = ANY($1)
            ORDER BY n.nspname, c.relname
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut matviews: Vec<TableDescriptor> = rows
            .into_iter()
            .map(|r| {
                TableDescriptor::new(
                    r.get::<String, _>("table_schema"),
                    r.get::<String, _>("table_name"),
                    RelationKind::Matview,
                )
            })
            .collect();

        let mut columns = self.matview_columns_by_relation(&schemas).await?;
        let mut indexes = self.indexes_by_relation(&schemas).await?;
        for matview in &mut matviews {
            let key = matview.key();
            matview.set_columns(columns.remove(&key).unwrap_or_default());
            matview.indexes = indexes.remove(&key).unwrap_or_default();
            mark_unique_columns(matview);
        }

        Ok(matviews)
    }

    /// User-defined functions, excluding extension-owned ones.
    pub async fn get_functions(
        &self,
        schemas: &[String],
    ) -> Result<Vec<FunctionDescriptor>, DbError> {
        let schemas = Self::effective_schemas(schemas);

        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS schema,
                   p.proname AS name,
                   p.oid AS oid,
                   d.description AS description,
                   pg_get_function_result(p.oid) AS return_type,
                   p.proretset AS is_set_of,
                   p.provolatile::text AS volatility,
                   l.lanname AS language
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            JOIN pg_language l ON l.oid = p.prolang
            LEFT JOIN pg_description d ON d.objoid = p.oid AND d.objsubid = 0
            WHERE p.prokind = 'f'
              AND n.nspname = ANY($1)
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend dep
                  WHERE dep.objid = p.oid AND dep.deptype = 'e'
              )
            ORDER BY n.nspname, p.proname
            "#,
        )
        .bind(&schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut params_by_oid = self.function_params(&schemas).await?;

        let functions = rows
            .into_iter()
            .map(|r| {
                let oid: sqlx::postgres::types::Oid = r.get("oid");
                FunctionDescriptor {
                    schema: r.get("schema"),
                    name: r.get("name"),
                    description: r.get("description"),
                    params: params_by_oid.remove(&oid.0).unwrap_or_default(),
                    return_type: r.get::<Option<String>, _>("return_type").unwrap_or_default(),
                    is_set_of: r.get("is_set_of"),
                    volatility: Volatility::from_provolatile(r.get::<String, _>("volatility").as_str()),
                    language: r.get("language"),
                }
            })
            .collect();

        Ok(functions)
    }

    /// Columns of type `vector`, for the whole schema or one table.
    pub async fn get_vector_columns(
        &self,
        schema: &str,
        table: Option<&str>,
    ) -> Result<Vec<VectorColumn>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema,
                   c.relname AS table_name,
                   a.attname AS column_name,
                   a.atttypmod AS typmod
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_type t ON t.oid = a.atttypid
            WHERE t.typname = 'vector'
              AND n.nspname = $1
              AND ($2::text IS NULL OR c.relname = $2)
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY c.relname, a.attnum
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let typmod: i32 = r.get("typmod");
                VectorColumn {
                    schema: r.get("table_schema"),
                    table: r.get("table_name"),
                    column: r.get("column_name"),
                    dimensions: (typmod > 0).then_some(typmod),
                }
            })
            .collect())
    }

    /// Whether the pgvector extension is installed.
    pub async fn is_pgvector_installed(&self) -> Result<bool, DbError> {
        let installed = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(installed)
    }

    /// Table and view columns from `information_schema.columns`, keyed by
    /// relation. `USER-DEFINED` types are replaced with the underlying
    /// `udt_name`.
    async fn columns_by_relation(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<String, Vec<ColumnDescriptor>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT table_schema,
                   table_name,
                   column_name,
                   data_type,
                   udt_name,
                   is_nullable,
                   column_default,
                   character_maximum_length,
                   ordinal_position
            FROM information_schema.columns
            WHERE table_schema = ANY($1)
            ORDER BY table_schema, table_name, ordinal_position
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<String, Vec<ColumnDescriptor>> = HashMap::new();
        for r in rows {
            let key = format!(
                "{}.{}",
                r.get::<String, _>("table_schema"),
                r.get::<String, _>("table_name")
            );
            let data_type: String = r.get("data_type");
            let data_type = if data_type == "USER-DEFINED" {
                r.get::<String, _>("udt_name")
            } else {
                data_type
            };
            map.entry(key).or_default().push(ColumnDescriptor {
                name: r.get("column_name"),
                data_type,
                nullable: r.get::<String, _>("is_nullable") == "YES",
                default: r.get("column_default"),
                max_length: r.get("character_maximum_length"),
                position: r.get("ordinal_position"),
                is_pk: false,
                is_fk: false,
                is_unique: false,
            });
        }
        Ok(map)
    }

    /// Matview columns from `pg_attribute`, keyed by relation.
    async fn matview_columns_by_relation(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<String, Vec<ColumnDescriptor>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema,
                   c.relname AS table_name,
                   a.attname AS column_name,
                   format_type(a.atttypid, a.atttypmod) AS data_type,
                   NOT a.attnotnull AS nullable,
                   a.attnum::int4 AS ordinal_position
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind = 'm'
              AND n.nspname = ANY($1)
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY n.nspname, c.relname, a.attnum
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<String, Vec<ColumnDescriptor>> = HashMap::new();
        for r in rows {
            let key = format!(
                "{}.{}",
                r.get::<String, _>("table_schema"),
                r.get::<String, _>("table_name")
            );
            map.entry(key).or_default().push(ColumnDescriptor {
                name: r.get("column_name"),
                data_type: r.get("data_type"),
                nullable: r.get("nullable"),
                default: None,
                max_length: None,
                position: r.get("ordinal_position"),
                is_pk: false,
                is_fk: false,
                is_unique: false,
            });
        }
        Ok(map)
    }

    /// Primary key columns in `indkey` order, keyed by relation.
    async fn primary_keys_by_relation(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<String, Vec<String>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema,
                   c.relname AS table_name,
                   a.attname AS column_name
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, pos) ON TRUE
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
            WHERE i.indisprimary
              AND n.nspname = ANY($1)
            ORDER BY n.nspname, c.relname, k.pos
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for r in rows {
            let key = format!(
                "{}.{}",
                r.get::<String, _>("table_schema"),
                r.get::<String, _>("table_name")
            );
            map.entry(key).or_default().push(r.get("column_name"));
        }
        Ok(map)
    }

    /// Foreign keys keyed by relation, one entry per referencing column.
    async fn foreign_keys_by_relation(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<String, Vec<ForeignKeyDescriptor>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT tc.table_schema,
                   tc.table_name,
                   tc.constraint_name,
                   kcu.column_name,
                   ccu.table_schema AS foreign_table_schema,
                   ccu.table_name AS foreign_table_name,
                   ccu.column_name AS foreign_column_name,
                   rc.delete_rule,
                   rc.update_rule
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.table_schema = tc.table_schema
            JOIN information_schema.referential_constraints rc
              ON rc.constraint_name = tc.constraint_name
             AND rc.constraint_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = ANY($1)
            ORDER BY tc.table_schema, tc.table_name, tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<String, Vec<ForeignKeyDescriptor>> = HashMap::new();
        for r in rows {
            let key = format!(
                "{}.{}",
                r.get::<String, _>("table_schema"),
                r.get::<String, _>("table_name")
            );
            let ref_schema: String = r.get("foreign_table_schema");
            let ref_name: String = r.get("foreign_table_name");
            map.entry(key).or_default().push(ForeignKeyDescriptor {
                name: r.get("constraint_name"),
                column: r.get("column_name"),
                ref_table: format!("{ref_schema}.{ref_name}"),
                ref_column: r.get("foreign_column_name"),
                on_delete: r.get("delete_rule"),
                on_update: r.get("update_rule"),
            });
        }
        Ok(map)
    }

    /// Indexes keyed by relation, columns aggregated in key order.
    async fn indexes_by_relation(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<String, Vec<IndexDescriptor>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT n.nspname AS table_schema,
                   t.relname AS table_name,
                   ic.relname AS index_name,
                   a.attname AS column_name,
                   i.indisunique AS is_unique,
                   i.indisprimary AS is_primary
            FROM pg_index i
            JOIN pg_class t ON t.oid = i.indrelid
            JOIN pg_class ic ON ic.oid = i.indexrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, pos) ON TRUE
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = ANY($1)
              AND t.relkind IN ('r', 'm')
            ORDER BY n.nspname, t.relname, ic.relname, k.pos
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        // Aggregate rows into one descriptor per index, preserving key order.
        let mut map: HashMap<String, Vec<IndexDescriptor>> = HashMap::new();
        for r in rows {
            let key = format!(
                "{}.{}",
                r.get::<String, _>("table_schema"),
                r.get::<String, _>("table_name")
            );
            let index_name: String = r.get("index_name");
            let column: String = r.get("column_name");
            let indexes = map.entry(key).or_default();
            match indexes.iter_mut().find(|ix| ix.name == index_name) {
                Some(ix) => ix.columns.push(column),
                None => indexes.push(IndexDescriptor {
                    name: index_name,
                    columns: vec![column],
                    unique: r.get("is_unique"),
                    primary: r.get("is_primary"),
                }),
            }
        }
        Ok(map)
    }

    /// Function parameters joined back by the OID embedded in
    /// `specific_name` (`<name>_<oid>`).
    async fn function_params(
        &self,
        schemas: &[String],
    ) -> Result<HashMap<u32, Vec<FunctionParam>>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT specific_name,
                   parameter_name,
                   data_type,
                   udt_name,
                   parameter_mode,
                   ordinal_position
            FROM information_schema.parameters
            WHERE specific_schema = ANY($1)
            ORDER BY specific_name, ordinal_position
            "#,
        )
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<u32, Vec<FunctionParam>> = HashMap::new();
        for r in rows {
            let specific_name: String = r.get("specific_name");
            let Some(oid) = oid_from_specific_name(&specific_name) else {
                continue;
            };
            let data_type: Option<String> = r.get("data_type");
            let data_type = match data_type.as_deref() {
                Some("USER-DEFINED") | None => {
                    r.get::<Option<String>, _>("udt_name").unwrap_or_default()
                }
                Some(other) => other.to_string(),
            };
            map.entry(oid).or_default().push(FunctionParam {
                name: r.get("parameter_name"),
                data_type,
                mode: r
                    .get::<Option<String>, _>("parameter_mode")
                    .unwrap_or_else(|| "IN".to_string()),
                position: r.get("ordinal_position"),
            });
        }
        Ok(map)
    }
}

/// `specific_name` is `<routine>_<oid>`; recover the OID suffix.
fn oid_from_specific_name(specific_name: &str) -> Option<u32> {
    specific_name.rsplit('_').next()?.parse().ok()
}

/// Flag columns covered by a single-column unique index.
fn mark_unique_columns(table: &mut TableDescriptor) {
    let unique_columns: Vec<String> = table
        .indexes
        .iter()
        .filter(|ix| ix.unique && ix.columns.len() == 1)
        .map(|ix| ix.columns[0].clone())
        .collect();
    for column in &mut table.columns {
        if unique_columns.contains(&column.name) {
            column.is_unique = true;
        }
    }
}

#[async_trait]
impl SchemaSource for SchemaInspector {
    async fn load(&self, schemas: &[String]) -> Result<SchemaLoad, DbError> {
        let resolved = if schemas.is_empty() {
            self.get_schemas().await?
        } else {
            Self::effective_schemas(schemas)
        };

        Ok(SchemaLoad {
            tables: self.get_tables(&resolved).await?,
            views: self.get_views(&resolved).await?,
            matviews: self.get_matviews(&resolved).await?,
            functions: self.get_functions(&resolved).await?,
            schemas: resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_schemas_are_excluded() {
        assert!(is_system_schema("pg_catalog"));
        assert!(is_system_schema("pg_toast"));
        assert!(is_system_schema("information_schema"));
        assert!(is_system_schema("migrations"));
        assert!(!is_system_schema("public"));
        assert!(!is_system_schema("auth"));
    }

    #[test]
    fn effective_schemas_defaults_to_public() {
        assert_eq!(
            SchemaInspector::effective_schemas(&[]),
            vec!["public".to_string()]
        );
        assert_eq!(
            SchemaInspector::effective_schemas(&["pg_catalog".to_string()]),
            vec!["public".to_string()]
        );
    }

    #[test]
    fn effective_schemas_filters_system_entries() {
        let input = vec![
            "public".to_string(),
            "information_schema".to_string(),
            "auth".to_string(),
        ];
        assert_eq!(
            SchemaInspector::effective_schemas(&input),
            vec!["public".to_string(), "auth".to_string()]
        );
    }

    #[test]
    fn oid_recovered_from_specific_name() {
        assert_eq!(oid_from_specific_name("my_func_16384"), Some(16384));
        assert_eq!(oid_from_specific_name("nounderscore"), None);
        assert_eq!(oid_from_specific_name("trailing_"), None);
    }

    #[test]
    fn unique_flag_only_for_single_column_indexes() {
        let mut table = TableDescriptor::new("public", "user", RelationKind::Table);
        table.set_columns(vec![
            ColumnDescriptor {
                name: "email".to_string(),
                data_type: "text".to_string(),
                nullable: false,
                default: None,
                max_length: None,
                position: 1,
                is_pk: false,
                is_fk: false,
                is_unique: false,
            },
            ColumnDescriptor {
                name: "a".to_string(),
                data_type: "text".to_string(),
                nullable: false,
                default: None,
                max_length: None,
                position: 2,
                is_pk: false,
                is_fk: false,
                is_unique: false,
            },
        ]);
        table.indexes = vec![
            IndexDescriptor {
                name: "users_email_key".to_string(),
                columns: vec!["email".to_string()],
                unique: true,
                primary: false,
            },
            IndexDescriptor {
                name: "users_a_b_key".to_string(),
                columns: vec!["a".to_string(), "b".to_string()],
                unique: true,
                primary: false,
            },
        ];
        mark_unique_columns(&mut table);
        assert!(table.column("email").unwrap().is_unique);
        assert!(!table.column("a").unwrap().is_unique);
    }
}
