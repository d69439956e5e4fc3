//! Normalized descriptors produced by introspection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of relation a [`TableDescriptor`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Table,
    View,
    Matview,
}

/// A table, view or materialized view with everything the REST layer needs.
///
/// Views and materialized views never carry keys; only tables and
/// materialized views carry indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: RelationKind,
    pub rls_enabled: bool,
    pub columns: Vec<ColumnDescriptor>,
    /// Column lookup by name, kept in sync with `columns`.
    #[serde(skip)]
    pub columns_by_name: HashMap<String, usize>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub rest_path: String,
}

impl TableDescriptor {
    /// Build a descriptor with the derived REST path and an empty body.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: RelationKind) -> Self {
        let schema = schema.into();
        let name = name.into();
        let rest_path = crate::rest_path::rest_path(&schema, &name);
        Self {
            schema,
            name,
            kind,
            rls_enabled: false,
            columns: Vec::new(),
            columns_by_name: HashMap::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            rest_path,
        }
    }

    /// `"schema.name"` key used by collection maps and the cache.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Replace the column list and rebuild the by-name index.
    pub fn set_columns(&mut self, columns: Vec<ColumnDescriptor>) {
        self.columns_by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        self.columns = columns;
    }

    /// O(1) column presence check.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns_by_name.contains_key(name)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns_by_name.get(name).map(|&i| &self.columns[i])
    }

    /// Mark `is_pk`/`is_fk` flags from the key lists. Call after both the
    /// columns and keys have been merged in.
    pub fn mark_key_columns(&mut self) {
        let fk_columns: Vec<String> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.column.clone())
            .collect();
        for column in &mut self.columns {
            column.is_pk = self.primary_key.contains(&column.name);
            column.is_fk = fk_columns.contains(&column.name);
        }
    }
}

/// A single column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub position: i32,
    pub is_pk: bool,
    pub is_fk: bool,
    pub is_unique: bool,
}

/// A foreign key, one row per referencing column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: String,
    pub on_update: String,
}

/// An index with its column list in key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// Function volatility classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

impl Volatility {
    /// Map the `pg_proc.provolatile` flag.
    pub fn from_provolatile(flag: &str) -> Self {
        match flag {
            "i" => Volatility::Immutable,
            "s" => Volatility::Stable,
            _ => Volatility::Volatile,
        }
    }
}

/// A user-defined SQL function (extension-owned functions are excluded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub schema: String,
    pub name: String,
    pub description: Option<String>,
    pub params: Vec<FunctionParam>,
    pub return_type: String,
    pub is_set_of: bool,
    pub volatility: Volatility,
    pub language: String,
}

impl FunctionDescriptor {
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// One function parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub data_type: String,
    pub mode: String,
    pub position: i32,
}

/// A column of type `vector` (pgvector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorColumn {
    pub schema: String,
    pub table: String,
    pub column: String,
    /// Declared dimensions, when the column is typed `vector(N)`.
    pub dimensions: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn rest_path_derived_on_construction() {
        let t = TableDescriptor::new("public", "category", RelationKind::Table);
        assert_eq!(t.rest_path, "/api/rest/categories");
        let t = TableDescriptor::new("auth", "session", RelationKind::View);
        assert_eq!(t.rest_path, "/api/rest/auth/sessions");
    }

    #[test]
    fn columns_by_name_tracks_column_list() {
        let mut t = TableDescriptor::new("public", "user", RelationKind::Table);
        t.set_columns(vec![column("id", 1), column("email", 2)]);
        assert!(t.has_column("id"));
        assert!(t.has_column("email"));
        assert!(!t.has_column("missing"));
        assert_eq!(t.column("email").unwrap().position, 2);
    }

    #[test]
    fn mark_key_columns_sets_flags() {
        let mut t = TableDescriptor::new("public", "order", RelationKind::Table);
        t.set_columns(vec![column("id", 1), column("user_id", 2), column("note", 3)]);
        t.primary_key = vec!["id".to_string()];
        t.foreign_keys = vec![ForeignKeyDescriptor {
            name: "orders_user_id_fkey".to_string(),
            column: "user_id".to_string(),
            ref_table: "users".to_string(),
            ref_column: "id".to_string(),
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        }];
        t.mark_key_columns();

        assert!(t.column("id").unwrap().is_pk);
        assert!(!t.column("id").unwrap().is_fk);
        assert!(t.column("user_id").unwrap().is_fk);
        assert!(!t.column("note").unwrap().is_pk);
    }

    #[test]
    fn volatility_mapping() {
        assert_eq!(Volatility::from_provolatile("i"), Volatility::Immutable);
        assert_eq!(Volatility::from_provolatile("s"), Volatility::Stable);
        assert_eq!(Volatility::from_provolatile("v"), Volatility::Volatile);
        assert_eq!(Volatility::from_provolatile("?"), Volatility::Volatile);
    }

    #[test]
    fn key_is_schema_dot_name() {
        let t = TableDescriptor::new("auth", "users", RelationKind::Table);
        assert_eq!(t.key(), "auth.users");
    }
}
