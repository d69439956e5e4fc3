//! Schema introspection and cache for Fluxbase.
//!
//! [`SchemaInspector`] reads the live catalog into normalized descriptors
//! with one batched query per collection; [`SchemaCache`] keeps an immutable
//! snapshot of the result fresh under a TTL with cluster-wide invalidation.

pub mod cache;
pub mod inspector;
pub mod model;
pub mod rest_path;

pub use cache::{SchemaCache, SchemaSnapshot};
pub use inspector::{is_system_schema, SchemaInspector, SchemaLoad, SchemaSource};
pub use model::{
    ColumnDescriptor, ForeignKeyDescriptor, FunctionDescriptor, FunctionParam, IndexDescriptor,
    RelationKind, TableDescriptor, VectorColumn, Volatility,
};
pub use rest_path::{pluralize, rest_path};
