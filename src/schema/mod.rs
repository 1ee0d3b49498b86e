//! Schema descriptors (spec §3, §4.1): immutable metadata for tables, columns, relations, and
//! indexes, plus the [`Catalog`] that owns a set of tables built in two phases so that relation
//! graphs may be cyclic.

mod catalog;
pub mod column;
mod entity;
mod relation;
mod table;

pub use catalog::Catalog;
pub use column::{ColumnDefault, ColumnDescriptor, ColumnReference, ColumnType, IdentityStrategy, Unique};
pub use entity::{get, literal_to_value, pk_string, value_to_literal, Entity};
pub use relation::{Cascade, RelationDescriptor, RelationKind};
pub use table::{HookFn, IndexDescriptor, TableDescriptor, TableHooks};
