//! Fluent, immutable AST producers (spec §4.4, C4). Every method takes `self` by value and
//! returns a fresh builder; the teacher's own "transform the receiver, return a new artifact"
//! idiom generalizes directly to copy-on-write query construction.

mod mutate;
mod select;

pub use mutate::{insert_from_select, DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use select::{FunctionTableOptions, IncludeKind, IncludeSpec, SelectBuilder};
