use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::column::ColumnDescriptor;
use crate::schema::entity::Entity;
use crate::schema::relation::RelationDescriptor;

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A lifecycle hook callback. Boxed behind `Arc` (not `Box`) so table descriptors stay `Clone`,
/// matching the "created once, treated as immutable" lifecycle in spec §3.
pub type HookFn = Arc<dyn Fn(&mut Entity) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TableHooks {
    pub before_insert: Option<HookFn>,
    pub after_insert: Option<HookFn>,
    pub before_update: Option<HookFn>,
    pub after_update: Option<HookFn>,
    pub before_delete: Option<HookFn>,
    pub after_delete: Option<HookFn>,
}

impl fmt::Debug for TableHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHooks")
            .field("before_insert", &self.before_insert.is_some())
            .field("after_insert", &self.after_insert.is_some())
            .field("before_update", &self.before_update.is_some())
            .field("after_update", &self.after_update.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .finish()
    }
}

/// Immutable table metadata (spec §3/§4.1). Column insertion order is preserved and IS the
/// declared column order, per spec — stored as a `Vec` rather than a hash map.
#[derive(Debug, Clone, Default)]
pub struct TableDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub hooks: TableHooks,
}

impl TableDescriptor {
    /// `defineTable(name, columns, relations?, indexes?, options?)`. Stamps each column with its
    /// owning table name and returns the assembled descriptor. Relation back-references for
    /// cyclic schema graphs are attached afterward via [`crate::schema::Catalog::attach_relations`].
    pub fn define(
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        relations: Vec<RelationDescriptor>,
        indexes: Vec<IndexDescriptor>,
    ) -> Result<Self> {
        Self::define_in_schema(name, None, columns, relations, indexes)
    }

    pub fn define_in_schema(
        name: impl Into<String>,
        schema: Option<String>,
        columns: Vec<ColumnDescriptor>,
        relations: Vec<RelationDescriptor>,
        indexes: Vec<IndexDescriptor>,
    ) -> Result<Self> {
        let name = name.into();

        let mut seen = std::collections::HashSet::new();
        let mut primary_keys = 0;
        let mut stamped = Vec::with_capacity(columns.len());
        for mut col in columns {
            if !seen.insert(col.name.clone()) {
                return Err(Error::invalid_schema(format!(
                    "table `{name}` declares column `{}` more than once",
                    col.name
                )));
            }
            if col.primary {
                primary_keys += 1;
            }
            col.table = Some(name.clone());
            stamped.push(col);
        }
        if primary_keys > 1 {
            return Err(Error::invalid_schema(format!(
                "table `{name}` declares {primary_keys} primary key columns; exactly one is required"
            )));
        }

        let mut rel_names = std::collections::HashSet::new();
        for rel in &relations {
            if !rel_names.insert(rel.name.clone()) {
                return Err(Error::invalid_schema(format!(
                    "table `{name}` declares relation `{}` more than once",
                    rel.name
                )));
            }
        }

        Ok(TableDescriptor {
            name,
            schema,
            columns: stamped,
            relations,
            indexes,
            hooks: TableHooks::default(),
        })
    }

    pub fn with_hooks(mut self, hooks: TableHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Write-once patch of relation back-references onto an already-declared table, to permit
    /// cyclic relation graphs (spec §9's two-phase build).
    pub fn attach_relations(&mut self, relations: Vec<RelationDescriptor>) -> Result<()> {
        for rel in relations {
            if self.relations.iter().any(|r| r.name == rel.name) {
                return Err(Error::invalid_schema(format!(
                    "relation `{}` already attached to table `{}`",
                    rel.name, self.name
                )));
            }
            self.relations.push(rel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column;

    #[test]
    fn define_stamps_owning_table_and_preserves_order() {
        let t = TableDescriptor::define(
            "users",
            vec![
                column::bigint("id").primary_key(),
                column::varchar("email", 255).not_null(),
            ],
            vec![],
            vec![],
        )
        .unwrap();

        assert_eq!(t.columns[0].name, "id");
        assert_eq!(t.columns[1].name, "email");
        assert_eq!(t.columns[0].table.as_deref(), Some("users"));
    }

    #[test]
    fn define_rejects_duplicate_columns() {
        let err = TableDescriptor::define(
            "users",
            vec![column::bigint("id"), column::bigint("id")],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn define_rejects_two_primary_keys() {
        let err = TableDescriptor::define(
            "users",
            vec![column::bigint("id").primary_key(), column::bigint("id2").primary_key()],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn attach_relations_is_write_once_per_name() {
        let mut t = TableDescriptor::define("posts", vec![column::bigint("id").primary_key()], vec![], vec![]).unwrap();
        t.attach_relations(vec![RelationDescriptor::belongs_to("author", "users", "author", "id")])
            .unwrap();
        let err = t
            .attach_relations(vec![RelationDescriptor::belongs_to("author", "users", "author", "id")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
