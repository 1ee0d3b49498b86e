use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::schema::relation::RelationDescriptor;
use crate::schema::table::TableDescriptor;

/// An explicit, owned collection of table descriptors — the non-global-state stand-in for the
/// source's process-wide decorator registry (spec §9 "Global state"). A `Catalog` is built once
/// and then handed to a [`crate::session::Session`]; it carries no interior mutability once
/// built, since `declare_table`/`attach_relations` are the only mutating operations and both are
/// meant to run during application bootstrap, before any session exists.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableDescriptor>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn declare_table(&mut self, table: TableDescriptor) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::invalid_schema(format!(
                "table `{}` already declared in this catalog",
                table.name
            )));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Two-phase relation attachment (spec §9): call after every table this relation set refers
    /// to has been declared, so that cyclic `BelongsTo` pairs can both be wired up.
    pub fn attach_relations(&mut self, table: &str, relations: Vec<RelationDescriptor>) -> Result<()> {
        for rel in &relations {
            if !self.tables.contains_key(rel.kind.target()) {
                return Err(Error::invalid_schema(format!(
                    "relation `{}` on table `{table}` targets undeclared table `{}`",
                    rel.name,
                    rel.kind.target()
                )));
            }
        }
        let t = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::invalid_schema(format!("table `{table}` not declared in this catalog")))?;
        t.attach_relations(relations)
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn require_table(&self, name: &str) -> Result<&TableDescriptor> {
        self.table(name).ok_or_else(|| Error::invalid_schema(format!("table `{name}` not declared")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::column;
    use crate::schema::relation::RelationDescriptor;

    #[test]
    fn supports_cyclic_schema_via_two_phase_build() {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(TableDescriptor::define("users", vec![column::bigint("id").primary_key()], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "posts",
                    vec![column::bigint("id").primary_key(), column::bigint("author_id")],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();

        catalog
            .attach_relations("posts", vec![RelationDescriptor::belongs_to("author", "users", "author", "id")])
            .unwrap();
        catalog
            .attach_relations("users", vec![RelationDescriptor::has_many("posts", "posts", "users", "id", Default::default())])
            .unwrap();

        assert!(catalog.require_table("posts").unwrap().relation("author").is_some());
        assert!(catalog.require_table("users").unwrap().relation("posts").is_some());
    }

    #[test]
    fn attach_relations_rejects_undeclared_target() {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(TableDescriptor::define("posts", vec![column::bigint("id").primary_key()], vec![], vec![]).unwrap())
            .unwrap();
        let err = catalog
            .attach_relations("posts", vec![RelationDescriptor::belongs_to("author", "users", "author", "id")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }
}
