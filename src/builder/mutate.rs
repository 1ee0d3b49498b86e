use crate::ast::{Delete, Expression, Insert, InsertRow, InsertValues, Operand, Select, TableLike, TableRef, Update};
use crate::compiler::{self, Compiled};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::Catalog;

fn validate_columns(catalog: &Catalog, table: &str, assignments: &[(String, Operand)]) -> Result<()> {
    let descriptor = catalog.require_table(table)?;
    for (name, _) in assignments {
        if descriptor.column(name).is_none() {
            return Err(Error::invalid_schema(format!("table `{table}` has no column `{name}`")));
        }
    }
    Ok(())
}

/// Immutable producer of an `Insert` AST (spec §4.7's "compile INSERT... via the builder").
#[derive(Clone)]
pub struct InsertBuilder<'c> {
    catalog: &'c Catalog,
    table: String,
    rows: Vec<InsertRow>,
    returning: Vec<Operand>,
}

impl<'c> InsertBuilder<'c> {
    pub fn new(catalog: &'c Catalog, table: &str) -> Result<Self> {
        catalog.require_table(table)?;
        Ok(InsertBuilder { catalog, table: table.to_string(), rows: Vec::new(), returning: Vec::new() })
    }

    pub fn row(mut self, assignments: Vec<(String, Operand)>) -> Result<Self> {
        validate_columns(self.catalog, &self.table, &assignments)?;
        self.rows.push(InsertRow(assignments));
        Ok(self)
    }

    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns.into_iter().map(|c| Operand::column(&self.table, c)).collect();
        self
    }

    pub fn get_ast(self) -> Result<Insert> {
        if self.rows.is_empty() {
            return Err(Error::invalid_schema(format!("insert into `{}` has no rows", self.table)));
        }
        Ok(Insert {
            table: TableLike::Table(TableRef::new(self.table)),
            values: InsertValues::Rows(self.rows),
            returning: self.returning,
        })
    }

    pub fn compile(self, dialect: Dialect) -> Result<Compiled> {
        compiler::compile_insert(&self.get_ast()?, dialect)
    }
}

/// Immutable producer of an `Insert` whose values come from a `SELECT` (spec §4.2 `InsertValues::Subquery`).
pub fn insert_from_select(table: &str, returning: Vec<String>, select: Select) -> Insert {
    Insert {
        table: TableLike::Table(TableRef::new(table)),
        values: InsertValues::Subquery(Box::new(select)),
        returning: returning.into_iter().map(|c| Operand::column(table, c)).collect(),
    }
}

/// Immutable producer of an `Update` AST.
#[derive(Clone)]
pub struct UpdateBuilder<'c> {
    catalog: &'c Catalog,
    table: String,
    set: Vec<(String, Operand)>,
    where_: Option<Expression>,
    returning: Vec<Operand>,
}

impl<'c> UpdateBuilder<'c> {
    pub fn new(catalog: &'c Catalog, table: &str) -> Result<Self> {
        catalog.require_table(table)?;
        Ok(UpdateBuilder { catalog, table: table.to_string(), set: Vec::new(), where_: None, returning: Vec::new() })
    }

    pub fn set(mut self, column: impl Into<String>, value: Operand) -> Result<Self> {
        let column = column.into();
        validate_columns(self.catalog, &self.table, std::slice::from_ref(&(column.clone(), value.clone())))?;
        self.set.retain(|(existing, _)| existing != &column);
        self.set.push((column, value));
        Ok(self)
    }

    pub fn where_(mut self, expr: Expression) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => Expression::and(vec![existing, expr]),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns.into_iter().map(|c| Operand::column(&self.table, c)).collect();
        self
    }

    pub fn get_ast(self) -> Result<Update> {
        if self.set.is_empty() {
            return Err(Error::invalid_schema(format!("update on `{}` has no assignments", self.table)));
        }
        Ok(Update {
            table: TableLike::Table(TableRef::new(self.table)),
            set: self.set,
            where_: self.where_,
            returning: self.returning,
        })
    }

    pub fn compile(self, dialect: Dialect) -> Result<Compiled> {
        compiler::compile_update(&self.get_ast()?, dialect)
    }
}

/// Immutable producer of a `Delete` AST.
#[derive(Clone)]
pub struct DeleteBuilder<'c> {
    catalog: &'c Catalog,
    table: String,
    where_: Option<Expression>,
    returning: Vec<Operand>,
}

impl<'c> DeleteBuilder<'c> {
    pub fn new(catalog: &'c Catalog, table: &str) -> Result<Self> {
        catalog.require_table(table)?;
        Ok(DeleteBuilder { catalog, table: table.to_string(), where_: None, returning: Vec::new() })
    }

    pub fn where_(mut self, expr: Expression) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => Expression::and(vec![existing, expr]),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns.into_iter().map(|c| Operand::column(&self.table, c)).collect();
        self
    }

    pub fn get_ast(self) -> Result<Delete> {
        Ok(Delete { from: TableLike::Table(TableRef::new(self.table)), where_: self.where_, returning: self.returning })
    }

    pub fn compile(self, dialect: Dialect) -> Result<Compiled> {
        compiler::compile_delete(&self.get_ast()?, dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{column, TableDescriptor};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(
                TableDescriptor::define(
                    "users",
                    vec![column::bigint("id").primary_key(), column::varchar("name", 255)],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn insert_rejects_unknown_column() {
        let catalog = catalog();
        let err = InsertBuilder::new(&catalog, "users").unwrap().row(vec![("nope".into(), Operand::from("x"))]).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn update_set_is_idempotent_on_same_column() {
        let catalog = catalog();
        let builder = UpdateBuilder::new(&catalog, "users")
            .unwrap()
            .set("name", Operand::from("a"))
            .unwrap()
            .set("name", Operand::from("b"))
            .unwrap();
        assert_eq!(builder.set.len(), 1);
        assert_eq!(builder.set[0].1, Operand::from("b"));
    }

    #[test]
    fn delete_without_where_compiles() {
        let catalog = catalog();
        let compiled = DeleteBuilder::new(&catalog, "users").unwrap().compile(Dialect::Postgres).unwrap();
        assert_eq!(compiled.sql, "DELETE FROM \"users\";");
    }
}
