use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::ast::operand::Operand;
use crate::ast::query::Select;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub schema: Option<String>,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl AsRef<str>) -> Self {
        TableRef { name: name.as_ref().to_string(), schema: None, alias: None }
    }

    pub fn aliased(name: impl AsRef<str>, alias: impl AsRef<str>) -> Self {
        TableRef { name: name.as_ref().to_string(), schema: None, alias: Some(alias.as_ref().to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTableRef {
    pub name: String,
    pub args: Vec<Operand>,
    pub alias: String,
    pub schema: Option<String>,
    pub lateral: bool,
    pub with_ordinality: bool,
    pub column_aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubqueryRef {
    pub query: Box<Select>,
    pub alias: String,
}

/// Anything that can appear in a `FROM` clause or as a join target (spec §4.2 "Tables").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum TableLike {
    Table(TableRef),
    FunctionTable(FunctionTableRef),
    Subquery(SubqueryRef),
}

impl TableLike {
    pub fn table(name: impl Into<String>) -> Self {
        TableLike::Table(TableRef::new(name))
    }

    /// The name other nodes reference this source by: the alias if present, else the base name.
    /// Function tables and subqueries always carry an alias, so this never panics on them.
    pub fn reference_name(&self) -> &str {
        match self {
            TableLike::Table(t) => t.alias.as_deref().unwrap_or(&t.name),
            TableLike::FunctionTable(f) => &f.alias,
            TableLike::Subquery(s) => &s.alias,
        }
    }
}

impl From<TableRef> for TableLike {
    fn from(t: TableRef) -> Self {
        TableLike::Table(t)
    }
}
