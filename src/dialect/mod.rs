//! Dialect as a capability set (spec §9 "Dynamic dispatch on dialect"): one enum, one trait with
//! defaulted methods, four zero-sized handler structs. Mirrors the teacher crate's
//! `ast::dialect::Dialect` / `sql::dialect::Dialect` split, collapsed into a single enum since
//! this crate has no separate frontend/backend dialect distinction.

mod handlers;

use sqlparser::ast::Ident;
use strum::{EnumIter, IntoEnumIterator};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::error::{Error, Result};

pub use handlers::{MsSqlHandler, MySqlHandler, PostgresHandler, SqliteHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter)]
pub enum Dialect {
    #[strum(serialize = "mysql")]
    MySql,
    #[strum(serialize = "postgres")]
    Postgres,
    #[strum(serialize = "sqlite")]
    Sqlite,
    #[strum(serialize = "mssql")]
    MsSql,
}

impl Dialect {
    pub fn handler(&self) -> &'static dyn DialectHandler {
        match self {
            Dialect::MySql => &MySqlHandler,
            Dialect::Postgres => &PostgresHandler,
            Dialect::Sqlite => &SqliteHandler,
            Dialect::MsSql => &MsSqlHandler,
        }
    }

    pub fn all() -> impl Iterator<Item = Dialect> {
        Dialect::iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStyle {
    /// `LIMIT n OFFSET m` (MySQL, PostgreSQL, SQLite).
    LimitOffset,
    /// `ORDER BY … OFFSET m ROWS FETCH NEXT n ROWS ONLY`, synthesizing an `ORDER BY` clause when
    /// the query has none (SQL Server).
    OffsetFetch,
}

/// How a freshly-inserted row's identity-generated primary key is retrieved (spec §9 "Open
/// questions", resolved). Carries the already-quoted SQL fragment for the column so the session
/// doesn't need dialect knowledge beyond matching on this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRetrieval {
    /// Appended to the compiled `INSERT` statement: `RETURNING "id"`.
    Returning(String),
    /// Inserted into the compiled `INSERT` statement before `VALUES`: `OUTPUT INSERTED.[id]`.
    Output(String),
    /// Issued as a separate statement through the same executor after the `INSERT` commits.
    FollowUpQuery(String),
}

/// A rendering strategy from AST to SQL bytes + parameters for one database product (spec §4.3,
/// GLOSSARY "Dialect"). Every method has a sensible cross-dialect default; a concrete handler
/// overrides only what differs.
pub trait DialectHandler: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn quote_style(&self) -> char;

    fn quote_identifier(&self, id: &str) -> String {
        Ident::with_quote(self.quote_style(), id).to_string()
    }

    fn quote_qualified(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(name)),
            None => self.quote_identifier(name),
        }
    }

    /// 1-based parameter index, as it appears after this placeholder in left-to-right order.
    fn placeholder(&self, index: usize) -> String;

    fn format_bool_literal(&self, value: bool) -> &'static str;

    /// `path` is a dot-separated list of JSON object keys, with no leading `$.`.
    fn json_path(&self, column_sql: &str, path: &str) -> String;

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::LimitOffset
    }

    fn supports_lateral(&self) -> bool {
        false
    }

    fn supports_with_ordinality(&self) -> bool {
        false
    }

    fn check_function_table_options(&self, lateral: bool, with_ordinality: bool) -> Result<()> {
        if lateral && !self.supports_lateral() {
            return Err(Error::unsupported_dialect_feature(self.dialect().to_string(), "LATERAL"));
        }
        if with_ordinality && !self.supports_with_ordinality() {
            return Err(Error::unsupported_dialect_feature(self.dialect().to_string(), "WITH ORDINALITY"));
        }
        Ok(())
    }

    fn identity_retrieval(&self, pk_column: &str) -> IdentityRetrieval;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_styles_match_wire_surface_table() {
        assert_eq!(Dialect::MySql.handler().quote_identifier("x"), "`x`");
        assert_eq!(Dialect::Postgres.handler().quote_identifier("x"), "\"x\"");
        assert_eq!(Dialect::Sqlite.handler().quote_identifier("x"), "\"x\"");
        assert_eq!(Dialect::MsSql.handler().quote_identifier("x"), "[x]");
    }

    #[test]
    fn quote_identifier_escapes_embedded_quote_char() {
        assert_eq!(Dialect::Postgres.handler().quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.handler().quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn placeholders_match_wire_surface_table() {
        assert_eq!(Dialect::MySql.handler().placeholder(1), "?");
        assert_eq!(Dialect::Sqlite.handler().placeholder(1), "?");
        assert_eq!(Dialect::Postgres.handler().placeholder(1), "$1");
        assert_eq!(Dialect::Postgres.handler().placeholder(3), "$3");
        assert_eq!(Dialect::MsSql.handler().placeholder(2), "@p2");
    }

    #[test]
    fn quote_qualified_joins_schema_and_name() {
        assert_eq!(Dialect::MsSql.handler().quote_qualified(Some("hr"), "users"), "[hr].[users]");
        assert_eq!(Dialect::MsSql.handler().quote_qualified(None, "users"), "[users]");
    }
}
