use super::{Dialect, DialectHandler, IdentityRetrieval, PagingStyle};

pub struct MySqlHandler;

impl DialectHandler for MySqlHandler {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn quote_style(&self) -> char {
        '`'
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn format_bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn json_path(&self, column_sql: &str, path: &str) -> String {
        format!("{column_sql}->'$.{path}'")
    }

    fn identity_retrieval(&self, _pk_column: &str) -> IdentityRetrieval {
        IdentityRetrieval::FollowUpQuery("SELECT LAST_INSERT_ID()".to_string())
    }
}

pub struct PostgresHandler;

impl DialectHandler for PostgresHandler {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote_style(&self) -> char {
        '"'
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn format_bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn json_path(&self, column_sql: &str, path: &str) -> String {
        let segments: Vec<&str> = path.split('.').collect();
        format!("{column_sql}#>>'{{{}}}'", segments.join(","))
    }

    fn supports_lateral(&self) -> bool {
        true
    }

    fn supports_with_ordinality(&self) -> bool {
        true
    }

    fn identity_retrieval(&self, pk_column: &str) -> IdentityRetrieval {
        IdentityRetrieval::Returning(format!("RETURNING {}", self.quote_identifier(pk_column)))
    }
}

pub struct SqliteHandler;

impl DialectHandler for SqliteHandler {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn quote_style(&self) -> char {
        '"'
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn format_bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn json_path(&self, column_sql: &str, path: &str) -> String {
        format!("json_extract({column_sql},'$.{path}')")
    }

    fn supports_lateral(&self) -> bool {
        true
    }

    fn identity_retrieval(&self, pk_column: &str) -> IdentityRetrieval {
        IdentityRetrieval::Returning(format!("RETURNING {}", self.quote_identifier(pk_column)))
    }
}

pub struct MsSqlHandler;

impl DialectHandler for MsSqlHandler {
    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn quote_style(&self) -> char {
        '['
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{index}")
    }

    fn format_bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn json_path(&self, column_sql: &str, path: &str) -> String {
        format!("JSON_VALUE({column_sql},'$.{path}')")
    }

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::OffsetFetch
    }

    fn identity_retrieval(&self, pk_column: &str) -> IdentityRetrieval {
        IdentityRetrieval::Output(format!("OUTPUT INSERTED.{}", self.quote_identifier(pk_column)))
    }
}
