//! Dialect-parametric compiler (spec §4.3, C3): walks the AST producing SQL text and an ordered
//! parameter list. Pure and synchronous — no I/O, no suspension points (spec §5).
//!
//! `sqlparser` participates in exactly one place here: [`crate::dialect::DialectHandler::quote_identifier`]
//! builds on `sqlparser::ast::Ident`'s quoting `Display` impl. Everything else — the SELECT/
//! INSERT/UPDATE/DELETE shape, placeholder strategy, hydration aliasing — is bespoke, because
//! `sqlparser`'s own `ast::Query`/`ast::Statement` can't express our per-dialect placeholders or
//! relation-alias columns without fighting its model.

mod dml;
mod render;
mod select;

use crate::ast::{Delete, Insert, Literal, Select, Update};
use crate::dialect::Dialect;
use crate::error::Result;

use render::State;

/// Output of compiling one AST node: ready-to-execute SQL text plus its ordered bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Literal>,
}

fn finish(mut state: State<'_>) -> Compiled {
    state.sql.push(';');
    Compiled { sql: state.sql, params: state.params }
}

pub fn compile_select(query: &Select, dialect: Dialect) -> Result<Compiled> {
    let mut state = State::new(dialect.handler());
    select::render_select(&mut state, query)?;
    Ok(finish(state))
}

pub fn compile_insert(query: &Insert, dialect: Dialect) -> Result<Compiled> {
    let mut state = State::new(dialect.handler());
    dml::render_insert(&mut state, query)?;
    Ok(finish(state))
}

pub fn compile_update(query: &Update, dialect: Dialect) -> Result<Compiled> {
    let mut state = State::new(dialect.handler());
    dml::render_update(&mut state, query)?;
    Ok(finish(state))
}

pub fn compile_delete(query: &Delete, dialect: Dialect) -> Result<Compiled> {
    let mut state = State::new(dialect.handler());
    dml::render_delete(&mut state, query)?;
    Ok(finish(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Operand, Projection, Select, TableLike, TableRef};

    fn users_select() -> Select {
        let mut select = Select::from(TableLike::Table(TableRef::new("users")));
        select.columns = vec![Projection::Expr(Operand::column("users", "id"))];
        select
    }

    #[test]
    fn s1_schema_qualified_join_across_dialects() {
        let mut select = users_select();
        select.from = TableLike::Table(TableRef { name: "users".into(), schema: Some("hr".into()), alias: None });
        select.joins.push(crate::ast::Join {
            kind: crate::ast::JoinKind::Inner,
            target: TableLike::Table(TableRef { name: "orders".into(), schema: Some("sales".into()), alias: None }),
            on: Expression::eq(Operand::column("users", "id"), Operand::column("orders", "user_id")),
            relation_name: None,
        });

        let pg = compile_select(&select, Dialect::Postgres).unwrap();
        assert!(pg.sql.contains("FROM \"hr\".\"users\""));
        assert!(pg.sql.contains("JOIN \"sales\".\"orders\" ON"));

        let mysql = compile_select(&select, Dialect::MySql).unwrap();
        assert!(mysql.sql.contains("FROM `hr`.`users`"));
        assert!(mysql.sql.contains("JOIN `sales`.`orders` ON"));

        let mssql = compile_select(&select, Dialect::MsSql).unwrap();
        assert!(mssql.sql.contains("FROM [hr].[users]"));
        assert!(mssql.sql.contains("JOIN [sales].[orders] ON"));
    }

    #[test]
    fn s2_like_with_escape_on_sqlite() {
        let mut select = Select::from(TableLike::Table(TableRef::new("users")));
        select.where_ = Some(Expression::Like(crate::ast::LikeExpr {
            left: Operand::column("users", "name"),
            pattern: Operand::from("Admin\\_%"),
            escape: Some('\\'),
            op: crate::ast::LikeOp::Like,
        }));
        let compiled = compile_select(&select, Dialect::Sqlite).unwrap();
        assert!(compiled.sql.contains("\"users\".\"name\" LIKE ? ESCAPE ?"));
        assert_eq!(compiled.params, vec![Literal::Text("Admin\\_%".into()), Literal::Text("\\".into())]);
    }

    #[test]
    fn s3_between_on_postgres() {
        let mut select = users_select();
        select.where_ = Some(Expression::Between(crate::ast::BetweenExpr {
            left: Operand::column("users", "id"),
            lower: Operand::from(1i64),
            upper: Operand::from(100i64),
            op: crate::ast::BetweenOp::Between,
        }));
        let compiled = compile_select(&select, Dialect::Postgres).unwrap();
        assert!(compiled.sql.contains("\"users\".\"id\" BETWEEN $1 AND $2"));
        assert_eq!(compiled.params, vec![Literal::Int(1), Literal::Int(100)]);
    }

    #[test]
    fn s4_union_hoists_cte() {
        let cte_query = users_select();
        let mut base = users_select();
        base.ctes.push(crate::ast::Cte {
            name: "u".into(),
            query: Box::new(cte_query),
            columns: Vec::new(),
            recursive: false,
        });
        base.set_operations.push(crate::ast::SetOperation { op: crate::ast::SetOp::Union, rhs: Box::new(users_select()) });

        let compiled = compile_select(&base, Dialect::Sqlite).unwrap();
        assert!(compiled.sql.starts_with("WITH \"u\" AS (SELECT \"users\".\"id\" FROM \"users\")"));
        assert!(compiled.sql.contains(") UNION ("));
    }

    #[test]
    fn s5_paging_on_mssql_without_order_by() {
        let mut select = Select::from(TableLike::Table(TableRef::new("users")));
        select.limit = Some(10);
        select.offset = Some(20);
        let compiled = compile_select(&select, Dialect::MsSql).unwrap();
        assert!(compiled.sql.contains("ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
    }

    #[test]
    fn compile_is_deterministic() {
        let select = users_select();
        let a = compile_select(&select, Dialect::Postgres).unwrap();
        let b = compile_select(&select, Dialect::Postgres).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn set_operand_with_limit_is_rejected() {
        let mut base = users_select();
        let mut bad_rhs = users_select();
        bad_rhs.limit = Some(1);
        base.set_operations.push(crate::ast::SetOperation { op: crate::ast::SetOp::Union, rhs: Box::new(bad_rhs) });
        let err = compile_select(&base, Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidSetOperand { .. }));
    }

    #[test]
    fn mysql_insert_returning_is_unsupported() {
        let insert = Insert {
            table: TableLike::Table(TableRef::new("users")),
            values: crate::ast::InsertValues::Rows(vec![crate::ast::InsertRow(vec![(
                "name".into(),
                Operand::from("ada"),
            )])]),
            returning: vec![Operand::column("users", "id")],
        };
        let err = compile_insert(&insert, Dialect::MySql).unwrap_err();
        assert!(matches!(err, crate::error::Error::UnsupportedDialectFeature { .. }));
    }

    #[test]
    fn postgres_insert_appends_returning() {
        let insert = Insert {
            table: TableLike::Table(TableRef::new("users")),
            values: crate::ast::InsertValues::Rows(vec![crate::ast::InsertRow(vec![(
                "name".into(),
                Operand::from("ada"),
            )])]),
            returning: vec![Operand::column("users", "id")],
        };
        let compiled = compile_insert(&insert, Dialect::Postgres).unwrap();
        assert_eq!(compiled.sql, "INSERT INTO \"users\" (\"name\") VALUES ($1) RETURNING \"users\".\"id\";");
        assert_eq!(compiled.params, vec![Literal::Text("ada".into())]);
    }
}
