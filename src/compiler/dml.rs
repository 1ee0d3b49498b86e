use crate::ast::*;
use crate::dialect::Dialect;
use crate::error::{Error, Result};

use super::render::{render_projection, render_table_like, render_value, require_column, State};

fn render_returning(state: &mut State, returning: &[Operand], pseudo_table: &'static str) -> Result<()> {
    if returning.is_empty() {
        return Ok(());
    }
    match state.dialect.dialect() {
        Dialect::Postgres | Dialect::Sqlite => {
            state.sql.push_str(" RETURNING ");
            for (i, op) in returning.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                render_projection(state, op)?;
            }
        }
        Dialect::MsSql => {
            state.sql.push_str(" OUTPUT ");
            for (i, op) in returning.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                let col = require_column(op, "OUTPUT")?;
                state.sql.push_str(pseudo_table);
                state.sql.push('.');
                state.push_identifier(&col.name);
            }
        }
        Dialect::MySql => {
            return Err(Error::unsupported_dialect_feature("mysql", "RETURNING"));
        }
    }
    Ok(())
}

pub(super) fn render_insert(state: &mut State, insert: &Insert) -> Result<()> {
    state.sql.push_str("INSERT INTO ");
    render_table_like(state, &insert.table)?;

    match &insert.values {
        InsertValues::Rows(rows) => {
            let first = rows.first().ok_or_else(|| Error::compile_failure("Insert", "no rows to insert"))?;
            state.sql.push_str(" (");
            for (i, (col, _)) in first.0.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                state.push_identifier(col);
            }
            state.sql.push(')');

            // MS SQL's OUTPUT clause sits between the column list and VALUES.
            if state.dialect.dialect() == Dialect::MsSql {
                render_returning(state, &insert.returning, "INSERTED")?;
            }

            state.sql.push_str(" VALUES ");
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                state.sql.push('(');
                for (j, (_, value)) in row.0.iter().enumerate() {
                    if j > 0 {
                        state.sql.push_str(", ");
                    }
                    render_value(state, value)?;
                }
                state.sql.push(')');
            }

            if state.dialect.dialect() != Dialect::MsSql {
                render_returning(state, &insert.returning, "INSERTED")?;
            }
        }
        InsertValues::Subquery(select) => {
            if state.dialect.dialect() == Dialect::MsSql {
                render_returning(state, &insert.returning, "INSERTED")?;
            }
            state.sql.push(' ');
            super::select::render_select(state, select)?;
            if state.dialect.dialect() != Dialect::MsSql {
                render_returning(state, &insert.returning, "INSERTED")?;
            }
        }
    }
    Ok(())
}

pub(super) fn render_update(state: &mut State, update: &Update) -> Result<()> {
    state.sql.push_str("UPDATE ");
    render_table_like(state, &update.table)?;
    state.sql.push_str(" SET ");
    for (i, (col, value)) in update.set.iter().enumerate() {
        if i > 0 {
            state.sql.push_str(", ");
        }
        state.push_identifier(col);
        state.sql.push_str(" = ");
        render_value(state, value)?;
    }

    if state.dialect.dialect() == Dialect::MsSql {
        render_returning(state, &update.returning, "INSERTED")?;
    }

    if let Some(where_) = &update.where_ {
        state.sql.push_str(" WHERE ");
        super::render::render_expr(state, where_, false)?;
    }

    if state.dialect.dialect() != Dialect::MsSql {
        render_returning(state, &update.returning, "INSERTED")?;
    }
    Ok(())
}

pub(super) fn render_delete(state: &mut State, delete: &Delete) -> Result<()> {
    state.sql.push_str("DELETE FROM ");
    render_table_like(state, &delete.from)?;

    if state.dialect.dialect() == Dialect::MsSql {
        render_returning(state, &delete.returning, "DELETED")?;
    }

    if let Some(where_) = &delete.where_ {
        state.sql.push_str(" WHERE ");
        super::render::render_expr(state, where_, false)?;
    }

    if state.dialect.dialect() != Dialect::MsSql {
        render_returning(state, &delete.returning, "DELETED")?;
    }
    Ok(())
}
