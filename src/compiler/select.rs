use crate::ast::*;
use crate::dialect::PagingStyle;
use crate::error::{Error, Result};

use super::render::{render_order_by, render_projection, render_table_like, render_value, State};

fn set_op_token(op: SetOp) -> &'static str {
    match op {
        SetOp::Union => "UNION",
        SetOp::UnionAll => "UNION ALL",
        SetOp::Intersect => "INTERSECT",
        SetOp::Except => "EXCEPT",
    }
}

fn render_with_clause(state: &mut State, ctes: &[Cte]) -> Result<()> {
    if ctes.is_empty() {
        return Ok(());
    }
    state.sql.push_str("WITH ");
    if ctes.iter().any(|c| c.recursive) {
        state.sql.push_str("RECURSIVE ");
    }
    for (i, cte) in ctes.iter().enumerate() {
        if i > 0 {
            state.sql.push_str(", ");
        }
        state.push_identifier(&cte.name);
        if !cte.columns.is_empty() {
            state.sql.push_str(" (");
            for (j, col) in cte.columns.iter().enumerate() {
                if j > 0 {
                    state.sql.push_str(", ");
                }
                state.push_identifier(col);
            }
            state.sql.push(')');
        }
        state.sql.push_str(" AS (");
        render_core(state, &cte.query)?;
        state.sql.push(')');
    }
    state.sql.push(' ');
    Ok(())
}

fn render_distinct(state: &mut State, distinct: &Option<DistinctKind>) -> Result<()> {
    match distinct {
        None => {}
        Some(DistinctKind::All) => state.sql.push_str("DISTINCT "),
        Some(DistinctKind::Columns(cols)) => {
            if state.dialect.dialect() != crate::dialect::Dialect::Postgres {
                return Err(Error::unsupported_dialect_feature(state.dialect.dialect().to_string(), "DISTINCT ON"));
            }
            state.sql.push_str("DISTINCT ON (");
            for (i, col) in cols.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                render_value(state, col)?;
            }
            state.sql.push_str(") ");
        }
    }
    Ok(())
}

fn join_kind_token(kind: JoinKind) -> &'static str {
    match kind {
        JoinKind::Inner => "INNER",
        JoinKind::Left => "LEFT",
        JoinKind::Right => "RIGHT",
        JoinKind::Cross => "CROSS",
    }
}

/// Renders `SELECT … HAVING …` — everything except CTEs, and except `ORDER BY`/`LIMIT`/`OFFSET`,
/// which a caller renders at whichever level (plain select or outermost set-operation level) the
/// invariant in spec §3 puts them at.
fn render_core(state: &mut State, select: &Select) -> Result<()> {
    state.sql.push_str("SELECT ");
    render_distinct(state, &select.distinct)?;
    for (i, col) in select.columns.iter().enumerate() {
        if i > 0 {
            state.sql.push_str(", ");
        }
        match col {
            Projection::Wildcard => {
                state.sql.push_str(&state.dialect.quote_qualified(None, select.from.reference_name()));
                state.sql.push('.');
                state.push_identifier("*");
            }
            Projection::Expr(op) => render_projection(state, op)?,
        }
    }
    state.sql.push_str(" FROM ");
    render_table_like(state, &select.from)?;
    for join in &select.joins {
        state.sql.push(' ');
        state.sql.push_str(join_kind_token(join.kind));
        state.sql.push_str(" JOIN ");
        render_table_like(state, &join.target)?;
        if join.kind != JoinKind::Cross {
            state.sql.push_str(" ON ");
            super::render::render_expr(state, &join.on, false)?;
        }
    }
    if let Some(where_) = &select.where_ {
        state.sql.push_str(" WHERE ");
        super::render::render_expr(state, where_, false)?;
    }
    if !select.group_by.is_empty() {
        state.sql.push_str(" GROUP BY ");
        for (i, g) in select.group_by.iter().enumerate() {
            if i > 0 {
                state.sql.push_str(", ");
            }
            render_value(state, g)?;
        }
    }
    if let Some(having) = &select.having {
        state.sql.push_str(" HAVING ");
        super::render::render_expr(state, having, false)?;
    }
    Ok(())
}

fn render_paging(state: &mut State, limit: Option<u64>, offset: Option<u64>, order_by_rendered: bool) {
    if limit.is_none() && offset.is_none() {
        return;
    }
    match state.dialect.paging_style() {
        PagingStyle::LimitOffset => match (limit, offset) {
            (Some(l), Some(o)) => state.sql.push_str(&format!(" LIMIT {l} OFFSET {o}")),
            (Some(l), None) => state.sql.push_str(&format!(" LIMIT {l}")),
            (None, Some(o)) => {
                if state.dialect.dialect() == crate::dialect::Dialect::Sqlite {
                    state.sql.push_str(&format!(" LIMIT -1 OFFSET {o}"));
                } else {
                    state.sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {o}"));
                }
            }
            (None, None) => unreachable!(),
        },
        PagingStyle::OffsetFetch => {
            if !order_by_rendered {
                state.sql.push_str(" ORDER BY (SELECT NULL)");
            }
            let offset = offset.unwrap_or(0);
            state.sql.push_str(&format!(" OFFSET {offset} ROWS"));
            if let Some(limit) = limit {
                state.sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
            }
        }
    }
}

/// Entry point shared by top-level compilation and anywhere a `Select` is nested (subquery,
/// scalar subquery, `IN`/`EXISTS` subquery, CTE body). No trailing semicolon — only
/// [`super::compile_select`] adds one, since this function also renders non-statement contexts.
pub(super) fn render_select(state: &mut State, select: &Select) -> Result<()> {
    if select.set_operations.is_empty() {
        render_with_clause(state, &select.ctes)?;
        render_core(state, select)?;
        render_order_by(state, &select.order_by)?;
        render_paging(state, select.limit, select.offset, !select.order_by.is_empty());
        return Ok(());
    }

    for so in &select.set_operations {
        if so.rhs.has_set_operand_restricted_clauses() {
            return Err(Error::invalid_set_operand(
                "ORDER BY/LIMIT/OFFSET may only be attached to the outermost select of a set operation",
            ));
        }
        if !so.rhs.set_operations.is_empty() {
            return Err(Error::invalid_set_operand("a set operation operand may not itself carry set operations"));
        }
    }

    let mut combined_ctes = select.ctes.clone();
    for so in &select.set_operations {
        combined_ctes.extend(so.rhs.ctes.iter().cloned());
    }
    render_with_clause(state, &combined_ctes)?;

    state.sql.push('(');
    render_core(state, select)?;
    state.sql.push(')');
    for so in &select.set_operations {
        state.sql.push(' ');
        state.sql.push_str(set_op_token(so.op));
        state.sql.push_str(" (");
        render_core(state, &so.rhs)?;
        state.sql.push(')');
    }
    render_order_by(state, &select.order_by)?;
    render_paging(state, select.limit, select.offset, !select.order_by.is_empty());
    Ok(())
}
