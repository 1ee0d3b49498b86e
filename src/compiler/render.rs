use crate::ast::*;
use crate::dialect::DialectHandler;
use crate::error::{Error, Result};

/// Accumulates SQL text and the ordered parameter list as the AST is walked depth-first,
/// left-to-right (spec §3 invariant: param order mirrors emission order).
pub(super) struct State<'d> {
    pub dialect: &'d dyn DialectHandler,
    pub sql: String,
    pub params: Vec<Literal>,
}

impl<'d> State<'d> {
    pub fn new(dialect: &'d dyn DialectHandler) -> Self {
        State { dialect, sql: String::new(), params: Vec::new() }
    }

    pub fn push_placeholder(&mut self, value: Literal) {
        self.params.push(value);
        self.sql.push_str(&self.dialect.placeholder(self.params.len()));
    }

    pub fn push_identifier(&mut self, id: &str) {
        self.sql.push_str(&self.dialect.quote_identifier(id));
    }
}

pub(super) fn render_table_like(state: &mut State, table: &TableLike) -> Result<()> {
    match table {
        TableLike::Table(t) => {
            state.sql.push_str(&state.dialect.quote_qualified(t.schema.as_deref(), &t.name));
            if let Some(alias) = &t.alias {
                state.sql.push_str(" AS ");
                state.push_identifier(alias);
            }
        }
        TableLike::FunctionTable(f) => {
            state.dialect.check_function_table_options(f.lateral, f.with_ordinality)?;
            if f.lateral {
                state.sql.push_str("LATERAL ");
            }
            state.sql.push_str(&state.dialect.quote_qualified(f.schema.as_deref(), &f.name));
            state.sql.push('(');
            for (i, arg) in f.args.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                render_value(state, arg)?;
            }
            state.sql.push(')');
            if f.with_ordinality {
                state.sql.push_str(" WITH ORDINALITY");
            }
            state.sql.push_str(" AS ");
            state.push_identifier(&f.alias);
            if !f.column_aliases.is_empty() {
                state.sql.push_str(" (");
                for (i, col) in f.column_aliases.iter().enumerate() {
                    if i > 0 {
                        state.sql.push_str(", ");
                    }
                    state.push_identifier(col);
                }
                state.sql.push(')');
            }
        }
        TableLike::Subquery(s) => {
            state.sql.push('(');
            super::select::render_select(state, &s.query)?;
            state.sql.push_str(") AS ");
            state.push_identifier(&s.alias);
        }
    }
    Ok(())
}

fn render_frame_bound(state: &mut State, bound: FrameBound) {
    match bound {
        FrameBound::UnboundedPreceding => state.sql.push_str("UNBOUNDED PRECEDING"),
        FrameBound::Preceding(n) => state.sql.push_str(&format!("{n} PRECEDING")),
        FrameBound::CurrentRow => state.sql.push_str("CURRENT ROW"),
        FrameBound::Following(n) => state.sql.push_str(&format!("{n} FOLLOWING")),
        FrameBound::UnboundedFollowing => state.sql.push_str("UNBOUNDED FOLLOWING"),
    }
}

fn render_frame(state: &mut State, frame: &WindowFrame) {
    state.sql.push_str(match frame.unit {
        FrameUnit::Rows => "ROWS ",
        FrameUnit::Range => "RANGE ",
    });
    match frame.end {
        None => render_frame_bound(state, frame.start),
        Some(end) => {
            state.sql.push_str("BETWEEN ");
            render_frame_bound(state, frame.start);
            state.sql.push_str(" AND ");
            render_frame_bound(state, end);
        }
    }
}

/// Renders an operand for use as a *value* — no trailing `AS alias`. Used everywhere an operand
/// appears inside another expression (WHERE, ON, GROUP BY, function arguments, ...).
pub(super) fn render_value(state: &mut State, operand: &Operand) -> Result<()> {
    match operand {
        Operand::Column(c) => {
            state.push_identifier(&c.table);
            state.sql.push('.');
            state.push_identifier(&c.name);
        }
        // The boolean literal is the one exception to "every literal becomes a placeholder"
        // (spec §9 open question, resolved): it renders inline via the dialect's formatting rule
        // so the same rule applies whether it's a plain predicate or a JSON-producing argument.
        Operand::Literal(Literal::Bool(b)) => state.sql.push_str(state.dialect.format_bool_literal(*b)),
        Operand::Literal(lit) => state.push_placeholder(lit.clone()),
        Operand::Function(f) => {
            state.sql.push_str(&f.name);
            state.sql.push('(');
            if f.distinct {
                state.sql.push_str("DISTINCT ");
            }
            for (i, arg) in f.args.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                render_value(state, arg)?;
            }
            state.sql.push(')');
        }
        Operand::JsonPath(j) => {
            let mut inner = State::new(state.dialect);
            inner.params = std::mem::take(&mut state.params);
            render_value(&mut inner, &j.column)?;
            let column_sql = inner.sql;
            state.params = inner.params;
            state.sql.push_str(&state.dialect.json_path(&column_sql, &j.path));
        }
        Operand::WindowFunction(w) => {
            state.sql.push_str(&w.name);
            state.sql.push('(');
            for (i, arg) in w.args.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(", ");
                }
                render_value(state, arg)?;
            }
            state.sql.push_str(") OVER (");
            let mut wrote = false;
            if !w.partition_by.is_empty() {
                state.sql.push_str("PARTITION BY ");
                for (i, p) in w.partition_by.iter().enumerate() {
                    if i > 0 {
                        state.sql.push_str(", ");
                    }
                    render_value(state, p)?;
                }
                wrote = true;
            }
            if !w.order_by.is_empty() {
                if wrote {
                    state.sql.push(' ');
                }
                render_order_by_items(state, &w.order_by)?;
                wrote = true;
            }
            if let Some(frame) = &w.frame {
                if wrote {
                    state.sql.push(' ');
                }
                render_frame(state, frame);
            }
            state.sql.push(')');
        }
        Operand::ScalarSubquery(select) => {
            state.sql.push('(');
            super::select::render_select(state, select)?;
            state.sql.push(')');
        }
        Operand::Case(case) => {
            state.sql.push_str("CASE");
            for branch in &case.branches {
                state.sql.push_str(" WHEN ");
                render_expr(state, &branch.when, false)?;
                state.sql.push_str(" THEN ");
                render_value(state, &branch.then)?;
            }
            if let Some(else_) = &case.else_ {
                state.sql.push_str(" ELSE ");
                render_value(state, else_)?;
            }
            state.sql.push_str(" END");
        }
        Operand::Raw(fragment) => state.sql.push_str(fragment),
    }
    Ok(())
}

/// Renders an operand as a SELECT-list / RETURNING-list projection: a value, plus `AS alias`.
pub(super) fn render_projection(state: &mut State, operand: &Operand) -> Result<()> {
    render_value(state, operand)?;
    if let Some(alias) = operand.alias() {
        state.sql.push_str(" AS ");
        state.push_identifier(alias);
    }
    Ok(())
}

fn render_order_by_items(state: &mut State, items: &[OrderByItem]) -> Result<()> {
    state.sql.push_str("ORDER BY ");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            state.sql.push_str(", ");
        }
        render_value(state, &item.expr)?;
        state.sql.push_str(match item.direction {
            Direction::Asc => " ASC",
            Direction::Desc => " DESC",
        });
    }
    Ok(())
}

pub(super) fn render_order_by(state: &mut State, items: &[OrderByItem]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    state.sql.push(' ');
    render_order_by_items(state, items)
}

fn binary_op_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::NotEq => "!=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Like => "LIKE",
        BinaryOp::NotLike => "NOT LIKE",
    }
}

/// Renders a predicate. `nested_in_logical` controls the parenthesization rule from spec §4.3:
/// a `Logical` node embedded in another `Logical` node is parenthesized; everything else is not
/// parenthesized unless it's itself the thing being embedded and happens to be `Logical`.
pub(super) fn render_expr(state: &mut State, expr: &Expression, nested_in_logical: bool) -> Result<()> {
    match expr {
        Expression::Logical(l) => {
            if nested_in_logical {
                state.sql.push('(');
            }
            let joiner = match l.op {
                LogicalOp::And => " AND ",
                LogicalOp::Or => " OR ",
            };
            for (i, operand) in l.operands.iter().enumerate() {
                if i > 0 {
                    state.sql.push_str(joiner);
                }
                render_expr(state, operand, true)?;
            }
            if nested_in_logical {
                state.sql.push(')');
            }
        }
        Expression::Binary(b) => {
            render_value(state, &b.left)?;
            state.sql.push(' ');
            state.sql.push_str(binary_op_token(b.op));
            state.sql.push(' ');
            render_value(state, &b.right)?;
        }
        Expression::Null(n) => {
            render_value(state, &n.left)?;
            state.sql.push_str(match n.op {
                NullOp::IsNull => " IS NULL",
                NullOp::IsNotNull => " IS NOT NULL",
            });
        }
        Expression::In(in_expr) => {
            render_value(state, &in_expr.left)?;
            state.sql.push_str(match in_expr.op {
                InOp::In => " IN (",
                InOp::NotIn => " NOT IN (",
            });
            match &in_expr.rhs {
                InRhs::Values(values) => {
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            state.sql.push_str(", ");
                        }
                        render_value(state, v)?;
                    }
                }
                InRhs::Subquery(select) => super::select::render_select(state, select)?,
            }
            state.sql.push(')');
        }
        Expression::Between(b) => {
            render_value(state, &b.left)?;
            state.sql.push_str(match b.op {
                BetweenOp::Between => " BETWEEN ",
                BetweenOp::NotBetween => " NOT BETWEEN ",
            });
            render_value(state, &b.lower)?;
            state.sql.push_str(" AND ");
            render_value(state, &b.upper)?;
        }
        Expression::Exists(e) => {
            state.sql.push_str(match e.op {
                ExistsOp::Exists => "EXISTS (",
                ExistsOp::NotExists => "NOT EXISTS (",
            });
            super::select::render_select(state, &e.subquery)?;
            state.sql.push(')');
        }
        Expression::Like(l) => {
            render_value(state, &l.left)?;
            state.sql.push_str(match l.op {
                LikeOp::Like => " LIKE ",
                LikeOp::NotLike => " NOT LIKE ",
            });
            render_value(state, &l.pattern)?;
            if let Some(escape) = l.escape {
                state.sql.push_str(" ESCAPE ");
                state.push_placeholder(Literal::Text(escape.to_string()));
            }
        }
    }
    Ok(())
}

pub(super) fn require_column(operand: &Operand, context: &'static str) -> Result<&ColumnRef> {
    operand.as_column().ok_or_else(|| Error::compile_failure(context, "expected a plain column reference"))
}
