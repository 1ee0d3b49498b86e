//! Declarative filter folding and paginated fetch helpers (spec §4.9, C9): a `WhereInput`
//! operator map folds in one pass into an AND-tree of [`crate::ast::Expression`] nodes, with
//! relation sub-filters becoming correlated `EXISTS`/`NOT EXISTS` subqueries. `execute_paged`
//! layers a `{page, pageSize}` fetch over a [`crate::builder::SelectBuilder`]-produced query.

use serde_json::Value;

use crate::ast::{
    BetweenExpr, BetweenOp, BinaryExpr, BinaryOp, Expression, ExistsExpr, ExistsOp, FunctionCall, InExpr, InOp, InRhs, Join,
    JoinKind, LikeExpr, LikeOp, Literal, LogicalExpr, LogicalOp, NullExpr, NullOp, Operand, Select, TableLike,
};
use crate::compiler::{self, Compiled};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::executor::DbExecutor;
use crate::schema::{value_to_literal, Catalog, RelationKind};

/// One column's operator map (spec §4.9). Every `Some` field is ANDed into the fold; leave a
/// field `None` to skip it entirely.
#[derive(Debug, Clone, Default)]
pub struct FieldFilter {
    pub equals: Option<Value>,
    pub not: Option<Value>,
    pub in_values: Option<Vec<Value>>,
    pub not_in_values: Option<Vec<Value>>,
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub insensitive: bool,
}

impl FieldFilter {
    pub fn new() -> Self {
        FieldFilter::default()
    }

    pub fn equals(mut self, value: impl Into<Value>) -> Self {
        self.equals = Some(value.into());
        self
    }

    pub fn not(mut self, value: impl Into<Value>) -> Self {
        self.not = Some(value.into());
        self
    }

    pub fn in_values(mut self, values: Vec<Value>) -> Self {
        self.in_values = Some(values);
        self
    }

    pub fn not_in_values(mut self, values: Vec<Value>) -> Self {
        self.not_in_values = Some(values);
        self
    }

    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    pub fn starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.starts_with = Some(prefix.into());
        self
    }

    pub fn ends_with(mut self, suffix: impl Into<String>) -> Self {
        self.ends_with = Some(suffix.into());
        self
    }

    pub fn insensitive(mut self) -> Self {
        self.insensitive = true;
        self
    }
}

/// A relation sub-filter (spec §4.9 `{some|none|every|isEmpty|isNotEmpty}`).
#[derive(Debug, Clone)]
pub enum RelationFilter {
    Some(WhereInput),
    None(WhereInput),
    Every(WhereInput),
    IsEmpty,
    IsNotEmpty,
}

/// A flat, declaration-ordered filter: every field and relation entry is ANDed together by
/// [`fold`]. Ordering is preserved (not a `HashMap`) since it drives parameter emission order
/// (spec §5 "AST emission order determines parameter order").
#[derive(Debug, Clone, Default)]
pub struct WhereInput {
    pub fields: Vec<(String, FieldFilter)>,
    pub relations: Vec<(String, RelationFilter)>,
}

impl WhereInput {
    pub fn new() -> Self {
        WhereInput::default()
    }

    pub fn field(mut self, column: impl Into<String>, filter: FieldFilter) -> Self {
        self.fields.push((column.into(), filter));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, filter: RelationFilter) -> Self {
        self.relations.push((name.into(), filter));
        self
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '\\' || ch == '%' || ch == '_' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn lower(operand: Operand) -> Operand {
    Operand::Function(FunctionCall { name: "LOWER".to_string(), args: vec![operand], alias: None, distinct: false })
}

fn like_predicate(table: &str, field: &str, pattern: String, insensitive: bool) -> Expression {
    let pattern_operand = Operand::from(Literal::Text(if insensitive { pattern.to_lowercase() } else { pattern }));
    let (left, pattern) = if insensitive {
        (lower(Operand::column(table, field)), lower(pattern_operand))
    } else {
        (Operand::column(table, field), pattern_operand)
    };
    Expression::Like(LikeExpr { left, pattern, escape: Some('\\'), op: LikeOp::Like })
}

fn fold_field(table: &str, field: &str, filter: &FieldFilter) -> Vec<Expression> {
    let mut predicates = Vec::new();
    let col = || Operand::column(table, field);

    if let Some(v) = &filter.equals {
        predicates.push(Expression::eq(col(), Operand::from(value_to_literal(v))));
    }
    if let Some(v) = &filter.not {
        predicates.push(Expression::Binary(BinaryExpr { left: col(), op: BinaryOp::NotEq, right: Operand::from(value_to_literal(v)) }));
    }
    if let Some(values) = &filter.in_values {
        predicates.push(Expression::In(InExpr { left: col(), op: InOp::In, rhs: InRhs::Values(values.iter().map(|v| Operand::from(value_to_literal(v))).collect()) }));
    }
    if let Some(values) = &filter.not_in_values {
        predicates.push(Expression::In(InExpr { left: col(), op: InOp::NotIn, rhs: InRhs::Values(values.iter().map(|v| Operand::from(value_to_literal(v))).collect()) }));
    }
    if let Some(v) = &filter.gt {
        predicates.push(Expression::Binary(BinaryExpr { left: col(), op: BinaryOp::Gt, right: Operand::from(value_to_literal(v)) }));
    }
    if let Some(v) = &filter.gte {
        predicates.push(Expression::Binary(BinaryExpr { left: col(), op: BinaryOp::Gte, right: Operand::from(value_to_literal(v)) }));
    }
    if let Some(v) = &filter.lt {
        predicates.push(Expression::Binary(BinaryExpr { left: col(), op: BinaryOp::Lt, right: Operand::from(value_to_literal(v)) }));
    }
    if let Some(v) = &filter.lte {
        predicates.push(Expression::Binary(BinaryExpr { left: col(), op: BinaryOp::Lte, right: Operand::from(value_to_literal(v)) }));
    }
    if let Some(s) = &filter.contains {
        predicates.push(like_predicate(table, field, format!("%{}%", escape_like(s)), filter.insensitive));
    }
    if let Some(s) = &filter.starts_with {
        predicates.push(like_predicate(table, field, format!("{}%", escape_like(s)), filter.insensitive));
    }
    if let Some(s) = &filter.ends_with {
        predicates.push(like_predicate(table, field, format!("%{}", escape_like(s)), filter.insensitive));
    }
    predicates
}

fn invert_binary_op(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Eq => BinaryOp::NotEq,
        BinaryOp::NotEq => BinaryOp::Eq,
        BinaryOp::Gt => BinaryOp::Lte,
        BinaryOp::Gte => BinaryOp::Lt,
        BinaryOp::Lt => BinaryOp::Gte,
        BinaryOp::Lte => BinaryOp::Gt,
        BinaryOp::Like => BinaryOp::NotLike,
        BinaryOp::NotLike => BinaryOp::Like,
    }
}

/// De Morgan's-law negation, pushed down to each leaf predicate's opposite operator rather than
/// wrapped in a generic "not" node (the AST has none). Used by `every`: "every child matches"
/// folds to `NOT EXISTS(child that fails to match)`.
fn negate(expr: Expression) -> Expression {
    match expr {
        Expression::Logical(l) => Expression::Logical(LogicalExpr {
            op: match l.op {
                LogicalOp::And => LogicalOp::Or,
                LogicalOp::Or => LogicalOp::And,
            },
            operands: l.operands.into_iter().map(negate).collect(),
        }),
        Expression::Binary(b) => Expression::Binary(BinaryExpr { op: invert_binary_op(b.op), ..b }),
        Expression::Null(n) => Expression::Null(NullExpr { op: match n.op { NullOp::IsNull => NullOp::IsNotNull, NullOp::IsNotNull => NullOp::IsNull }, ..n }),
        Expression::In(i) => Expression::In(InExpr { op: match i.op { InOp::In => InOp::NotIn, InOp::NotIn => InOp::In }, ..i }),
        Expression::Between(b) => Expression::Between(BetweenExpr { op: match b.op { BetweenOp::Between => BetweenOp::NotBetween, BetweenOp::NotBetween => BetweenOp::Between }, ..b }),
        Expression::Exists(e) => Expression::Exists(ExistsExpr { op: match e.op { ExistsOp::Exists => ExistsOp::NotExists, ExistsOp::NotExists => ExistsOp::Exists }, ..e }),
        Expression::Like(l) => Expression::Like(LikeExpr { op: match l.op { LikeOp::Like => LikeOp::NotLike, LikeOp::NotLike => LikeOp::Like }, ..l }),
    }
}

fn primary_key_column(catalog: &Catalog, table: &str) -> Result<String> {
    Ok(catalog.require_table(table)?.primary_key().ok_or_else(|| Error::invalid_schema(format!("table `{table}` has no primary key")))?.name.clone())
}

/// Builds `SELECT * FROM <target> [JOIN <pivot target>] WHERE <correlation to root_table>`,
/// with no inner filter applied yet — the caller ANDs one in before wrapping with `EXISTS`.
fn relation_base_select(catalog: &Catalog, root_table: &str, relation_name: &str) -> Result<(String, Select)> {
    let descriptor = catalog.require_table(root_table)?;
    let rel = descriptor.relation(relation_name).ok_or_else(|| Error::unknown_relation(root_table, relation_name))?;

    let (target, select) = match &rel.kind {
        RelationKind::BelongsTo { target, foreign_key, local_key } => {
            let mut select = Select::from(TableLike::table(target.clone()));
            select.where_ = Some(Expression::eq(Operand::column(root_table, foreign_key), Operand::column(target, local_key)));
            (target.clone(), select)
        }
        RelationKind::HasOne { target, foreign_key, local_key } | RelationKind::HasMany { target, foreign_key, local_key, .. } => {
            let mut select = Select::from(TableLike::table(target.clone()));
            select.where_ = Some(Expression::eq(Operand::column(target, foreign_key), Operand::column(root_table, local_key)));
            (target.clone(), select)
        }
        RelationKind::BelongsToMany { target, pivot_table, pivot_fk_root, pivot_fk_target, .. } => {
            let target_pk = primary_key_column(catalog, target)?;
            let root_pk = primary_key_column(catalog, root_table)?;
            let mut select = Select::from(TableLike::table(pivot_table.clone()));
            select.joins.push(Join {
                kind: JoinKind::Inner,
                target: TableLike::table(target.clone()),
                on: Expression::eq(Operand::column(pivot_table, pivot_fk_target), Operand::column(target, &target_pk)),
                relation_name: Some(relation_name.to_string()),
            });
            select.where_ = Some(Expression::eq(Operand::column(pivot_table, pivot_fk_root), Operand::column(root_table, &root_pk)));
            (target.clone(), select)
        }
    };
    Ok((target, select))
}

fn and_where(select: &mut Select, extra: Expression) {
    select.where_ = Some(match select.where_.take() {
        Some(existing) => Expression::and(vec![existing, extra]),
        None => extra,
    });
}

fn wrap_exists(select: Select, op: ExistsOp) -> Expression {
    Expression::Exists(ExistsExpr { subquery: Box::new(select), op })
}

fn fold_relation(catalog: &Catalog, root_table: &str, relation_name: &str, filter: &RelationFilter) -> Result<Expression> {
    match filter {
        RelationFilter::IsEmpty => {
            let (_, select) = relation_base_select(catalog, root_table, relation_name)?;
            Ok(wrap_exists(select, ExistsOp::NotExists))
        }
        RelationFilter::IsNotEmpty => {
            let (_, select) = relation_base_select(catalog, root_table, relation_name)?;
            Ok(wrap_exists(select, ExistsOp::Exists))
        }
        RelationFilter::Some(inner) => {
            let (target, mut select) = relation_base_select(catalog, root_table, relation_name)?;
            and_where(&mut select, fold(catalog, &target, inner)?);
            Ok(wrap_exists(select, ExistsOp::Exists))
        }
        RelationFilter::None(inner) => {
            let (target, mut select) = relation_base_select(catalog, root_table, relation_name)?;
            and_where(&mut select, fold(catalog, &target, inner)?);
            Ok(wrap_exists(select, ExistsOp::NotExists))
        }
        RelationFilter::Every(inner) => {
            let (target, mut select) = relation_base_select(catalog, root_table, relation_name)?;
            let inner_expr = fold(catalog, &target, inner)?;
            and_where(&mut select, negate(inner_expr));
            Ok(wrap_exists(select, ExistsOp::NotExists))
        }
    }
}

fn always_true() -> Expression {
    Expression::eq(Operand::from(1i64), Operand::from(1i64))
}

/// Folds a `WhereInput` into one `Expression` (spec §4.9 "a single pass folds this into an
/// AND-tree"). An input with no fields or relations folds to an always-true predicate so callers
/// may unconditionally AND the result into a `where_` clause.
pub fn fold(catalog: &Catalog, table: &str, input: &WhereInput) -> Result<Expression> {
    let mut predicates = Vec::new();
    for (field, filter) in &input.fields {
        predicates.extend(fold_field(table, field, filter));
    }
    for (relation, filter) in &input.relations {
        predicates.push(fold_relation(catalog, table, relation, filter)?);
    }
    Ok(match predicates.len() {
        0 => always_true(),
        1 => predicates.into_iter().next().expect("length checked above"),
        _ => Expression::and(predicates),
    })
}

/// One page of results plus the bookkeeping spec §4.9 asks `executePaged` to return.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// Runs a data query (with `LIMIT`/`OFFSET` already applied by the caller) and a `SELECT COUNT(*)`
/// wrapping the same query without its paging clauses, strictly sequentially on one executor (spec
/// §4.9/§5 "never concurrently on the same executor"), folding rows with `map_row`.
pub async fn execute_paged<T>(
    executor: &dyn DbExecutor,
    dialect: Dialect,
    data_query: &Select,
    count_query: &Select,
    page: u64,
    page_size: u64,
    map_row: impl Fn(&[Literal]) -> T,
) -> Result<Page<T>> {
    let data_compiled = compiler::compile_select(data_query, dialect)?;
    let data_result = executor
        .execute_sql(&data_compiled.sql, &data_compiled.params)
        .await
        .map_err(|e| Error::executor_failure(data_compiled.sql.clone(), data_compiled.params.len(), e))?;

    let count_compiled = compile_count(count_query, dialect)?;
    let count_result = executor
        .execute_sql(&count_compiled.sql, &count_compiled.params)
        .await
        .map_err(|e| Error::executor_failure(count_compiled.sql.clone(), count_compiled.params.len(), e))?;

    let total_items = count_result
        .rows
        .first()
        .and_then(|row| row.first())
        .map(literal_as_u64)
        .unwrap_or(0);
    let items = data_result.rows.iter().map(|row| map_row(row)).collect();
    let total_pages = if page_size == 0 { 0 } else { total_items.div_ceil(page_size) };

    Ok(Page {
        items,
        total_items,
        page,
        page_size,
        total_pages,
        has_next_page: page < total_pages,
        has_prev_page: page > 1,
    })
}

fn literal_as_u64(literal: &Literal) -> u64 {
    match literal {
        Literal::Int(i) => (*i).max(0) as u64,
        Literal::Float(f) => f.max(0.0) as u64,
        _ => 0,
    }
}

/// Wraps `inner` (the same select as the data query, minus paging) as `SELECT COUNT(*) FROM
/// (inner) AS count_subject` (spec §4.9's "wrapped `SELECT COUNT(*) FROM (inner)`" variant).
fn compile_count(inner: &Select, dialect: Dialect) -> Result<Compiled> {
    let mut outer = inner.clone();
    outer.limit = None;
    outer.offset = None;
    outer.order_by.clear();
    outer.columns = vec![crate::ast::Projection::Expr(Operand::Function(FunctionCall {
        name: "COUNT".to_string(),
        args: vec![Operand::Raw("*".to_string())],
        alias: None,
        distinct: false,
    }))];
    compiler::compile_select(&outer, dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{column, Cascade, RelationDescriptor, TableDescriptor};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .declare_table(TableDescriptor::define("users", vec![column::bigint("id").primary_key(), column::varchar("name", 255), column::integer("age")], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .declare_table(TableDescriptor::define("orders", vec![column::bigint("id").primary_key(), column::bigint("user_id"), column::decimal("total", 10, 2)], vec![], vec![]).unwrap())
            .unwrap();
        catalog
            .attach_relations(
                "users",
                vec![RelationDescriptor::with_keys(
                    "orders",
                    RelationKind::HasMany { target: "orders".into(), foreign_key: "user_id".into(), local_key: "id".into(), cascade: Cascade::None },
                )],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn equals_and_gte_fold_into_one_and_tree() {
        let input = WhereInput::new().field("name", FieldFilter::new().equals("ada")).field("age", FieldFilter::new().gte(18));
        let expr = fold(&catalog(), "users", &input).unwrap();
        let compiled = compiler::compile_select(&Select { where_: Some(expr), ..Select::from(TableLike::table("users")) }, Dialect::Postgres).unwrap();
        assert!(compiled.sql.contains("\"users\".\"name\" = $1"));
        assert!(compiled.sql.contains("\"users\".\"age\" >= $2"));
        assert!(compiled.sql.contains(" AND "));
    }

    #[test]
    fn contains_escapes_wildcards_and_wraps_in_percent() {
        let input = WhereInput::new().field("name", FieldFilter::new().contains("50%_off"));
        let expr = fold(&catalog(), "users", &input).unwrap();
        match expr {
            Expression::Like(l) => match l.pattern {
                Operand::Literal(Literal::Text(t)) => assert_eq!(t, "%50\\%\\_off%"),
                _ => panic!("expected text literal pattern"),
            },
            _ => panic!("expected a Like expression"),
        }
    }

    #[test]
    fn insensitive_contains_wraps_both_sides_in_lower() {
        let input = WhereInput::new().field("name", FieldFilter::new().contains("Ada").insensitive());
        let expr = fold(&catalog(), "users", &input).unwrap();
        match expr {
            Expression::Like(l) => {
                assert!(matches!(l.left, Operand::Function(ref f) if f.name == "LOWER"));
                match l.pattern {
                    Operand::Function(f) => {
                        assert_eq!(f.name, "LOWER");
                        match f.args.as_slice() {
                            [Operand::Literal(Literal::Text(t))] => assert_eq!(t, "%ada%"),
                            _ => panic!("expected a single text literal argument"),
                        }
                    }
                    _ => panic!("expected pattern wrapped in LOWER(...)"),
                }
            }
            _ => panic!("expected a Like expression"),
        }
    }

    #[test]
    fn has_many_some_folds_into_correlated_exists() {
        let input = WhereInput::new().relation("orders", RelationFilter::Some(WhereInput::new().field("total", FieldFilter::new().gt(100))));
        let expr = fold(&catalog(), "users", &input).unwrap();
        let compiled = compiler::compile_select(&Select { where_: Some(expr), ..Select::from(TableLike::table("users")) }, Dialect::Postgres).unwrap();
        assert!(compiled.sql.contains("EXISTS"));
        assert!(!compiled.sql.contains("NOT EXISTS"));
        assert!(compiled.sql.contains("\"orders\".\"user_id\" = \"users\".\"id\""));
    }

    #[test]
    fn has_many_is_empty_folds_into_not_exists_with_no_inner_filter() {
        let input = WhereInput::new().relation("orders", RelationFilter::IsEmpty);
        let expr = fold(&catalog(), "users", &input).unwrap();
        let compiled = compiler::compile_select(&Select { where_: Some(expr), ..Select::from(TableLike::table("users")) }, Dialect::Postgres).unwrap();
        assert!(compiled.sql.contains("NOT EXISTS"));
    }

    #[test]
    fn every_negates_the_inner_predicate_before_wrapping_not_exists() {
        let input = WhereInput::new().relation("orders", RelationFilter::Every(WhereInput::new().field("total", FieldFilter::new().gt(0))));
        let expr = fold(&catalog(), "users", &input).unwrap();
        let compiled = compiler::compile_select(&Select { where_: Some(expr), ..Select::from(TableLike::table("users")) }, Dialect::Postgres).unwrap();
        assert!(compiled.sql.contains("NOT EXISTS"));
        assert!(compiled.sql.contains("\"orders\".\"total\" <= $1"));
    }
}
