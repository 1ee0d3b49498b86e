use std::collections::HashSet;

use crate::ast::{
    Cte, Direction, Expression, ExistsExpr, ExistsOp, HydrationPlan, Join, JoinKind, Operand, OrderByItem, Projection,
    RelationPlan, Select, SelectMeta, SetOp, SetOperation, TableLike, TableRef,
};
use crate::compiler::{self, Compiled};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::schema::{Catalog, RelationKind, TableDescriptor};

/// Which join kind `include`/`joinRelation` should synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    Left,
    Inner,
}

/// A (possibly nested) request to preload a relation, with an optional column allowlist (spec
/// §4.4 `include(nameOrTree, options?)`).
#[derive(Debug, Clone, Default)]
pub struct IncludeSpec {
    pub name: String,
    pub kind: IncludeKind,
    pub columns: Option<Vec<String>>,
    pub nested: Vec<IncludeSpec>,
}

impl Default for IncludeKind {
    fn default() -> Self {
        IncludeKind::Left
    }
}

impl IncludeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        IncludeSpec { name: name.into(), kind: IncludeKind::Left, columns: None, nested: Vec::new() }
    }

    pub fn inner(mut self) -> Self {
        self.kind = IncludeKind::Inner;
        self
    }

    pub fn columns(mut self, cols: Vec<String>) -> Self {
        self.columns = Some(cols);
        self
    }

    pub fn with(mut self, child: IncludeSpec) -> Self {
        self.nested.push(child);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionTableOptions {
    pub lateral: bool,
    pub with_ordinality: bool,
    pub column_aliases: Vec<String>,
    pub schema: Option<String>,
}

/// Immutable, fluent producer of a `Select` AST plus the hydration plan describing how to reshape
/// its rows (spec §4.4, C4). Every method consumes `self` and returns a fresh builder — copy-on-
/// write in effect, since the caller's prior binding is moved-from and cannot observe any mutation
/// (the teacher crate's `semantic::resolver` threads its own immutable `context` the same way).
#[derive(Clone)]
pub struct SelectBuilder<'c> {
    catalog: &'c Catalog,
    root_table: String,
    select: Select,
    hydration: HydrationPlan,
    joined: HashSet<String>,
}

impl<'c> SelectBuilder<'c> {
    pub fn new(catalog: &'c Catalog, table: &str) -> Result<Self> {
        let descriptor = catalog.require_table(table)?;
        let pk = descriptor
            .primary_key()
            .ok_or_else(|| Error::invalid_schema(format!("table `{table}` has no primary key")))?;
        let root_columns = descriptor.columns.iter().map(|c| c.name.clone()).collect();
        Ok(SelectBuilder {
            catalog,
            root_table: table.to_string(),
            select: Select::from(TableLike::Table(TableRef::new(table))),
            hydration: HydrationPlan::root(table, pk.name.clone(), root_columns),
            joined: HashSet::new(),
        })
    }

    fn root_descriptor(&self) -> &'c TableDescriptor {
        self.catalog.require_table(&self.root_table).expect("root table validated in SelectBuilder::new")
    }

    /// `select({alias: columnOrExpr, …})`: appends projections, de-duplicating by alias. A second
    /// projection under an alias already in use is accepted only if it is identical to the first
    /// (§8 property 5, builder idempotence); otherwise it is an `AliasCollision`.
    pub fn select(mut self, columns: impl IntoIterator<Item = (String, Operand)>) -> Result<Self> {
        if matches!(self.select.columns.as_slice(), [Projection::Wildcard]) {
            self.select.columns.clear();
        }
        for (alias, expr) in columns {
            let projection = Projection::Expr(expr.with_alias(alias.clone()));
            let existing = self.select.columns.iter().find(|p| matches!(p, Projection::Expr(e) if e.alias() == Some(alias.as_str())));
            match existing {
                Some(existing) if *existing == projection => {}
                Some(_) => return Err(Error::alias_collision(alias)),
                None => self.select.columns.push(projection),
            }
        }
        Ok(self)
    }

    pub fn select_raw(mut self, fragments: impl IntoIterator<Item = String>) -> Self {
        if matches!(self.select.columns.as_slice(), [Projection::Wildcard]) {
            self.select.columns.clear();
        }
        for fragment in fragments {
            self.select.columns.push(Projection::Expr(Operand::Raw(fragment)));
        }
        self
    }

    pub fn select_subquery(mut self, alias: impl Into<String>, sub: Select) -> Self {
        if matches!(self.select.columns.as_slice(), [Projection::Wildcard]) {
            self.select.columns.clear();
        }
        self.select
            .columns
            .push(Projection::Expr(Operand::ScalarSubquery(Box::new(sub)).with_alias(alias)));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.select.distinct = Some(crate::ast::DistinctKind::All);
        self
    }

    pub fn distinct_on(mut self, columns: Vec<Operand>) -> Self {
        self.select.distinct = Some(crate::ast::DistinctKind::Columns(columns));
        self
    }

    pub fn from_function_table(
        mut self,
        name: impl Into<String>,
        args: Vec<Operand>,
        alias: impl Into<String>,
        options: FunctionTableOptions,
    ) -> Self {
        self.select.from = TableLike::FunctionTable(crate::ast::FunctionTableRef {
            name: name.into(),
            args,
            alias: alias.into(),
            schema: options.schema,
            lateral: options.lateral,
            with_ordinality: options.with_ordinality,
            column_aliases: options.column_aliases,
        });
        self
    }

    pub fn from_subquery(mut self, sub: Select, alias: impl Into<String>) -> Self {
        self.select.from = TableLike::Subquery(crate::ast::SubqueryRef { query: Box::new(sub), alias: alias.into() });
        self
    }

    fn push_join(mut self, kind: JoinKind, target: TableLike, on: Expression, relation_name: Option<String>) -> Self {
        self.select.joins.push(Join { kind, target, on, relation_name });
        self
    }

    pub fn inner_join(self, target: TableLike, on: Expression) -> Self {
        self.push_join(JoinKind::Inner, target, on, None)
    }

    pub fn left_join(self, target: TableLike, on: Expression) -> Self {
        self.push_join(JoinKind::Left, target, on, None)
    }

    pub fn right_join(self, target: TableLike, on: Expression) -> Self {
        self.push_join(JoinKind::Right, target, on, None)
    }

    pub fn join_function_table(
        self,
        kind: JoinKind,
        name: impl Into<String>,
        args: Vec<Operand>,
        alias: impl Into<String>,
        on: Expression,
        options: FunctionTableOptions,
    ) -> Self {
        let target = TableLike::FunctionTable(crate::ast::FunctionTableRef {
            name: name.into(),
            args,
            alias: alias.into(),
            schema: options.schema,
            lateral: options.lateral,
            with_ordinality: options.with_ordinality,
            column_aliases: options.column_aliases,
        });
        self.push_join(kind, target, on, None)
    }

    /// Builds the ON-clause(s) and join target(s) for a named relation. `BelongsToMany` needs two
    /// joins (root → pivot → target); every other kind needs exactly one.
    fn relation_joins(&self, name: &str, alias: &str) -> Result<Vec<(TableLike, Expression)>> {
        let descriptor = self.root_descriptor();
        let rel = descriptor
            .relation(name)
            .ok_or_else(|| Error::unknown_relation(self.root_table.clone(), name))?;
        let root = &self.root_table;
        match &rel.kind {
            RelationKind::BelongsTo { target, foreign_key, local_key } => Ok(vec![(
                TableLike::Table(TableRef::aliased(target, alias)),
                Expression::eq(Operand::column(root, foreign_key), Operand::column(alias, local_key)),
            )]),
            RelationKind::HasOne { target, foreign_key, local_key } | RelationKind::HasMany { target, foreign_key, local_key, .. } => {
                Ok(vec![(
                    TableLike::Table(TableRef::aliased(target, alias)),
                    Expression::eq(Operand::column(root, local_key), Operand::column(alias, foreign_key)),
                )])
            }
            RelationKind::BelongsToMany { target, pivot_table, pivot_fk_root, pivot_fk_target, .. } => {
                let root_pk = descriptor
                    .primary_key()
                    .ok_or_else(|| Error::invalid_schema(format!("table `{root}` has no primary key")))?;
                let target_pk = self
                    .catalog
                    .require_table(target)?
                    .primary_key()
                    .ok_or_else(|| Error::invalid_schema(format!("table `{target}` has no primary key")))?
                    .name
                    .clone();
                let pivot_alias = format!("{alias}__pivot");
                Ok(vec![
                    (
                        TableLike::Table(TableRef::aliased(pivot_table, &pivot_alias)),
                        Expression::eq(Operand::column(root, &root_pk.name), Operand::column(&pivot_alias, pivot_fk_root)),
                    ),
                    (
                        TableLike::Table(TableRef::aliased(target, alias)),
                        Expression::eq(Operand::column(&pivot_alias, pivot_fk_target), Operand::column(alias, &target_pk)),
                    ),
                ])
            }
        }
    }

    /// `joinRelation(name, kind, extraOn?)`: synthesizes the ON clause from the schema. Idempotent
    /// — re-joining a relation already joined under this alias is a no-op (§8 property 5).
    pub fn join_relation(mut self, name: &str, kind: JoinKind, extra_on: Option<Expression>) -> Result<Self> {
        if self.joined.contains(name) {
            return Ok(self);
        }
        let joins = self.relation_joins(name, name)?;
        let last = joins.len() - 1;
        for (i, (target, mut on)) in joins.into_iter().enumerate() {
            // An extra predicate narrows the relation's *target*, not an intermediate pivot join.
            if i == last {
                if let Some(extra) = extra_on.clone() {
                    on = Expression::and(vec![on, extra]);
                }
            }
            self = self.push_join(kind, target, on, Some(name.to_string()));
        }
        self.joined.insert(name.to_string());
        Ok(self)
    }

    /// `match(name, predicate?)`: `joinRelation` plus `DISTINCT` on the root PK, to preserve root
    /// cardinality against the fan-out a to-many join introduces.
    pub fn match_relation(self, name: &str, predicate: Option<Expression>) -> Result<Self> {
        let root_pk = self.root_descriptor().primary_key().map(|c| c.name.clone());
        let mut this = self.join_relation(name, JoinKind::Inner, predicate)?;
        if let Some(pk) = root_pk {
            this.select.distinct = Some(crate::ast::DistinctKind::Columns(vec![Operand::column(&this.root_table, &pk)]));
        }
        Ok(this)
    }

    /// `include(nameOrTree)`: widens the projection with `<prefix>__<column>` aliases and
    /// registers a relation entry in the hydration plan. Fails at build time if `options.columns`
    /// names a column the target table doesn't have (spec §9 open question, resolved).
    pub fn include(self, spec: IncludeSpec) -> Result<Self> {
        let root_table = self.root_table.clone();
        self.include_at(&spec, &root_table, "")
    }

    fn include_at(mut self, spec: &IncludeSpec, parent_table: &str, parent_prefix: &str) -> Result<Self> {
        let parent_descriptor = self.catalog.require_table(parent_table)?.clone();
        let rel = parent_descriptor
            .relation(&spec.name)
            .ok_or_else(|| Error::unknown_relation(parent_table, spec.name.clone()))?
            .clone();

        let alias_prefix =
            if parent_prefix.is_empty() { spec.name.clone() } else { format!("{parent_prefix}__{}", spec.name) };
        let target_table = rel.kind.target().to_string();
        let target_descriptor = self.catalog.require_table(&target_table)?.clone();
        let target_pk = target_descriptor
            .primary_key()
            .ok_or_else(|| Error::invalid_schema(format!("table `{target_table}` has no primary key")))?
            .name
            .clone();

        let columns: Vec<String> = match &spec.columns {
            Some(requested) => {
                for col in requested {
                    if target_descriptor.column(col).is_none() {
                        return Err(Error::invalid_schema(format!(
                            "include(`{}`) requests unknown column `{col}` on table `{target_table}`",
                            spec.name
                        )));
                    }
                }
                requested.clone()
            }
            None => target_descriptor.columns.iter().map(|c| c.name.clone()).collect(),
        };

        // Reuse the same ON-clause construction as joinRelation, but scoped to the parent alias
        // rather than always the root table, so nested includes chain correctly.
        let joins = self.relation_joins_for(&parent_descriptor, &rel.kind, parent_table, &alias_prefix)?;
        let join_kind = match spec.kind {
            IncludeKind::Left => JoinKind::Left,
            IncludeKind::Inner => JoinKind::Inner,
        };
        if !self.joined.contains(&alias_prefix) {
            for (target, on) in joins {
                self = self.push_join(join_kind, target, on, Some(spec.name.clone()));
            }
            self.joined.insert(alias_prefix.clone());
        }

        for col in &columns {
            let projected_alias = format!("{alias_prefix}__{col}");
            let already_selected = self.select.columns.iter().any(|p| matches!(p, Projection::Expr(e) if e.alias() == Some(projected_alias.as_str())));
            if !already_selected {
                self.select
                    .columns
                    .push(Projection::Expr(Operand::column(&alias_prefix, col).with_alias(projected_alias)));
            }
        }

        let (foreign_key, local_key) = rel.kind.keys();
        let mut nested_plan = None;
        for child in &spec.nested {
            self = self.include_at(child, &target_table, &alias_prefix)?;
        }
        if !spec.nested.is_empty() {
            nested_plan = Some(Box::new(HydrationPlan {
                root_table: target_table.clone(),
                root_primary_key: target_pk.clone(),
                root_columns: columns.clone(),
                relations: Vec::new(),
            }));
        }

        self.hydration.relations.push(RelationPlan {
            name: spec.name.clone(),
            alias_prefix,
            kind: rel.kind.clone(),
            target_table,
            target_primary_key: target_pk,
            foreign_key,
            local_key,
            columns,
            nested: nested_plan,
        });

        Ok(self)
    }

    fn relation_joins_for(
        &self,
        parent: &TableDescriptor,
        kind: &RelationKind,
        parent_alias: &str,
        alias: &str,
    ) -> Result<Vec<(TableLike, Expression)>> {
        match kind {
            RelationKind::BelongsTo { target, foreign_key, local_key } => Ok(vec![(
                TableLike::Table(TableRef::aliased(target, alias)),
                Expression::eq(Operand::column(parent_alias, foreign_key), Operand::column(alias, local_key)),
            )]),
            RelationKind::HasOne { target, foreign_key, local_key } | RelationKind::HasMany { target, foreign_key, local_key, .. } => {
                Ok(vec![(
                    TableLike::Table(TableRef::aliased(target, alias)),
                    Expression::eq(Operand::column(parent_alias, local_key), Operand::column(alias, foreign_key)),
                )])
            }
            RelationKind::BelongsToMany { target, pivot_table, pivot_fk_root, pivot_fk_target, .. } => {
                let parent_pk = parent
                    .primary_key()
                    .ok_or_else(|| Error::invalid_schema(format!("table `{}` has no primary key", parent.name)))?;
                let pivot_alias = format!("{alias}__pivot");
                let target_pk = self.catalog.require_table(target)?.primary_key().map(|c| c.name.clone()).unwrap_or_else(|| "id".into());
                Ok(vec![
                    (
                        TableLike::Table(TableRef::aliased(pivot_table, &pivot_alias)),
                        Expression::eq(Operand::column(parent_alias, &parent_pk.name), Operand::column(&pivot_alias, pivot_fk_root)),
                    ),
                    (
                        TableLike::Table(TableRef::aliased(target, alias)),
                        Expression::eq(Operand::column(&pivot_alias, pivot_fk_target), Operand::column(alias, &target_pk)),
                    ),
                ])
            }
        }
    }

    pub fn where_(mut self, expr: Expression) -> Self {
        self.select.where_ = Some(match self.select.where_ {
            Some(existing) => Expression::and(vec![existing, expr]),
            None => expr,
        });
        self
    }

    pub fn where_exists(self, sub: Select) -> Self {
        self.where_(Expression::Exists(ExistsExpr { subquery: Box::new(sub), op: ExistsOp::Exists }))
    }

    pub fn where_not_exists(self, sub: Select) -> Self {
        self.where_(Expression::Exists(ExistsExpr { subquery: Box::new(sub), op: ExistsOp::NotExists }))
    }

    /// `whereHas(relation, inner?)`: a correlated `EXISTS` over the relation's target table.
    pub fn where_has(self, relation: &str, inner: Option<Expression>) -> Result<Self> {
        self.correlated_has(relation, inner, ExistsOp::Exists)
    }

    pub fn where_has_not(self, relation: &str, inner: Option<Expression>) -> Result<Self> {
        self.correlated_has(relation, inner, ExistsOp::NotExists)
    }

    fn correlated_has(self, relation: &str, inner: Option<Expression>, op: ExistsOp) -> Result<Self> {
        let joins = self.relation_joins(relation, relation)?;
        // Only a single join (non-pivot) is representable as one correlated EXISTS condition;
        // BelongsToMany needs the pivot chained into the subquery's own FROM/JOIN instead.
        let (target, mut on) = match joins.into_iter().next() {
            Some(pair) => pair,
            None => return Err(Error::unknown_relation(self.root_table.clone(), relation)),
        };
        if let Some(inner) = inner {
            on = Expression::and(vec![on, inner]);
        }
        let mut sub = Select::from(target);
        sub.where_ = Some(on);
        sub.columns = vec![Projection::Expr(Operand::from(1i64))];
        Ok(self.where_(Expression::Exists(ExistsExpr { subquery: Box::new(sub), op })))
    }

    pub fn group_by(mut self, col: Operand) -> Self {
        self.select.group_by.push(col);
        self
    }

    pub fn having(mut self, expr: Expression) -> Self {
        self.select.having = Some(match self.select.having {
            Some(existing) => Expression::and(vec![existing, expr]),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, expr: Operand, direction: Direction) -> Self {
        self.select.order_by.push(OrderByItem { expr, direction });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.select.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.select.offset = Some(n);
        self
    }

    pub fn with(mut self, name: impl Into<String>, sub: Select, columns: Vec<String>) -> Self {
        self.select.ctes.push(Cte { name: name.into(), query: Box::new(sub), columns, recursive: false });
        self
    }

    pub fn with_recursive(mut self, name: impl Into<String>, sub: Select, columns: Vec<String>) -> Self {
        self.select.ctes.push(Cte { name: name.into(), query: Box::new(sub), columns, recursive: true });
        self
    }

    fn set_op(mut self, op: SetOp, other: Select) -> Result<Self> {
        if other.has_set_operand_restricted_clauses() {
            return Err(Error::invalid_set_operand(
                "a set operation operand must not carry its own ORDER BY/LIMIT/OFFSET",
            ));
        }
        self.select.set_operations.push(SetOperation { op, rhs: Box::new(other) });
        Ok(self)
    }

    pub fn union(self, other: Select) -> Result<Self> {
        self.set_op(SetOp::Union, other)
    }

    pub fn union_all(self, other: Select) -> Result<Self> {
        self.set_op(SetOp::UnionAll, other)
    }

    pub fn intersect(self, other: Select) -> Result<Self> {
        self.set_op(SetOp::Intersect, other)
    }

    pub fn except(self, other: Select) -> Result<Self> {
        self.set_op(SetOp::Except, other)
    }

    fn stamped_ast(mut self) -> Select {
        self.select.meta = SelectMeta { hydration: Some(self.hydration.clone()) };
        self.select
    }

    pub fn get_ast(self) -> Select {
        self.stamped_ast()
    }

    pub fn compile(self, dialect: Dialect) -> Result<Compiled> {
        compiler::compile_select(&self.stamped_ast(), dialect)
    }

    pub fn to_sql(self, dialect: Dialect) -> Result<String> {
        Ok(self.compile(dialect)?.sql)
    }
}

impl RelationKind {
    /// `(foreign_key, local_key)` for the hydration plan, collapsing the pivot case onto the
    /// target-side key so the hydrator has one uniform shape to consult.
    fn keys(&self) -> (String, String) {
        match self {
            RelationKind::BelongsTo { foreign_key, local_key, .. } => (foreign_key.clone(), local_key.clone()),
            RelationKind::HasOne { foreign_key, local_key, .. } | RelationKind::HasMany { foreign_key, local_key, .. } => {
                (foreign_key.clone(), local_key.clone())
            }
            RelationKind::BelongsToMany { pivot_fk_target, pivot_fk_root, .. } => {
                (pivot_fk_target.clone(), pivot_fk_root.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{column, Catalog, RelationDescriptor, TableDescriptor};

    fn test_catalog() -> Catalog {
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
            .declare_table(
                TableDescriptor::define(
                    "orders",
                    vec![
                        column::bigint("id").primary_key(),
                        column::bigint("user_id"),
                        column::decimal("total", 10, 2),
                    ],
                    vec![],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        catalog
            .attach_relations("orders", vec![RelationDescriptor::belongs_to("user", "users", "user", "id")])
            .unwrap();
        catalog
            .attach_relations(
                "users",
                vec![RelationDescriptor::has_many("orders", "orders", "users", "id", Default::default())],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn join_relation_is_idempotent() {
        let catalog = test_catalog();
        let once = SelectBuilder::new(&catalog, "orders").unwrap().join_relation("user", JoinKind::Inner, None).unwrap();
        let twice = once.clone().join_relation("user", JoinKind::Inner, None).unwrap();
        assert_eq!(once.clone().get_ast(), twice.get_ast());
        assert_eq!(once.select.joins.len(), 1);
    }

    #[test]
    fn include_widens_projection_with_alias_prefix() {
        let catalog = test_catalog();
        let builder = SelectBuilder::new(&catalog, "orders").unwrap().include(IncludeSpec::new("user")).unwrap();
        let ast = builder.get_ast();
        assert!(ast.meta.hydration.as_ref().unwrap().relations.iter().any(|r| r.name == "user"));
        assert!(ast.columns.iter().any(|c| matches!(c, Projection::Expr(op) if op.alias() == Some("user__name"))));
    }

    #[test]
    fn include_rejects_unknown_column() {
        let catalog = test_catalog();
        let err = SelectBuilder::new(&catalog, "orders")
            .unwrap()
            .include(IncludeSpec::new("user").columns(vec!["nonexistent".into()]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn union_rejects_operand_with_limit() {
        let catalog = test_catalog();
        let mut rhs = Select::from(TableLike::Table(TableRef::new("orders")));
        rhs.limit = Some(1);
        let err = SelectBuilder::new(&catalog, "orders").unwrap().union(rhs).unwrap_err();
        assert!(matches!(err, Error::InvalidSetOperand { .. }));
    }
}
