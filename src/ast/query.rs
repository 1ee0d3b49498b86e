use serde::{Deserialize, Serialize};

use crate::ast::cte::Cte;
use crate::ast::expr::Expression;
use crate::ast::hydration::HydrationPlan;
use crate::ast::join::Join;
use crate::ast::operand::Operand;
use crate::ast::setop::SetOperation;
use crate::ast::table::TableLike;
use crate::ast::window::{Direction, OrderByItem};

/// A single projected column: either a structured operand or the `*` wildcard (spec §4.2
/// `Select{columns[]}`; wildcard is implicit in the source grammar but needs its own tag here
/// since `Operand` has no "no expression at all" case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Wildcard,
    Expr(Operand),
}

impl From<Operand> for Projection {
    fn from(op: Operand) -> Self {
        Projection::Expr(op)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DistinctKind {
    All,
    Columns(Vec<Operand>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SelectMeta {
    pub hydration: Option<HydrationPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub from: TableLike,
    pub columns: Vec<Projection>,
    pub joins: Vec<Join>,
    pub where_: Option<Expression>,
    pub group_by: Vec<Operand>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: Option<DistinctKind>,
    pub ctes: Vec<Cte>,
    pub set_operations: Vec<SetOperation>,
    pub meta: SelectMeta,
}

impl Select {
    pub fn from(table: TableLike) -> Self {
        Select {
            from: table,
            columns: vec![Projection::Wildcard],
            joins: Vec::new(),
            where_: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: None,
            ctes: Vec::new(),
            set_operations: Vec::new(),
            meta: SelectMeta::default(),
        }
    }

    /// Carries the spec §4.4 "inner builders must not carry ORDER/LIMIT/OFFSET" rule for set
    /// operation operands.
    pub fn has_set_operand_restricted_clauses(&self) -> bool {
        !self.order_by.is_empty() || self.limit.is_some() || self.offset.is_some()
    }

    pub fn order_by_asc(mut self, expr: Operand) -> Self {
        self.order_by.push(OrderByItem { expr, direction: Direction::Asc });
        self
    }

    pub fn order_by_desc(mut self, expr: Operand) -> Self {
        self.order_by.push(OrderByItem { expr, direction: Direction::Desc });
        self
    }
}

/// A single row's column/value assignments in declaration order (spec §4.2 `Insert{values}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRow(pub Vec<(String, Operand)>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsertValues {
    Rows(Vec<InsertRow>),
    Subquery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub table: TableLike,
    pub values: InsertValues,
    pub returning: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub table: TableLike,
    pub set: Vec<(String, Operand)>,
    pub where_: Option<Expression>,
    pub returning: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub from: TableLike,
    pub where_: Option<Expression>,
    pub returning: Vec<Operand>,
}
