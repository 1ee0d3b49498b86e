use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::ast::operand::Operand;
use crate::ast::query::Select;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullOp {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InOp {
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetweenOp {
    Between,
    NotBetween,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistsOp {
    Exists,
    NotExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeOp {
    Like,
    NotLike,
}

/// Right-hand side of an `In` expression: either a literal/operand list or a correlated
/// subquery (spec §4.2 `In{..., values[] | subquery}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InRhs {
    Values(Vec<Operand>),
    Subquery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub left: Operand,
    pub op: BinaryOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalExpr {
    pub op: LogicalOp,
    pub operands: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullExpr {
    pub left: Operand,
    pub op: NullOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InExpr {
    pub left: Operand,
    pub op: InOp,
    pub rhs: InRhs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetweenExpr {
    pub left: Operand,
    pub lower: Operand,
    pub upper: Operand,
    pub op: BetweenOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsExpr {
    pub subquery: Box<Select>,
    pub op: ExistsOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeExpr {
    pub left: Operand,
    pub pattern: Operand,
    pub escape: Option<char>,
    pub op: LikeOp,
}

/// A boolean-valued predicate node, used everywhere a `WHERE`/`ON`/`HAVING` clause is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Expression {
    Binary(BinaryExpr),
    Logical(LogicalExpr),
    Null(NullExpr),
    In(InExpr),
    Between(BetweenExpr),
    Exists(ExistsExpr),
    Like(LikeExpr),
}

impl Expression {
    pub fn and(operands: Vec<Expression>) -> Self {
        Expression::Logical(LogicalExpr { op: LogicalOp::And, operands })
    }

    pub fn or(operands: Vec<Expression>) -> Self {
        Expression::Logical(LogicalExpr { op: LogicalOp::Or, operands })
    }

    pub fn eq(left: Operand, right: Operand) -> Self {
        Expression::Binary(BinaryExpr { left, op: BinaryOp::Eq, right })
    }

    pub fn is_null(left: Operand) -> Self {
        Expression::Null(NullExpr { left, op: NullOp::IsNull })
    }

    pub fn is_not_null(left: Operand) -> Self {
        Expression::Null(NullExpr { left, op: NullOp::IsNotNull })
    }
}
