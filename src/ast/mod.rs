//! Tagged-variant query AST (spec §4.2): expressions, operands, tables, joins, CTEs, set
//! operations, and the hydration plan carried alongside a compiled `Select`. Every node here is
//! plain data — building and compiling them are separate modules ([`crate::builder`],
//! [`crate::compiler`]).

pub mod cte;
pub mod expr;
pub mod hydration;
pub mod join;
pub mod literal;
pub mod operand;
pub mod query;
pub mod setop;
pub mod table;
pub mod window;

pub use cte::Cte;
pub use expr::{
    BetweenExpr, BetweenOp, BinaryExpr, BinaryOp, Expression, ExistsExpr, ExistsOp, InExpr, InOp, InRhs, LikeExpr,
    LikeOp, LogicalExpr, LogicalOp, NullExpr, NullOp,
};
pub use hydration::{HydrationPlan, RelationPlan};
pub use join::{Join, JoinKind};
pub use literal::Literal;
pub use operand::{CaseBranch, CaseExpression, ColumnRef, FunctionCall, JsonPathRef, Operand, WindowFunctionCall};
pub use query::{Delete, DistinctKind, Insert, InsertRow, InsertValues, Projection, Select, SelectMeta, Update};
pub use setop::{SetOp, SetOperation};
pub use table::{FunctionTableRef, SubqueryRef, TableLike, TableRef};
pub use window::{Direction, FrameBound, FrameUnit, OrderByItem, WindowFrame};
