use serde::{Deserialize, Serialize};

use crate::ast::expr::Expression;
use crate::ast::table::TableLike;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

/// `relationName` carries no codegen meaning of its own — it lets the compiler emit a
/// human-readable comment and lets `joinRelation`/`match` recognize joins they already added
/// when composing further builder calls. See spec §4.2 "Joins".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub target: TableLike,
    pub on: Expression,
    pub relation_name: Option<String>,
}
