use serde::{Deserialize, Serialize};

use crate::ast::query::Select;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOperation {
    pub op: SetOp,
    pub rhs: Box<Select>,
}
