use serde::{Deserialize, Serialize};

use crate::ast::query::Select;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub query: Box<Select>,
    pub columns: Vec<String>,
    pub recursive: bool,
}
