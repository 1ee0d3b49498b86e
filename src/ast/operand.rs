use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::ast::expr::Expression;
use crate::ast::literal::Literal;
use crate::ast::query::Select;
use crate::ast::window::{OrderByItem, WindowFrame};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Operand>,
    pub alias: Option<String>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPathRef {
    pub column: Box<Operand>,
    pub path: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFunctionCall {
    pub name: String,
    pub args: Vec<Operand>,
    pub partition_by: Vec<Operand>,
    pub order_by: Vec<OrderByItem>,
    pub frame: Option<WindowFrame>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub when: Expression,
    pub then: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseExpression {
    pub branches: Vec<CaseBranch>,
    pub else_: Option<Box<Operand>>,
    pub alias: Option<String>,
}

/// A value-producing AST node. `Select`/`Expression` build on top of `Operand`; `Operand::Case`
/// and `Operand::ScalarSubquery` build back down into `Expression`/`Select`, which is why these
/// three modules are mutually recursive (tied together through `Box`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Operand {
    Column(ColumnRef),
    Literal(Literal),
    Function(FunctionCall),
    JsonPath(JsonPathRef),
    WindowFunction(WindowFunctionCall),
    ScalarSubquery(Box<Select>),
    Case(CaseExpression),
    /// `selectRaw` escape hatch: an unchecked fragment, inserted verbatim with no quoting or
    /// parameterization. Exists because the builder must be able to express what a structured
    /// node set cannot yet cover (spec §4.4).
    Raw(String),
}

impl Operand {
    pub fn alias(&self) -> Option<&str> {
        match self {
            Operand::Column(c) => c.alias.as_deref(),
            Operand::Function(f) => f.alias.as_deref(),
            Operand::JsonPath(j) => j.alias.as_deref(),
            Operand::WindowFunction(w) => w.alias.as_deref(),
            Operand::Case(c) => c.alias.as_deref(),
            Operand::Literal(_) | Operand::ScalarSubquery(_) | Operand::Raw(_) => None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = Some(alias.into());
        match &mut self {
            Operand::Column(c) => c.alias = alias,
            Operand::Function(f) => f.alias = alias,
            Operand::JsonPath(j) => j.alias = alias,
            Operand::WindowFunction(w) => w.alias = alias,
            Operand::Case(c) => c.alias = alias,
            Operand::Literal(_) | Operand::ScalarSubquery(_) | Operand::Raw(_) => {}
        }
        self
    }

    pub fn column(table: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Operand::Column(ColumnRef { table: table.as_ref().to_string(), name: name.as_ref().to_string(), alias: None })
    }
}

impl From<Literal> for Operand {
    fn from(l: Literal) -> Self {
        Operand::Literal(l)
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Literal(Literal::Text(s.to_string()))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Literal(Literal::Int(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Literal(Literal::Bool(v))
    }
}
