//! Crate-wide error type.
//!
//! Mirrors the teacher crate's split between a small closed `Error` enum and `anyhow` used only
//! as a payload/edge type: builder- and compile-time failures are definite, named variants;
//! whatever a driver raises through [`crate::executor::DbExecutor`] is wrapped, unmodified, inside
//! [`Error::ExecutorFailure`].

use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

/// One variant per semantic error kind named in the specification (§7). Each variant carries
/// only the data needed to explain itself; none of them carry a source-text span, because this
/// crate has no textual source language to point into.
#[derive(Debug, Clone)]
pub enum Error {
    /// Duplicate column, unknown relation target, conflicting primary keys.
    InvalidSchema { detail: String },
    /// A builder call named a relation not present on the table.
    UnknownRelation { table: String, relation: String },
    /// ORDER/LIMIT/OFFSET attached to an operand of UNION/INTERSECT/EXCEPT.
    InvalidSetOperand { detail: String },
    /// A dialect was asked to render a construct it cannot express.
    UnsupportedDialectFeature { dialect: String, feature: String },
    /// Two projections share an alias without being mergeable.
    AliasCollision { alias: String },
    /// The AST contains a node the current compiler cannot render.
    CompileFailure { node_kind: &'static str, detail: String },
    /// Wraps an error raised by the executor; carries the compiled SQL for diagnostics.
    ExecutorFailure {
        sql: String,
        params_len: usize,
        source: anyhow::Error,
    },
    /// A flush failed and rollback was attempted (successfully or not).
    TransactionAborted { detail: String },
    /// A hydration pass hit a missing or malformed column.
    HydrationFailure { column: String, detail: String },
}

impl Error {
    pub fn invalid_schema(detail: impl Into<String>) -> Self {
        Error::InvalidSchema { detail: detail.into() }
    }

    pub fn unknown_relation(table: impl Into<String>, relation: impl Into<String>) -> Self {
        Error::UnknownRelation { table: table.into(), relation: relation.into() }
    }

    pub fn invalid_set_operand(detail: impl Into<String>) -> Self {
        Error::InvalidSetOperand { detail: detail.into() }
    }

    pub fn unsupported_dialect_feature(dialect: impl Into<String>, feature: impl Into<String>) -> Self {
        Error::UnsupportedDialectFeature { dialect: dialect.into(), feature: feature.into() }
    }

    pub fn alias_collision(alias: impl Into<String>) -> Self {
        Error::AliasCollision { alias: alias.into() }
    }

    pub fn compile_failure(node_kind: &'static str, detail: impl Into<String>) -> Self {
        Error::CompileFailure { node_kind, detail: detail.into() }
    }

    pub fn executor_failure(sql: impl Into<String>, params_len: usize, source: anyhow::Error) -> Self {
        Error::ExecutorFailure { sql: sql.into(), params_len, source }
    }

    pub fn transaction_aborted(detail: impl Into<String>) -> Self {
        Error::TransactionAborted { detail: detail.into() }
    }

    pub fn hydration_failure(column: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::HydrationFailure { column: column.into(), detail: detail.into() }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSchema { detail } => write!(f, "invalid schema: {detail}"),
            Error::UnknownRelation { table, relation } => {
                write!(f, "unknown relation `{relation}` on table `{table}`")
            }
            Error::InvalidSetOperand { detail } => write!(f, "invalid set operand: {detail}"),
            Error::UnsupportedDialectFeature { dialect, feature } => {
                write!(f, "{dialect} does not support {feature}")
            }
            Error::AliasCollision { alias } => write!(f, "alias `{alias}` is used by two non-mergeable projections"),
            Error::CompileFailure { node_kind, detail } => {
                write!(f, "cannot compile {node_kind}: {detail}")
            }
            Error::ExecutorFailure { sql, params_len, source } => {
                write!(f, "executor failed for `{sql}` ({params_len} params): {source}")
            }
            Error::TransactionAborted { detail } => write!(f, "transaction aborted: {detail}"),
            Error::HydrationFailure { column, detail } => {
                write!(f, "failed to hydrate column `{column}`: {detail}")
            }
        }
    }
}

impl std::error::Error for Error {}
