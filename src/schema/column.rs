use serde::{Deserialize, Serialize};

use crate::ast::Literal;

/// The closed set of logical column types (spec §3). Dialect-specific rendering of these into
/// `CREATE TABLE` DDL is out of scope (§1 names DDL introspection as an external client); this
/// enum only needs to be precise enough to drive literal formatting and hydration coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Varchar(u32),
    Text,
    Decimal(u8, u8),
    Float,
    Boolean,
    Json,
    Uuid,
    Binary,
    Varbinary,
    Blob,
    Bytea,
    Date,
    DateTime,
    TimestampTz,
    Enum(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Unique {
    Unnamed,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnDefault {
    Literal(Literal),
    /// An escape hatch for database-side expressions (`now()`, `gen_random_uuid()`, ...);
    /// the compiler emits this verbatim, unquoted, unparameterized.
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityStrategy {
    Always,
    ByDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    pub deferrable: bool,
}

/// Immutable column metadata. Built through the `column::*` factories below and then attached to
/// a table via [`crate::schema::Table::define`], which stamps `table` onto a copy of each column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: ColumnType,
    pub primary: bool,
    pub not_null: bool,
    pub unique: Option<Unique>,
    pub default: Option<ColumnDefault>,
    pub auto_increment: Option<IdentityStrategy>,
    pub check: Option<String>,
    pub references: Option<ColumnReference>,
    pub comment: Option<String>,
    /// Owning table name; `None` until the column is attached via `Table::define`.
    pub table: Option<String>,
}

impl ColumnDescriptor {
    fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnDescriptor {
            name: name.into(),
            ty,
            primary: false,
            not_null: false,
            unique: None,
            default: None,
            auto_increment: None,
            check: None,
            references: None,
            comment: None,
            table: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = Some(Unique::Unnamed);
        self
    }

    pub fn unique_named(mut self, name: impl Into<String>) -> Self {
        self.unique = Some(Unique::Named(name.into()));
        self
    }

    pub fn default_value(mut self, value: Literal) -> Self {
        self.default = Some(ColumnDefault::Literal(value));
        self
    }

    pub fn default_raw(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Raw(expr.into()));
        self
    }

    pub fn auto_increment(mut self, strategy: IdentityStrategy) -> Self {
        self.auto_increment = Some(strategy);
        self
    }

    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    pub fn references(mut self, reference: ColumnReference) -> Self {
        self.references = Some(reference);
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    /// `true` once this column has been attached to a table by `Table::define`.
    pub fn is_attached(&self) -> bool {
        self.table.is_some()
    }
}

/// Factories for each logical type, mirroring spec §4.1's "library exposes factories yielding
/// column descriptors with all attributes."
pub mod column {
    use super::*;

    pub fn integer(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Integer)
    }

    pub fn bigint(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::BigInt)
    }

    pub fn varchar(name: impl Into<String>, len: u32) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Varchar(len))
    }

    pub fn text(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Text)
    }

    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Decimal(precision, scale))
    }

    pub fn float(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Boolean)
    }

    pub fn json(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Json)
    }

    pub fn uuid(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Uuid)
    }

    pub fn binary(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Binary)
    }

    pub fn varbinary(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Varbinary)
    }

    pub fn blob(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Blob)
    }

    pub fn bytea(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Bytea)
    }

    pub fn date(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::DateTime)
    }

    pub fn timestamptz(name: impl Into<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::TimestampTz)
    }

    pub fn enum_(name: impl Into<String>, values: Vec<String>) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ColumnType::Enum(values))
    }
}

pub use column::*;

#[cfg(test)]
mod tests {
    use super::column;

    #[test]
    fn builds_primary_key_column() {
        let id = column::bigint("id").primary_key().auto_increment(super::IdentityStrategy::ByDefault);
        assert!(id.primary);
        assert!(id.not_null);
        assert!(!id.is_attached());
    }

    #[test]
    fn chained_attributes_compose() {
        let email = column::varchar("email", 255).not_null().unique_named("ux_users_email");
        assert!(email.not_null);
        assert_eq!(email.unique, Some(super::Unique::Named("ux_users_email".into())));
    }
}
