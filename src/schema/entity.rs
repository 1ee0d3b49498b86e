use serde_json::{Number, Value};

use crate::ast::Literal;

/// A loosely-typed row/object: the runtime representation of "an entity" everywhere in this
/// crate (hydrated query results, tracked session entities, relation-change targets). Using
/// `serde_json::Map` rather than a generic `T: Entity` trait keeps the hydrator, preloader and
/// session free of a type parameter that would otherwise have to be threaded through every
/// public signature, at the cost of losing compile-time field checking — acceptable here since
/// the column/relation descriptors already provide the schema-level validation the spec asks for.
pub type Entity = serde_json::Map<String, Value>;

/// Reads a column value out of an entity, defaulting to `Value::Null` for a missing key (as
/// opposed to panicking), since a freshly-constructed entity may not yet carry every column.
pub fn get(entity: &Entity, column: &str) -> Value {
    entity.get(column).cloned().unwrap_or(Value::Null)
}

/// Renders a primary-key value into a stable string usable as an identity-map key. Composite
/// keys are not part of this specification; every table has exactly one primary-key column.
pub fn pk_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Converts a raw column `Literal` (as produced by an executor's `ResultSet`) into the
/// `serde_json::Value` an entity stores it as.
pub fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Number((*i).into()),
        Literal::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Literal::Text(s) => Value::String(s.clone()),
        Literal::Bytes(b) => Value::Array(b.iter().map(|byte| Value::Number((*byte).into())).collect()),
        Literal::Date(d) => Value::String(d.to_string()),
        Literal::DateTime(dt) => Value::String(dt.to_string()),
        Literal::TimestampTz(dt) => Value::String(dt.to_rfc3339()),
    }
}

/// Converts an entity field value back into a `Literal` for binding into a compiled `INSERT`/
/// `UPDATE` (spec §4.7 "entity field values are bound as the AST's `Literal` parameters").
/// Temporal columns round-trip as text; the compiler's dialect handlers bind them as plain string
/// parameters, matching how the original driver layer this crate's sessions stand in for treats them.
pub fn value_to_literal(value: &Value) -> Literal {
    match value {
        Value::Null => Literal::Null,
        Value::Bool(b) => Literal::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Literal::Int(i)
            } else {
                Literal::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Literal::Text(s.clone()),
        Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items.iter().map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok())).collect();
            bytes.map(Literal::Bytes).unwrap_or_else(|| Literal::Text(value.to_string()))
        }
        other => Literal::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_to_literal_prefers_int_over_float() {
        assert_eq!(value_to_literal(&Value::from(42)), Literal::Int(42));
    }

    #[test]
    fn literal_to_value_round_trips_text() {
        assert_eq!(literal_to_value(&Literal::Text("hi".into())), Value::String("hi".into()));
    }
}
