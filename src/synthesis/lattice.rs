//! Type lattice for inferring column types from loosely-typed samples.
//!
//! ```text
//!              String
//!          /   |    \      \
//!      Float  Bool  Timestamp
//!        |
//!       Int
//!          \   |   /
//!            Unknown
//! ```
//!
//! `Unknown` is the bottom (no non-null observation yet). Joining two
//! different types yields their least upper bound, which is `Float` for
//! `Int ⊔ Float` and `String` for every other conflict.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::models::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Inferred {
    Unknown,
    Bool,
    Int,
    Float,
    Timestamp,
    String,
}

impl Inferred {
    /// Type of a single observed value. Nested arrays and objects are stored
    /// as serialised text.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Inferred::Unknown,
            Value::Bool(_) => Inferred::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Inferred::Int,
            Value::Number(_) => Inferred::Float,
            Value::String(s) if looks_like_timestamp(s) => Inferred::Timestamp,
            Value::String(_) | Value::Array(_) | Value::Object(_) => Inferred::String,
        }
    }

    /// Least upper bound of two observations.
    pub fn join(self, other: Inferred) -> Inferred {
        match (self, other) {
            (a, b) if a == b => a,
            (Inferred::Unknown, x) | (x, Inferred::Unknown) => x,
            (Inferred::Int, Inferred::Float) | (Inferred::Float, Inferred::Int) => Inferred::Float,
            _ => Inferred::String,
        }
    }

    /// Column type for the final inference. A field that was only ever null
    /// defaults to `STRING`.
    pub fn column_type(self) -> ColumnType {
        match self {
            Inferred::Unknown | Inferred::String => ColumnType::String,
            Inferred::Bool => ColumnType::Bool,
            Inferred::Int => ColumnType::Int,
            Inferred::Float => ColumnType::Float,
            Inferred::Timestamp => ColumnType::Timestamp,
        }
    }
}

/// RFC 3339 date-times and plain `YYYY-MM-DD` dates.
fn looks_like_timestamp(s: &str) -> bool {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observation() {
        assert_eq!(Inferred::of(&json!(null)), Inferred::Unknown);
        assert_eq!(Inferred::of(&json!(true)), Inferred::Bool);
        assert_eq!(Inferred::of(&json!(3)), Inferred::Int);
        assert_eq!(Inferred::of(&json!(9.99)), Inferred::Float);
        assert_eq!(Inferred::of(&json!("2024-03-01")), Inferred::Timestamp);
        assert_eq!(Inferred::of(&json!("2024-03-01T10:00:00Z")), Inferred::Timestamp);
        assert_eq!(Inferred::of(&json!("March 1st")), Inferred::String);
        assert_eq!(Inferred::of(&json!(["a"])), Inferred::String);
    }

    #[test]
    fn test_join_is_commutative_and_idempotent() {
        let all = [
            Inferred::Unknown,
            Inferred::Bool,
            Inferred::Int,
            Inferred::Float,
            Inferred::Timestamp,
            Inferred::String,
        ];
        for a in all {
            assert_eq!(a.join(a), a);
            for b in all {
                assert_eq!(a.join(b), b.join(a), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_join_rules() {
        assert_eq!(Inferred::Unknown.join(Inferred::Int), Inferred::Int);
        assert_eq!(Inferred::Int.join(Inferred::Float), Inferred::Float);
        assert_eq!(Inferred::Int.join(Inferred::Bool), Inferred::String);
        assert_eq!(Inferred::Timestamp.join(Inferred::Float), Inferred::String);
        assert_eq!(Inferred::String.join(Inferred::Unknown), Inferred::String);
    }

    #[test]
    fn test_column_types() {
        assert_eq!(Inferred::Unknown.column_type(), ColumnType::String);
        assert_eq!(Inferred::Float.column_type(), ColumnType::Float);
        assert_eq!(Inferred::Timestamp.column_type(), ColumnType::Timestamp);
    }
}
