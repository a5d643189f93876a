//! Typed scalar values exchanged with the backing SQL engine.

use rusqlite::types::{ToSqlOutput, Value, ValueRef};

/// A typed SQL scalar.
///
/// Booleans are stored as `Integer` 0/1, matching the backing engine's
/// column affinity.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Scalar {
    /// True if this scalar is the SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

impl rusqlite::ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Scalar::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Scalar::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Scalar::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Scalar::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<Value> for Scalar {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Integer(i) => Scalar::Integer(i),
            Value::Real(f) => Scalar::Real(f),
            Value::Text(s) => Scalar::Text(s),
            Value::Blob(b) => Scalar::Blob(b),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Real(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Integer(v as i64)
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Scalar::Blob(v)
    }
}

/// The storage class of a scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    Real,
    Text,
    Blob,
}

impl ScalarKind {
    /// The SQL column type for this storage class.
    pub fn column_type(self) -> &'static str {
        match self {
            ScalarKind::Integer => "INTEGER",
            ScalarKind::Real => "REAL",
            ScalarKind::Text => "TEXT",
            ScalarKind::Blob => "BLOB",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_from_primitives() {
        assert_eq!(Scalar::from(42i64), Scalar::Integer(42));
        assert_eq!(Scalar::from(true), Scalar::Integer(1));
        assert_eq!(Scalar::from(false), Scalar::Integer(0));
        assert_eq!(Scalar::from(1.5f64), Scalar::Real(1.5));
        assert_eq!(Scalar::from("abc"), Scalar::Text("abc".to_string()));
        assert_eq!(Scalar::from(vec![1u8, 2]), Scalar::Blob(vec![1, 2]));
    }

    #[test]
    fn test_column_types() {
        assert_eq!(ScalarKind::Integer.column_type(), "INTEGER");
        assert_eq!(ScalarKind::Real.column_type(), "REAL");
        assert_eq!(ScalarKind::Text.column_type(), "TEXT");
        assert_eq!(ScalarKind::Blob.column_type(), "BLOB");
    }

    #[test]
    fn test_is_null() {
        assert!(Scalar::Null.is_null());
        assert!(!Scalar::Integer(0).is_null());
    }
}
