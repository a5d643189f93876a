//! Typed predicate algebra over indexed properties.
//!
//! Each predicate node carries its SQL fragment plus the ordered scalars
//! bound into it. Operators that only make sense for some scalar types
//! (`is_like` for strings, `is_nil` for nullable properties) are constrained
//! statically by which `IndexedProperty` types expose them.

use std::marker::PhantomData;

use crate::collection::Collection;
use crate::sql::Scalar;

use super::property::{IndexableValue, IndexedProperty};

/// A compiled predicate over one collection's index.
pub struct Predicate<C: Collection> {
    sql: String,
    bindings: Vec<Scalar>,
    _collection: PhantomData<fn() -> C>,
}

impl<C: Collection> Predicate<C> {
    pub(crate) fn new(sql: String, bindings: Vec<Scalar>) -> Self {
        Self {
            sql,
            bindings,
            _collection: PhantomData,
        }
    }

    /// Both predicates must hold.
    pub fn and(self, other: Predicate<C>) -> Predicate<C> {
        let mut bindings = self.bindings;
        bindings.extend(other.bindings);
        Predicate::new(format!("({} AND {})", self.sql, other.sql), bindings)
    }

    /// Either predicate may hold.
    pub fn or(self, other: Predicate<C>) -> Predicate<C> {
        let mut bindings = self.bindings;
        bindings.extend(other.bindings);
        Predicate::new(format!("({} OR {})", self.sql, other.sql), bindings)
    }

    /// Negate the predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate<C> {
        Predicate::new(format!("NOT ({})", self.sql), self.bindings)
    }

    /// The `WHERE`-clause fragment.
    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    /// The scalars bound into the fragment, in placeholder order.
    pub(crate) fn bindings(&self) -> &[Scalar] {
        &self.bindings
    }
}

impl<C: Collection> Clone for Predicate<C> {
    fn clone(&self) -> Self {
        Predicate::new(self.sql.clone(), self.bindings.clone())
    }
}

impl<C: Collection, T: IndexableValue> IndexedProperty<C, T> {
    /// `property = value`. Binding `None` on a nullable property compiles
    /// to `IS NULL` (plain `= NULL` never matches in SQL).
    pub fn equals(&self, value: T) -> Predicate<C> {
        let scalar = value.into_scalar();
        if scalar.is_null() {
            Predicate::new(format!("{} IS NULL", self.sql_name()), Vec::new())
        } else {
            Predicate::new(format!("{} = ?", self.sql_name()), vec![scalar])
        }
    }

    /// `property != value`, with the same NULL normalization as `equals`.
    pub fn not_equals(&self, value: T) -> Predicate<C> {
        let scalar = value.into_scalar();
        if scalar.is_null() {
            Predicate::new(format!("{} IS NOT NULL", self.sql_name()), Vec::new())
        } else {
            Predicate::new(format!("{} != ?", self.sql_name()), vec![scalar])
        }
    }

    pub fn greater_than(&self, value: T) -> Predicate<C> {
        Predicate::new(
            format!("{} > ?", self.sql_name()),
            vec![value.into_scalar()],
        )
    }

    pub fn greater_than_or_equals(&self, value: T) -> Predicate<C> {
        Predicate::new(
            format!("{} >= ?", self.sql_name()),
            vec![value.into_scalar()],
        )
    }

    pub fn less_than(&self, value: T) -> Predicate<C> {
        Predicate::new(
            format!("{} < ?", self.sql_name()),
            vec![value.into_scalar()],
        )
    }

    pub fn less_than_or_equals(&self, value: T) -> Predicate<C> {
        Predicate::new(
            format!("{} <= ?", self.sql_name()),
            vec![value.into_scalar()],
        )
    }

    /// `property IN (…)`. An empty list matches nothing.
    pub fn is_in(&self, values: impl IntoIterator<Item = T>) -> Predicate<C> {
        let bindings: Vec<Scalar> = values.into_iter().map(IndexableValue::into_scalar).collect();
        if bindings.is_empty() {
            return Predicate::new("0".to_string(), Vec::new());
        }
        let placeholders = vec!["?"; bindings.len()].join(", ");
        Predicate::new(
            format!("{} IN ({placeholders})", self.sql_name()),
            bindings,
        )
    }
}

impl<C: Collection> IndexedProperty<C, String> {
    /// `property LIKE pattern`.
    pub fn is_like(&self, pattern: &str) -> Predicate<C> {
        Predicate::new(
            format!("{} LIKE ?", self.sql_name()),
            vec![Scalar::from(pattern)],
        )
    }

    /// `property NOT LIKE pattern`.
    pub fn is_not_like(&self, pattern: &str) -> Predicate<C> {
        Predicate::new(
            format!("{} NOT LIKE ?", self.sql_name()),
            vec![Scalar::from(pattern)],
        )
    }
}

impl<C: Collection> IndexedProperty<C, Option<String>> {
    /// `property LIKE pattern`. A NULL column value never matches.
    pub fn is_like(&self, pattern: &str) -> Predicate<C> {
        Predicate::new(
            format!("{} LIKE ?", self.sql_name()),
            vec![Scalar::from(pattern)],
        )
    }

    /// `property NOT LIKE pattern`. A NULL column value never matches.
    pub fn is_not_like(&self, pattern: &str) -> Predicate<C> {
        Predicate::new(
            format!("{} NOT LIKE ?", self.sql_name()),
            vec![Scalar::from(pattern)],
        )
    }
}

impl<C: Collection, T: IndexableValue> IndexedProperty<C, Option<T>> {
    /// `property IS NULL`.
    pub fn is_nil(&self) -> Predicate<C> {
        Predicate::new(format!("{} IS NULL", self.sql_name()), Vec::new())
    }

    /// `property IS NOT NULL`.
    pub fn is_not_nil(&self) -> Predicate<C> {
        Predicate::new(format!("{} IS NOT NULL", self.sql_name()), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerializationError;

    struct TestCollection;

    impl Collection for TestCollection {
        type Value = i64;

        fn name(&self) -> &str {
            "test"
        }

        fn schema_version(&self) -> u64 {
            1
        }

        fn serialize(
            &self,
            value: &i64,
        ) -> std::result::Result<Vec<u8>, SerializationError> {
            Ok(value.to_be_bytes().to_vec())
        }

        fn deserialize(&self, bytes: &[u8]) -> Option<i64> {
            Some(i64::from_be_bytes(bytes.try_into().ok()?))
        }
    }

    fn age() -> IndexedProperty<TestCollection, i64> {
        IndexedProperty::new("age", |v| *v)
    }

    fn nickname() -> IndexedProperty<TestCollection, Option<String>> {
        IndexedProperty::new("nickname", |v: &i64| (*v > 0).then(|| v.to_string()))
    }

    fn label() -> IndexedProperty<TestCollection, String> {
        IndexedProperty::new("label", |v: &i64| v.to_string())
    }

    #[test]
    fn test_equals_compiles_to_placeholder() {
        let p = age().equals(30);
        assert_eq!(p.sql(), "age = ?");
        assert_eq!(p.bindings(), &[Scalar::Integer(30)]);
    }

    #[test]
    fn test_equals_none_compiles_to_is_null() {
        let p = nickname().equals(None);
        assert_eq!(p.sql(), "nickname IS NULL");
        assert!(p.bindings().is_empty());

        let p = nickname().not_equals(None);
        assert_eq!(p.sql(), "nickname IS NOT NULL");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(age().greater_than(18).sql(), "age > ?");
        assert_eq!(age().greater_than_or_equals(18).sql(), "age >= ?");
        assert_eq!(age().less_than(18).sql(), "age < ?");
        assert_eq!(age().less_than_or_equals(18).sql(), "age <= ?");
    }

    #[test]
    fn test_is_in() {
        let p = age().is_in([1, 2, 3]);
        assert_eq!(p.sql(), "age IN (?, ?, ?)");
        assert_eq!(
            p.bindings(),
            &[Scalar::Integer(1), Scalar::Integer(2), Scalar::Integer(3)]
        );
    }

    #[test]
    fn test_is_in_empty_matches_nothing() {
        let p = age().is_in([]);
        assert_eq!(p.sql(), "0");
        assert!(p.bindings().is_empty());
    }

    #[test]
    fn test_like_on_strings() {
        let p = label().is_like("A%");
        assert_eq!(p.sql(), "label LIKE ?");
        assert_eq!(p.bindings(), &[Scalar::Text("A%".to_string())]);

        let p = nickname().is_not_like("%x");
        assert_eq!(p.sql(), "nickname NOT LIKE ?");
    }

    #[test]
    fn test_nil_checks() {
        assert_eq!(nickname().is_nil().sql(), "nickname IS NULL");
        assert_eq!(nickname().is_not_nil().sql(), "nickname IS NOT NULL");
    }

    #[test]
    fn test_combinators_preserve_binding_order() {
        let p = age().greater_than(18).and(label().is_like("A%")).or(age().equals(0));
        assert_eq!(p.sql(), "((age > ? AND label LIKE ?) OR age = ?)");
        assert_eq!(
            p.bindings(),
            &[
                Scalar::Integer(18),
                Scalar::Text("A%".to_string()),
                Scalar::Integer(0)
            ]
        );
    }

    #[test]
    fn test_not_wraps_fragment() {
        let p = age().equals(1).not();
        assert_eq!(p.sql(), "NOT (age = ?)");
        assert_eq!(p.bindings(), &[Scalar::Integer(1)]);
    }
}
