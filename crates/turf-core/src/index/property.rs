//! Indexed properties: typed projections from a collection's value to a
//! SQL scalar column.

use std::sync::Arc;

use crate::collection::Collection;
use crate::sql::{Scalar, ScalarKind};

/// A value type that can live in an indexed column.
///
/// Implemented for the scalar primitives and their `Option` variants;
/// `Option<T>` marks the column nullable.
pub trait IndexableValue: Clone + Send + Sync + 'static {
    fn scalar_kind() -> ScalarKind;

    fn nullable() -> bool {
        false
    }

    fn into_scalar(self) -> Scalar;
}

impl IndexableValue for i64 {
    fn scalar_kind() -> ScalarKind {
        ScalarKind::Integer
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Integer(self)
    }
}

impl IndexableValue for f64 {
    fn scalar_kind() -> ScalarKind {
        ScalarKind::Real
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Real(self)
    }
}

impl IndexableValue for bool {
    fn scalar_kind() -> ScalarKind {
        ScalarKind::Integer
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Integer(self as i64)
    }
}

impl IndexableValue for String {
    fn scalar_kind() -> ScalarKind {
        ScalarKind::Text
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Text(self)
    }
}

impl IndexableValue for Vec<u8> {
    fn scalar_kind() -> ScalarKind {
        ScalarKind::Blob
    }

    fn into_scalar(self) -> Scalar {
        Scalar::Blob(self)
    }
}

impl<T: IndexableValue> IndexableValue for Option<T> {
    fn scalar_kind() -> ScalarKind {
        T::scalar_kind()
    }

    fn nullable() -> bool {
        true
    }

    fn into_scalar(self) -> Scalar {
        match self {
            Some(v) => v.into_scalar(),
            None => Scalar::Null,
        }
    }
}

/// A typed indexed property: a column name plus a projection from the
/// collection's value type to the column's scalar type.
///
/// This is the front-end builder for predicates; [`IndexedProperty::lift`]
/// erases the scalar type for the index's heterogeneous property list.
pub struct IndexedProperty<C: Collection, T: IndexableValue> {
    name: String,
    project: Arc<dyn Fn(&C::Value) -> T + Send + Sync>,
}

impl<C: Collection, T: IndexableValue> IndexedProperty<C, T> {
    pub fn new(name: &str, project: impl Fn(&C::Value) -> T + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            project: Arc::new(project),
        }
    }

    /// The column name in the index side table.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn sql_name(&self) -> &str {
        &self.name
    }

    /// Erase the scalar type, producing the form stored in the index's
    /// property list.
    pub fn lift(&self) -> IndexedPropertyAny<C> {
        let project = Arc::clone(&self.project);
        IndexedPropertyAny {
            name: self.name.clone(),
            kind: T::scalar_kind(),
            nullable: T::nullable(),
            project: Arc::new(move |value| (project)(value).into_scalar()),
        }
    }
}

impl<C: Collection, T: IndexableValue> Clone for IndexedProperty<C, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            project: Arc::clone(&self.project),
        }
    }
}

/// A type-erased indexed property: column name, storage class, nullability,
/// and a projection straight to a [`Scalar`].
pub struct IndexedPropertyAny<C: Collection> {
    name: String,
    kind: ScalarKind,
    nullable: bool,
    project: Arc<dyn Fn(&C::Value) -> Scalar + Send + Sync>,
}

impl<C: Collection> IndexedPropertyAny<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Project a value to this property's scalar.
    pub fn project(&self, value: &C::Value) -> Scalar {
        (self.project)(value)
    }

    /// The column declaration for the index side table.
    pub(crate) fn column_decl(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.kind.column_type())
        } else {
            format!("{} {} NOT NULL", self.name, self.kind.column_type())
        }
    }
}

impl<C: Collection> Clone for IndexedPropertyAny<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            nullable: self.nullable,
            project: Arc::clone(&self.project),
        }
    }
}
