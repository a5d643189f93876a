//! Query compilation for indexed collections.
//!
//! Predicates run against the index side table; when the values themselves
//! are needed, the matching keys select rows from the parent value table via
//! a subquery (which also keeps predicate column names unambiguous).

use std::marker::PhantomData;

use crate::collection::IndexedCollection;
use crate::schema;
use crate::sql::Scalar;

use super::predicate::Predicate;

pub(crate) fn keys_where_sql(collection_name: &str, predicate_sql: &str) -> String {
    format!(
        "SELECT key FROM {} WHERE {} ORDER BY key",
        schema::index_table(collection_name),
        predicate_sql
    )
}

pub(crate) fn count_where_sql(collection_name: &str, predicate_sql: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        schema::index_table(collection_name),
        predicate_sql
    )
}

pub(crate) fn values_where_sql(collection_name: &str, predicate_sql: &str) -> String {
    format!(
        "SELECT key, valueData, rowVersion FROM {} \
         WHERE key IN (SELECT key FROM {} WHERE {}) ORDER BY key",
        schema::collection_table(collection_name),
        schema::index_table(collection_name),
        predicate_sql
    )
}

/// A pre-compiled values query: SQL text and bindings are fixed at prepare
/// time, so repeated executions skip predicate compilation.
///
/// Re-binding placeholders after preparation is intentionally unsupported;
/// prepare a new query for new operands.
pub struct PreparedQuery<C: IndexedCollection> {
    sql: String,
    bindings: Vec<Scalar>,
    _collection: PhantomData<fn() -> C>,
}

impl<C: IndexedCollection> PreparedQuery<C> {
    /// Compile a `find_values_where` query for `collection`.
    pub fn values_where(collection: &C, predicate: Predicate<C>) -> Self {
        let sql = values_where_sql(collection.name(), predicate.sql());
        let bindings = predicate.bindings().to_vec();
        Self {
            sql,
            bindings,
            _collection: PhantomData,
        }
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn bindings(&self) -> &[Scalar] {
        &self.bindings
    }
}

impl<C: IndexedCollection> Clone for PreparedQuery<C> {
    fn clone(&self) -> Self {
        Self {
            sql: self.sql.clone(),
            bindings: self.bindings.clone(),
            _collection: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_where_sql_targets_index_table() {
        let sql = keys_where_sql("users", "isActive = ?");
        assert_eq!(
            sql,
            "SELECT key FROM index_users WHERE isActive = ? ORDER BY key"
        );
    }

    #[test]
    fn test_values_where_sql_joins_via_subquery() {
        let sql = values_where_sql("users", "isActive = ?");
        assert_eq!(
            sql,
            "SELECT key, valueData, rowVersion FROM collection_users \
             WHERE key IN (SELECT key FROM index_users WHERE isActive = ?) ORDER BY key"
        );
    }

    #[test]
    fn test_count_where_sql() {
        let sql = count_where_sql("users", "age > ?");
        assert_eq!(sql, "SELECT COUNT(*) FROM index_users WHERE age > ?");
    }
}
