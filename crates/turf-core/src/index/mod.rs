//! Secondary index extension.
//!
//! A secondary index mirrors selected projected properties of a collection
//! into a side table `index_{collection}` with one row per live key. The
//! engine installs it (with a full backfill) at registration, reinstalls it
//! when its version is bumped, and forwards per-row mutations from the write
//! pipeline.

mod predicate;
mod property;
mod query;

pub use predicate::Predicate;
pub use property::{IndexableValue, IndexedProperty, IndexedPropertyAny};
pub use query::PreparedQuery;

pub(crate) use query::{count_where_sql, keys_where_sql, values_where_sql};

use crate::collection::{Collection, Extension, ExtensionContext};
use crate::error::Result;
use crate::schema;

/// Registry identifier under which a secondary index is recorded in
/// `__turf_extensions`, deliberately distinct from its side-table name.
///
/// The name is the same for every secondary index, which caps a collection
/// at one: the side table is `index_{collection}`, so a second index would
/// clobber the first's table. Returning a second `SecondaryIndex` from
/// `associated_extensions` fails registration with `DuplicateExtension`.
const SECONDARY_INDEX_EXTENSION_NAME: &str = "secondary-index";

/// A secondary index over one collection.
///
/// A collection carries at most one secondary index (its side table is
/// `index_{collection}`); registering a second one is rejected with
/// `DuplicateExtension`.
pub struct SecondaryIndex<C: Collection> {
    collection_name: String,
    table: String,
    version: u64,
    properties: Vec<IndexedPropertyAny<C>>,
    /// Precompiled maintenance statement:
    /// `INSERT OR REPLACE INTO index_{c} (key, p1, …) VALUES (?, …)`.
    upsert_sql: String,
}

impl<C: Collection> SecondaryIndex<C> {
    /// Build an index over `collection_name` with the given (lifted)
    /// properties. Bump `version` to force a reinstall + backfill on the
    /// next registration.
    pub fn new(
        collection_name: &str,
        version: u64,
        properties: Vec<IndexedPropertyAny<C>>,
    ) -> Self {
        let table = schema::index_table(collection_name);
        let columns: Vec<&str> = properties.iter().map(IndexedPropertyAny::name).collect();
        let placeholders = vec!["?"; columns.len() + 1].join(", ");
        let upsert_sql = format!(
            "INSERT OR REPLACE INTO {table} (key{}) VALUES ({placeholders})",
            columns
                .iter()
                .map(|c| format!(", {c}"))
                .collect::<String>(),
        );
        Self {
            collection_name: collection_name.to_string(),
            table,
            version,
            properties,
            upsert_sql,
        }
    }

    /// The side table name, `index_{collection}`.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn properties(&self) -> &[IndexedPropertyAny<C>] {
        &self.properties
    }

    fn row_params(&self, key: &str, value: &C::Value) -> Vec<crate::sql::Scalar> {
        let mut params = Vec::with_capacity(self.properties.len() + 1);
        params.push(crate::sql::Scalar::from(key));
        for property in &self.properties {
            params.push(property.project(value));
        }
        params
    }
}

impl<C: Collection> Extension<C> for SecondaryIndex<C> {
    fn name(&self) -> &str {
        SECONDARY_INDEX_EXTENSION_NAME
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn install(&self, ctx: &ExtensionContext<'_>, _collection: &C) -> Result<()> {
        for property in &self.properties {
            schema::validate_identifier(property.name())?;
            if property.name() == "key" {
                return Err(crate::error::RegistrationError::InvalidName(
                    "key (reserved column)".to_string(),
                )
                .into());
            }
        }

        let columns: String = self
            .properties
            .iter()
            .map(|p| format!(", {}", p.column_decl()))
            .collect();
        ctx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (key TEXT PRIMARY KEY NOT NULL{columns})",
            table = self.table,
        ))?;
        Ok(())
    }

    fn backfill(&self, ctx: &ExtensionContext<'_>, collection: &C) -> Result<()> {
        let select = format!(
            "SELECT key, valueData FROM {}",
            schema::collection_table(&self.collection_name)
        );
        ctx.for_each_row(&select, &[], |row| {
            let key = row.text(0)?;
            let bytes = row.blob(1)?;
            // A row the deserializer rejects reads as absent; it gets no
            // index entry.
            if let Some(value) = collection.deserialize(&bytes) {
                ctx.execute(&self.upsert_sql, &self.row_params(&key, &value))?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn on_insert(
        &self,
        ctx: &ExtensionContext<'_>,
        _collection: &C,
        key: &str,
        value: &C::Value,
    ) -> Result<()> {
        ctx.execute(&self.upsert_sql, &self.row_params(key, value))?;
        Ok(())
    }

    fn on_update(
        &self,
        ctx: &ExtensionContext<'_>,
        collection: &C,
        key: &str,
        value: &C::Value,
    ) -> Result<()> {
        // The side table is keyed by the same primary key, so an update is
        // the same upsert as an insert.
        self.on_insert(ctx, collection, key, value)
    }

    fn on_remove(&self, ctx: &ExtensionContext<'_>, key: &str) -> Result<()> {
        ctx.execute(
            &format!("DELETE FROM {} WHERE key = ?", self.table),
            &[crate::sql::Scalar::from(key)],
        )?;
        Ok(())
    }

    fn on_remove_all(&self, ctx: &ExtensionContext<'_>) -> Result<()> {
        ctx.execute(&format!("DELETE FROM {}", self.table), &[])?;
        Ok(())
    }
}
