//! Transactions and the typed collection views they expose.
//!
//! A transaction is bound to one connection and one SQL session, and is
//! valid only inside the user's scoped closure. Read transactions never
//! commit; write transactions assign a fresh monotonic row version to every
//! mutation and accumulate a change set published at commit.

use crate::cache::CacheSet;
use crate::changeset::{Change, ChangeKind, ChangeSetBuilder};
use crate::collection::{Collection, Collections, Extension, ExtensionContext, IndexedCollection};
use crate::connection::ConnectionInner;
use crate::database::DatabaseShared;
use crate::error::Result;
use crate::index::{count_where_sql, keys_where_sql, values_where_sql, Predicate, PreparedQuery};
use crate::schema;
use crate::sql::{Scalar, SqlSession};
use crate::types::RowVersion;

/// A read-only transaction over one connection's snapshot.
pub struct ReadTransaction<'a, Ctx: Collections> {
    pub(crate) session: &'a SqlSession,
    pub(crate) conn: &'a ConnectionInner,
    pub(crate) collections: &'a Ctx,
}

impl<'a, Ctx: Collections> ReadTransaction<'a, Ctx> {
    pub(crate) fn new(
        session: &'a SqlSession,
        conn: &'a ConnectionInner,
        collections: &'a Ctx,
    ) -> Self {
        Self {
            session,
            conn,
            collections,
        }
    }

    /// The container of collections registered with this database.
    pub fn collections(&self) -> &'a Ctx {
        self.collections
    }

    /// A typed read-only view of one collection at this snapshot.
    pub fn read_only<'t, C: Collection>(
        &'t self,
        collection: &'t C,
    ) -> ReadCollection<'t, Ctx, C> {
        ReadCollection {
            tx: self,
            collection,
        }
    }
}

/// A read/write transaction. Exactly one may execute at any instant across
/// all connections of a database.
pub struct ReadWriteTransaction<'a, Ctx: Collections> {
    read: ReadTransaction<'a, Ctx>,
    db: &'a DatabaseShared<Ctx>,
    changes: ChangeSetBuilder,
}

impl<'a, Ctx: Collections> ReadWriteTransaction<'a, Ctx> {
    pub(crate) fn new(
        session: &'a SqlSession,
        conn: &'a ConnectionInner,
        db: &'a DatabaseShared<Ctx>,
    ) -> Self {
        Self {
            read: ReadTransaction::new(session, conn, &db.collections),
            db,
            changes: ChangeSetBuilder::default(),
        }
    }

    pub fn collections(&self) -> &'a Ctx {
        self.read.collections
    }

    /// A typed read-only view of one collection.
    pub fn read_only<'t, C: Collection>(
        &'t self,
        collection: &'t C,
    ) -> ReadCollection<'t, Ctx, C> {
        self.read.read_only(collection)
    }

    /// A typed read/write view of one collection.
    pub fn read_write<'t, C: Collection>(
        &'t mut self,
        collection: &'t C,
    ) -> WriteCollection<'t, Ctx, C> {
        WriteCollection {
            collection,
            read: &self.read,
            db: self.db,
            changes: &mut self.changes,
        }
    }

    /// Register a collection and install its associated extensions.
    ///
    /// Called from [`Collections::set_up_collections`] inside the setup
    /// write transaction. Creates the value table on first registration,
    /// surfaces `MigrationRequired` on a schema-version mismatch, and
    /// installs (with backfill) every extension whose recorded version is
    /// missing or older than the declared one.
    pub fn register_collection<C: Collection>(&mut self, collection: &C) -> Result<()> {
        let name = collection.name().to_string();
        schema::validate_identifier(&name)?;

        self.db.registry.write().register_collection(
            &name,
            collection.schema_version(),
            collection.value_cache_capacity(),
        )?;
        schema::ensure_collection(self.read.session, &name, collection.schema_version())?;

        let ctx = ExtensionContext::new(self.read.session);
        for extension in collection.associated_extensions() {
            self.db.registry.write().register_extension(
                &name,
                extension.name(),
                extension.version(),
            )?;

            let stored = schema::extension_version(self.read.session, &name, extension.name())?;
            let install = match stored {
                None => true,
                Some(version) => version < extension.version(),
            };
            if install {
                extension.install(&ctx, collection)?;
                extension.backfill(&ctx, collection)?;
                schema::record_extension(
                    self.read.session,
                    &name,
                    extension.name(),
                    extension.version(),
                )?;
            }
        }

        tracing::debug!(collection = %name, "registered collection");
        Ok(())
    }

    pub(crate) fn into_changes(self) -> ChangeSetBuilder {
        self.changes
    }
}

/// Read-only view of one collection inside a transaction.
pub struct ReadCollection<'t, Ctx: Collections, C: Collection> {
    tx: &'t ReadTransaction<'t, Ctx>,
    collection: &'t C,
}

impl<'t, Ctx: Collections, C: Collection> ReadCollection<'t, Ctx, C> {
    fn table(&self) -> String {
        schema::collection_table(self.collection.name())
    }

    /// Deserialize a fetched row, going through the connection's value
    /// cache: a version-matched entry skips deserialization, a miss
    /// populates the cache. Rows the deserializer rejects read as absent.
    fn materialize(&self, key: &str, row_version: RowVersion, bytes: &[u8]) -> Option<C::Value> {
        let mut caches = self.tx.conn.caches.lock();
        if let Some(cache) = caches.for_collection(self.collection) {
            if let Some(value) = cache.get(key, row_version) {
                return Some(value);
            }
        }
        drop(caches);

        let value = self.collection.deserialize(bytes)?;

        let mut caches = self.tx.conn.caches.lock();
        if let Some(cache) = caches.for_collection(self.collection) {
            cache.put(key, row_version, value.clone());
        }
        Some(value)
    }

    /// The value for `key`, if present and deserializable.
    pub fn value_for(&self, key: &str) -> Result<Option<C::Value>> {
        let row = self.tx.session.query_row(
            &format!(
                "SELECT valueData, rowVersion FROM {} WHERE key = ?",
                self.table()
            ),
            &[Scalar::from(key)],
            |row| Ok((row.blob(0)?, row.u64(1)?)),
        )?;
        let Some((bytes, row_version)) = row else {
            return Ok(None);
        };
        Ok(self.materialize(key, row_version, &bytes))
    }

    /// True if a row is stored under `key`.
    pub fn exists(&self, key: &str) -> Result<bool> {
        let hit = self.tx.session.query_row(
            &format!("SELECT 1 FROM {} WHERE key = ?", self.table()),
            &[Scalar::from(key)],
            |_row| Ok(()),
        )?;
        Ok(hit.is_some())
    }

    /// All keys, sorted.
    pub fn all_keys(&self) -> Result<Vec<String>> {
        let keys = self.tx.session.query_map(
            &format!("SELECT key FROM {} ORDER BY key", self.table()),
            &[],
            |row| row.text(0),
        )?;
        Ok(keys)
    }

    /// All values, in key order.
    pub fn all_values(&self) -> Result<Vec<C::Value>> {
        self.query_values(
            &format!(
                "SELECT key, valueData, rowVersion FROM {} ORDER BY key",
                self.table()
            ),
            &[],
        )
    }

    /// All `(key, value)` pairs, in key order.
    pub fn all_keys_and_values(&self) -> Result<Vec<(String, C::Value)>> {
        let rows = self.tx.session.query_map(
            &format!(
                "SELECT key, valueData, rowVersion FROM {} ORDER BY key",
                self.table()
            ),
            &[],
            |row| Ok((row.text(0)?, row.blob(1)?, row.u64(2)?)),
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, bytes, row_version) in rows {
            if let Some(value) = self.materialize(&key, row_version, &bytes) {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64> {
        let count = self.tx.session.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table()),
            &[],
            |row| row.u64(0),
        )?;
        Ok(count.unwrap_or(0))
    }

    /// Run a values query of shape `SELECT key, valueData, rowVersion …`.
    pub(crate) fn query_values(&self, sql: &str, bindings: &[Scalar]) -> Result<Vec<C::Value>> {
        let rows = self.tx.session.query_map(sql, bindings, |row| {
            Ok((row.text(0)?, row.blob(1)?, row.u64(2)?))
        })?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, bytes, row_version) in rows {
            if let Some(value) = self.materialize(&key, row_version, &bytes) {
                out.push(value);
            }
        }
        Ok(out)
    }
}

impl<'t, Ctx: Collections, C: IndexedCollection> ReadCollection<'t, Ctx, C> {
    /// Number of rows matching the predicate.
    pub fn count_values_where(&self, predicate: &Predicate<C>) -> Result<u64> {
        let sql = count_where_sql(self.collection.name(), predicate.sql());
        let count = self
            .tx
            .session
            .query_row(&sql, predicate.bindings(), |row| row.u64(0))?;
        Ok(count.unwrap_or(0))
    }

    /// Keys matching the predicate, sorted.
    pub fn find_keys_where(&self, predicate: &Predicate<C>) -> Result<Vec<String>> {
        let sql = keys_where_sql(self.collection.name(), predicate.sql());
        let keys = self
            .tx
            .session
            .query_map(&sql, predicate.bindings(), |row| row.text(0))?;
        Ok(keys)
    }

    /// Values matching the predicate, in key order.
    pub fn find_values_where(&self, predicate: &Predicate<C>) -> Result<Vec<C::Value>> {
        let sql = values_where_sql(self.collection.name(), predicate.sql());
        self.query_values(&sql, predicate.bindings())
    }

    /// Execute a pre-compiled values query. Returns the same result set as
    /// the ad-hoc `find_values_where` it was prepared from.
    pub fn find_values(&self, query: &PreparedQuery<C>) -> Result<Vec<C::Value>> {
        self.query_values(query.sql(), query.bindings())
    }
}

/// Read/write view of one collection inside a write transaction.
pub struct WriteCollection<'t, Ctx: Collections, C: Collection> {
    collection: &'t C,
    read: &'t ReadTransaction<'t, Ctx>,
    db: &'t DatabaseShared<Ctx>,
    changes: &'t mut ChangeSetBuilder,
}

impl<'t, Ctx: Collections, C: Collection> WriteCollection<'t, Ctx, C> {
    /// The read-only view of the same collection at this snapshot.
    pub fn read(&self) -> ReadCollection<'_, Ctx, C> {
        ReadCollection {
            tx: self.read,
            collection: self.collection,
        }
    }

    /// The value for `key` (including values written earlier in this
    /// transaction).
    pub fn value_for(&self, key: &str) -> Result<Option<C::Value>> {
        self.read().value_for(key)
    }

    fn stored_row_version(&self, key: &str) -> Result<Option<RowVersion>> {
        let version = self.read.session.query_row(
            &format!(
                "SELECT rowVersion FROM {} WHERE key = ?",
                schema::collection_table(self.collection.name())
            ),
            &[Scalar::from(key)],
            |row| row.u64(0),
        )?;
        Ok(version)
    }

    /// Insert or replace the value stored under `key`.
    ///
    /// Pipeline: serialize, upsert the row under a fresh row version, notify
    /// associated extensions, record the change, and populate this
    /// connection's cache with the just-written value.
    pub fn set(&mut self, key: &str, value: &C::Value) -> Result<()> {
        let name = self.collection.name();
        let bytes = self.collection.serialize(value)?;
        let prior = self.stored_row_version(key)?;
        let row_version = self.db.next_row_version();

        self.read.session.execute(
            &format!(
                "INSERT INTO {} (key, valueData, rowVersion) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET \
                 valueData = excluded.valueData, rowVersion = excluded.rowVersion",
                schema::collection_table(name)
            ),
            &[
                Scalar::from(key),
                Scalar::Blob(bytes),
                Scalar::from(row_version as i64),
            ],
        )?;

        let kind = if prior.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Inserted
        };

        let ctx = ExtensionContext::new(self.read.session);
        for extension in self.collection.associated_extensions() {
            match kind {
                ChangeKind::Updated => extension.on_update(&ctx, self.collection, key, value)?,
                _ => extension.on_insert(&ctx, self.collection, key, value)?,
            }
        }

        self.changes.record(
            name,
            Change {
                key: key.to_string(),
                kind,
                row_version,
            },
        );

        let mut caches = self.read.conn.caches.lock();
        if let Some(cache) = caches.for_collection(self.collection) {
            cache.put(key, row_version, value.clone());
        }
        Ok(())
    }

    /// Remove the value stored under `key`. Removing an absent key is a
    /// no-op and records no change.
    pub fn remove_value(&mut self, key: &str) -> Result<()> {
        let name = self.collection.name();
        if self.stored_row_version(key)?.is_none() {
            return Ok(());
        }

        self.read.session.execute(
            &format!(
                "DELETE FROM {} WHERE key = ?",
                schema::collection_table(name)
            ),
            &[Scalar::from(key)],
        )?;

        let ctx = ExtensionContext::new(self.read.session);
        for extension in self.collection.associated_extensions() {
            extension.on_remove(&ctx, key)?;
        }

        let row_version = self.db.next_row_version();
        self.changes.record(
            name,
            Change {
                key: key.to_string(),
                kind: ChangeKind::Removed,
                row_version,
            },
        );
        self.read.conn.caches.lock().invalidate(name, key);
        Ok(())
    }

    /// Remove every value in the collection.
    pub fn remove_all_values(&mut self) -> Result<()> {
        let name = self.collection.name();
        self.read.session.execute(
            &format!("DELETE FROM {}", schema::collection_table(name)),
            &[],
        )?;

        let ctx = ExtensionContext::new(self.read.session);
        for extension in self.collection.associated_extensions() {
            extension.on_remove_all(&ctx)?;
        }

        self.changes.record_all_removed(name);
        self.read.conn.caches.lock().invalidate_all_in(name);
        Ok(())
    }
}

impl<'t, Ctx: Collections, C: IndexedCollection> WriteCollection<'t, Ctx, C> {
    /// Remove every value matching the predicate.
    pub fn remove_values_where(&mut self, predicate: &Predicate<C>) -> Result<()> {
        let keys = self.read().find_keys_where(predicate)?;
        for key in keys {
            self.remove_value(&key)?;
        }
        Ok(())
    }
}

pub(crate) fn invalidate_after_abort(caches: &mut CacheSet, changes: &ChangeSetBuilder) {
    for (collection, collection_changes) in changes.touched() {
        if collection_changes.removed_all() {
            caches.invalidate_all_in(collection);
        }
        for change in collection_changes.changes() {
            caches.invalidate(collection, &change.key);
        }
    }
}
