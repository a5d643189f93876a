//! Collection and extension interfaces.
//!
//! A collection is a typed, named key/value namespace. The engine stores its
//! values as opaque bytes produced by the collection's `serialize` hook;
//! `deserialize` turns them back into typed values. Collections are created
//! once at application start, registered exactly once with each database via
//! [`Collections::set_up_collections`], and live as long as the database.

use crate::error::{Result, SerializationError, StorageError};
use crate::index::SecondaryIndex;
use crate::sql::{Scalar, SqlRow, SqlSession};
use crate::types::DEFAULT_VALUE_CACHE_CAPACITY;

/// A typed collection descriptor.
pub trait Collection: Send + Sync + 'static {
    /// The value type stored in this collection.
    type Value: Clone + Send + Sync + 'static;

    /// Unique collection name. Restricted to `[A-Za-z0-9_]`.
    fn name(&self) -> &str;

    /// Monotonic schema version. Compared against the stored version at
    /// registration; a mismatch surfaces `MigrationRequired`.
    fn schema_version(&self) -> u64;

    /// LRU capacity for this collection's per-connection value cache.
    /// `None` disables caching entirely.
    fn value_cache_capacity(&self) -> Option<usize> {
        Some(DEFAULT_VALUE_CACHE_CAPACITY)
    }

    /// Serialize a value to bytes. A failure here aborts the write
    /// transaction.
    fn serialize(&self, value: &Self::Value) -> std::result::Result<Vec<u8>, SerializationError>;

    /// Deserialize stored bytes. Returning `None` makes the row read as
    /// absent; the row itself remains stored.
    fn deserialize(&self, bytes: &[u8]) -> Option<Self::Value>;

    /// Extensions maintained alongside this collection. Installed (with
    /// backfill) at registration and notified on every mutation.
    fn associated_extensions(&self) -> Vec<&dyn Extension<Self>>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// The container of all collections known to one database.
///
/// `set_up_collections` is invoked inside a write transaction at database
/// open and must register every descriptor exactly once.
pub trait Collections: Send + Sync + Sized + 'static {
    fn set_up_collections(
        &self,
        tx: &mut crate::transaction::ReadWriteTransaction<'_, Self>,
    ) -> Result<()>;
}

/// A collection backed by a secondary index.
pub trait IndexedCollection: Collection {
    /// The secondary index maintained for this collection.
    fn index(&self) -> &SecondaryIndex<Self>
    where
        Self: Sized;
}

/// An auxiliary data structure maintained alongside a collection.
///
/// The engine drives the lifecycle: at registration, if the recorded version
/// is missing or older than [`Extension::version`], it calls `install` then
/// `backfill` and records the new version. During writes it forwards per-row
/// mutations. Any error aborts the containing transaction.
pub trait Extension<C: Collection>: Send + Sync {
    /// Unique name within the owning collection.
    fn name(&self) -> &str;

    /// Version of the extension's own schema. Bumping it forces a
    /// reinstall + backfill at next registration.
    fn version(&self) -> u64;

    /// Create the extension's storage from scratch, dropping any prior
    /// installation.
    fn install(&self, ctx: &ExtensionContext<'_>, collection: &C) -> Result<()>;

    /// Rebuild derived state from every live row of the parent collection.
    fn backfill(&self, ctx: &ExtensionContext<'_>, collection: &C) -> Result<()>;

    fn on_insert(
        &self,
        ctx: &ExtensionContext<'_>,
        collection: &C,
        key: &str,
        value: &C::Value,
    ) -> Result<()>;

    fn on_update(
        &self,
        ctx: &ExtensionContext<'_>,
        collection: &C,
        key: &str,
        value: &C::Value,
    ) -> Result<()>;

    fn on_remove(&self, ctx: &ExtensionContext<'_>, key: &str) -> Result<()>;

    fn on_remove_all(&self, ctx: &ExtensionContext<'_>) -> Result<()>;
}

/// The SQL surface handed to extensions during installation and maintenance.
///
/// Statements run inside the registering or mutating write transaction, so
/// extension state commits and rolls back atomically with the parent rows.
pub struct ExtensionContext<'a> {
    session: &'a SqlSession,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) fn new(session: &'a SqlSession) -> Self {
        Self { session }
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[Scalar]) -> std::result::Result<usize, StorageError> {
        self.session.execute(sql, params)
    }

    /// Execute parameterless statements.
    pub fn execute_batch(&self, sql: &str) -> std::result::Result<(), StorageError> {
        self.session.execute_batch(sql)
    }

    /// Stream every row of a query through the closure.
    pub fn for_each_row(
        &self,
        sql: &str,
        params: &[Scalar],
        f: impl FnMut(&SqlRow<'_>) -> std::result::Result<(), StorageError>,
    ) -> std::result::Result<(), StorageError> {
        self.session.for_each_row(sql, params, f)
    }
}
