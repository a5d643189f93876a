//! # Turf
//!
//! An embedded, typed, schemaless key/value store layered on SQLite.
//!
//! Applications declare strongly typed collections of serialized values
//! keyed by strings. On top of plain reads and writes, Turf maintains
//! registered extensions (notably secondary indexes with a typed predicate
//! DSL) and a reactive observation pipeline that emits transactional
//! change notifications after every commit.
//!
//! ## Quick Start
//!
//! ```no_run
//! use turf::{
//!     Collection, Collections, Database, ReadWriteTransaction, Result, SerializationError,
//! };
//!
//! struct UsersCollection;
//!
//! #[derive(Clone)]
//! struct User {
//!     first_name: String,
//!     last_name: String,
//! }
//!
//! impl Collection for UsersCollection {
//!     type Value = User;
//!
//!     fn name(&self) -> &str {
//!         "users"
//!     }
//!
//!     fn schema_version(&self) -> u64 {
//!         1
//!     }
//!
//!     fn serialize(&self, user: &User) -> std::result::Result<Vec<u8>, SerializationError> {
//!         Ok(format!("{}\n{}", user.first_name, user.last_name).into_bytes())
//!     }
//!
//!     fn deserialize(&self, bytes: &[u8]) -> Option<User> {
//!         let text = std::str::from_utf8(bytes).ok()?;
//!         let (first, last) = text.split_once('\n')?;
//!         Some(User {
//!             first_name: first.to_string(),
//!             last_name: last.to_string(),
//!         })
//!     }
//! }
//!
//! struct AppCollections {
//!     users: UsersCollection,
//! }
//!
//! impl Collections for AppCollections {
//!     fn set_up_collections(&self, tx: &mut ReadWriteTransaction<'_, Self>) -> Result<()> {
//!         tx.register_collection(&self.users)
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let db = Database::open(
//!         "app.db",
//!         AppCollections {
//!             users: UsersCollection,
//!         },
//!     )?;
//!
//!     let connection = db.new_connection()?;
//!     connection.read_write_transaction(|tx, collections| {
//!         tx.read_write(&collections.users).set(
//!             "BillMurray",
//!             &User {
//!                 first_name: "Bill".to_string(),
//!                 last_name: "Murray".to_string(),
//!             },
//!         )
//!     })?;
//!
//!     let bill = connection.read_transaction(|tx, collections| {
//!         tx.read_only(&collections.users).value_for("BillMurray")
//!     })?;
//!     assert!(bill.is_some());
//!     Ok(())
//! }
//! ```

mod cache;
pub mod changeset;
pub mod collection;
pub mod connection;
pub mod database;
pub mod error;
pub mod index;
pub mod observe;
mod registry;
mod schema;
pub mod sql;
pub mod transaction;
pub mod types;

pub use changeset::{Change, ChangeEvent, ChangeKind, ChangeSet, CollectionChanges};
pub use collection::{Collection, Collections, Extension, ExtensionContext, IndexedCollection};
pub use connection::Connection;
pub use database::{Database, DatabaseOptions};
pub use error::{
    Error, MigrationError, QueryError, RegistrationError, Result, SerializationError, StorageError,
};
pub use index::{
    IndexableValue, IndexedProperty, IndexedPropertyAny, Predicate, PreparedQuery, SecondaryIndex,
};
pub use observe::{CollectionObservable, Disposable, Observable, ObservingConnection};
pub use sql::{Scalar, ScalarKind};
pub use transaction::{ReadCollection, ReadTransaction, ReadWriteTransaction, WriteCollection};
pub use types::{ChangeSeq, RowVersion, DEFAULT_VALUE_CACHE_CAPACITY};
