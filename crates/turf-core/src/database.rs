//! The public database façade.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::changeset::ChangeSet;
use crate::collection::Collections;
use crate::connection::{Connection, ConnectionInner, Invalidation};
use crate::error::Result;
use crate::observe::{ObservingConnection, ObservingCore};
use crate::registry::Registry;
use crate::schema;
use crate::types::{ChangeSeq, RowVersion};

/// Database-level configuration.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// How long a session waits on the engine's own file locks before
    /// surfacing `StorageError::Busy`.
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared by every connection of one database.
pub(crate) struct DatabaseShared<Ctx: Collections> {
    pub(crate) path: PathBuf,
    pub(crate) collections: Ctx,
    pub(crate) options: DatabaseOptions,
    pub(crate) registry: RwLock<Registry>,
    /// Serializes write transactions across all connections.
    pub(crate) writer_lock: Mutex<()>,
    row_version: AtomicU64,
    commit_seq: AtomicU64,
    connections: Mutex<Vec<Weak<ConnectionInner>>>,
    observers: Mutex<Vec<Weak<ObservingCore<Ctx>>>>,
}

impl<Ctx: Collections> DatabaseShared<Ctx> {
    /// Assign the next globally monotonic row version.
    pub(crate) fn next_row_version(&self) -> RowVersion {
        self.row_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_commit_seq(&self) -> ChangeSeq {
        self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn register_connection(&self, inner: &Arc<ConnectionInner>) {
        let mut connections = self.connections.lock();
        connections.retain(|weak| weak.strong_count() > 0);
        connections.push(Arc::downgrade(inner));
    }

    pub(crate) fn register_observer(&self, core: &Arc<ObservingCore<Ctx>>) {
        let mut observers = self.observers.lock();
        observers.retain(|weak| weak.strong_count() > 0);
        observers.push(Arc::downgrade(core));
    }

    /// Push invalidation messages into every sibling connection's mailbox.
    /// Runs on the committing thread, before the writer lock is released,
    /// so a sibling drains them before it can observe the new state.
    pub(crate) fn send_invalidations(
        &self,
        from: &Arc<ConnectionInner>,
        change_set: &ChangeSet,
    ) {
        let mut messages = Vec::new();
        for (collection, changes) in change_set.collections() {
            for event in changes.events() {
                match event {
                    crate::changeset::ChangeEvent::AllRemoved => {
                        messages.push(Invalidation::All {
                            collection: collection.to_string(),
                        });
                    }
                    crate::changeset::ChangeEvent::Changed(change) => {
                        messages.push(Invalidation::Key {
                            collection: collection.to_string(),
                            key: change.key.clone(),
                        });
                    }
                }
            }
        }
        if messages.is_empty() {
            return;
        }

        let mut connections = self.connections.lock();
        connections.retain(|weak| weak.strong_count() > 0);
        for weak in connections.iter() {
            let Some(sibling) = weak.upgrade() else {
                continue;
            };
            if Arc::ptr_eq(&sibling, from) {
                continue;
            }
            sibling.mailbox.lock().extend(messages.iter().cloned());
        }
    }

    /// Deliver a committed change set to every observing connection, in
    /// registration order. Runs under the writer lock, so callbacks fire
    /// after the commit and before any subsequent write begins.
    pub(crate) fn deliver_to_observers(&self, change_set: &Arc<ChangeSet>) {
        let observers: Vec<Arc<ObservingCore<Ctx>>> = {
            let mut list = self.observers.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.deliver_change_set(change_set);
        }
    }
}

/// The main database handle.
///
/// `Database` is cheaply clonable (`Arc`-based) and `Send + Sync`. Opening
/// runs [`Collections::set_up_collections`] inside a write transaction, so
/// registration failures (duplicates, `MigrationRequired`) surface here.
pub struct Database<Ctx: Collections> {
    shared: Arc<DatabaseShared<Ctx>>,
}

impl<Ctx: Collections> Clone for Database<Ctx> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Ctx: Collections> std::fmt::Debug for Database<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.path)
            .finish_non_exhaustive()
    }
}

impl<Ctx: Collections> Database<Ctx> {
    /// Open (or create) the database at `path` with default options.
    pub fn open(path: impl AsRef<Path>, collections: Ctx) -> Result<Self> {
        Self::open_with_options(path, collections, DatabaseOptions::default())
    }

    /// Open (or create) the database at `path`.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        collections: Ctx,
        options: DatabaseOptions,
    ) -> Result<Self> {
        let shared = Arc::new(DatabaseShared {
            path: path.as_ref().to_path_buf(),
            collections,
            options,
            registry: RwLock::new(Registry::default()),
            writer_lock: Mutex::new(()),
            row_version: AtomicU64::new(0),
            commit_seq: AtomicU64::new(0),
            connections: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        });
        let db = Database { shared };

        let setup = db.new_connection()?;
        {
            let session = setup.inner.session.lock();
            schema::create_system_tables(&session)?;
        }
        setup.read_write_transaction(|tx, collections| collections.set_up_collections(tx))?;

        // Seed the row-version counter past everything already stored, so
        // versions stay monotonic across reopen.
        {
            let session = setup.inner.session.lock();
            let mut max_stored = 0;
            for name in db.shared.registry.read().collection_names() {
                max_stored = max_stored.max(schema::max_row_version(&session, &name)?);
            }
            let current = db.shared.row_version.load(Ordering::SeqCst);
            db.shared
                .row_version
                .store(max_stored.max(current), Ordering::SeqCst);
        }

        tracing::debug!(path = %db.shared.path.display(), "opened database");
        Ok(db)
    }

    /// Create a new connection for reads and writes.
    pub fn new_connection(&self) -> Result<Connection<Ctx>> {
        Connection::new(Arc::clone(&self.shared))
    }

    /// Create a connection dedicated to change-driven reads.
    pub fn new_observing_connection(&self) -> Result<ObservingConnection<Ctx>> {
        ObservingConnection::new(Arc::clone(&self.shared))
    }

    /// The container of collections registered with this database. Useful
    /// for building predicates and prepared queries outside a transaction.
    pub fn collections(&self) -> &Ctx {
        &self.shared.collections
    }

    /// Names of all registered collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.shared.registry.read().collection_names()
    }

    /// The database file path.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}
