//! Connections and the transaction engine entry points.
//!
//! Each connection owns its own SQL session, its own per-collection value
//! caches, and a mailbox of cache-invalidation messages drained at
//! transaction start. The database-wide writer lock makes read/write
//! transactions exclusive across all connections, while readers on sibling
//! connections proceed concurrently at their own snapshot.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheSet;
use crate::collection::Collections;
use crate::database::DatabaseShared;
use crate::error::{Result, StorageError};
use crate::sql::SqlSession;
use crate::transaction::{invalidate_after_abort, ReadTransaction, ReadWriteTransaction};

/// A cache-invalidation message delivered to sibling connections after a
/// commit.
#[derive(Debug, Clone)]
pub(crate) enum Invalidation {
    Key { collection: String, key: String },
    All { collection: String },
}

/// Connection state shared with the database (for coherency delivery).
pub(crate) struct ConnectionInner {
    pub(crate) session: Mutex<SqlSession>,
    pub(crate) caches: Mutex<CacheSet>,
    pub(crate) mailbox: Mutex<Vec<Invalidation>>,
}

impl ConnectionInner {
    pub(crate) fn open(db: &DatabaseShared<impl Collections>) -> Result<Arc<Self>> {
        let session = SqlSession::open(&db.path, db.options.busy_timeout)?;
        Ok(Arc::new(Self {
            session: Mutex::new(session),
            caches: Mutex::new(CacheSet::default()),
            mailbox: Mutex::new(Vec::new()),
        }))
    }

    /// Apply pending invalidations. Runs before every transaction begins,
    /// so a sibling's commit is reflected here before the next snapshot is
    /// taken.
    pub(crate) fn drain_mailbox(&self) {
        let messages = std::mem::take(&mut *self.mailbox.lock());
        if messages.is_empty() {
            return;
        }
        let mut caches = self.caches.lock();
        for message in messages {
            match message {
                Invalidation::Key { collection, key } => caches.invalidate(&collection, &key),
                Invalidation::All { collection } => caches.invalidate_all_in(&collection),
            }
        }
    }
}

/// A connection to the database.
///
/// Dedicate one connection per thread of activity: the session is locked for
/// the duration of each transaction closure.
pub struct Connection<Ctx: Collections> {
    pub(crate) db: Arc<DatabaseShared<Ctx>>,
    pub(crate) inner: Arc<ConnectionInner>,
}

impl<Ctx: Collections> Connection<Ctx> {
    pub(crate) fn new(db: Arc<DatabaseShared<Ctx>>) -> Result<Self> {
        let inner = ConnectionInner::open(db.as_ref())?;
        db.register_connection(&inner);
        Ok(Self { db, inner })
    }

    /// Execute a read transaction.
    ///
    /// The closure receives the transaction and the collections container.
    /// Reads never commit side effects: the transaction is rolled back
    /// unconditionally and the closure's result returned.
    pub fn read_transaction<R>(
        &self,
        body: impl FnOnce(&ReadTransaction<'_, Ctx>, &Ctx) -> Result<R>,
    ) -> Result<R> {
        self.inner.drain_mailbox();
        let session = self.inner.session.lock();
        session.begin_deferred()?;
        let guard = TxnGuard::new(&session);

        let result = {
            let tx = ReadTransaction::new(&session, &self.inner, &self.db.collections);
            body(&tx, &self.db.collections)
        };

        guard.rollback();
        result
    }

    /// Execute a read/write transaction.
    ///
    /// Acquires the database's writer lock (exclusive across connections),
    /// then runs the closure inside an immediate transaction. On success the
    /// transaction commits, the change set is published for cache coherency
    /// and observation, and only then is the writer lock released, so
    /// observer callbacks always run between this commit and the next write.
    /// On error everything is rolled back and nothing is published.
    pub fn read_write_transaction<R>(
        &self,
        body: impl FnOnce(&mut ReadWriteTransaction<'_, Ctx>, &Ctx) -> Result<R>,
    ) -> Result<R> {
        let _writer = self.db.writer_lock.lock();
        self.inner.drain_mailbox();
        let session = self.inner.session.lock();
        session.begin_immediate()?;
        let guard = TxnGuard::new(&session);

        let (result, changes) = {
            let mut tx = ReadWriteTransaction::new(&session, &self.inner, &self.db);
            let result = body(&mut tx, &self.db.collections);
            (result, tx.into_changes())
        };

        match result {
            Ok(value) => {
                if let Err(e) = guard.commit() {
                    invalidate_after_abort(&mut self.inner.caches.lock(), &changes);
                    return Err(e.into());
                }
                let change_set = Arc::new(changes.freeze(self.db.next_commit_seq()));
                if !change_set.is_empty() {
                    tracing::debug!(seq = change_set.seq(), "committed write transaction");
                    self.db.send_invalidations(&self.inner, &change_set);
                    self.db.deliver_to_observers(&change_set);
                }
                Ok(value)
            }
            Err(e) => {
                guard.rollback();
                // Entries cached for rolled-back writes can never produce a
                // wrong hit (their row version is gone), but evict them now
                // rather than letting them age out.
                invalidate_after_abort(&mut self.inner.caches.lock(), &changes);
                Err(e)
            }
        }
    }
}

/// Rolls the transaction back on drop unless explicitly finished, so a
/// panicking closure leaves the session usable.
struct TxnGuard<'a> {
    session: &'a SqlSession,
    finished: bool,
}

impl<'a> TxnGuard<'a> {
    fn new(session: &'a SqlSession) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    fn commit(mut self) -> std::result::Result<(), StorageError> {
        self.finished = true;
        match self.session.commit() {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed COMMIT leaves the transaction open; roll it back
                // so the session stays usable. The change set is discarded
                // by the caller.
                let _ = self.session.rollback();
                Err(e)
            }
        }
    }

    fn rollback(mut self) {
        self.finished = true;
        if let Err(e) = self.session.rollback() {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.session.rollback();
        }
    }
}
