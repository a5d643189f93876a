//! The observation pipeline.
//!
//! An observing connection is dedicated to change-driven reads: it is not
//! used for direct user transactions. Each committed change set is delivered
//! to it while the writer lock is still held, so subscriber callbacks run
//! inside a read transaction whose snapshot is exactly the database state
//! immediately after the triggering commit, strictly between that commit
//! and the next write.

mod disposable;
mod observable;
mod operators;

pub use disposable::Disposable;
pub use observable::{CollectionObservable, Observable};

pub(crate) use observable::{CollectionNode, SubscriberList};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::changeset::ChangeSet;
use crate::collection::{Collection, Collections};
use crate::connection::ConnectionInner;
use crate::database::DatabaseShared;
use crate::error::{Result, StorageError};
use crate::transaction::ReadTransaction;

/// A root observable registered with an observing connection.
pub(crate) trait AnyDispatcher<Ctx: Collections>: Send + Sync {
    fn deliver(&self, tx: &ReadTransaction<'_, Ctx>, change_set: &ChangeSet);
}

/// Shared state of one observing connection.
pub(crate) struct ObservingCore<Ctx: Collections> {
    pub(crate) db: Arc<DatabaseShared<Ctx>>,
    pub(crate) conn: Arc<ConnectionInner>,
    dispatchers: Mutex<Vec<Weak<dyn AnyDispatcher<Ctx>>>>,
    /// Sequence of the last delivered change set.
    pub(crate) last_seq: AtomicU64,
}

impl<Ctx: Collections> ObservingCore<Ctx> {
    fn new(db: Arc<DatabaseShared<Ctx>>) -> Result<Arc<Self>> {
        let conn = ConnectionInner::open(db.as_ref())?;
        // Observing connections participate in cache coherency like any
        // other connection.
        db.register_connection(&conn);
        let core = Arc::new(Self {
            db,
            conn,
            dispatchers: Mutex::new(Vec::new()),
            last_seq: AtomicU64::new(0),
        });
        core.db.register_observer(&core);
        Ok(core)
    }

    pub(crate) fn register_dispatcher(&self, dispatcher: Weak<dyn AnyDispatcher<Ctx>>) {
        let mut dispatchers = self.dispatchers.lock();
        dispatchers.retain(|weak| weak.strong_count() > 0);
        dispatchers.push(dispatcher);
    }

    /// Deliver one committed change set to every live root observable,
    /// inside a read transaction at the post-commit snapshot.
    pub(crate) fn deliver_change_set(&self, change_set: &Arc<ChangeSet>) {
        self.conn.drain_mailbox();

        let dispatchers: Vec<Arc<dyn AnyDispatcher<Ctx>>> = {
            let mut list = self.dispatchers.lock();
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };

        if !dispatchers.is_empty() {
            let session = self.conn.session.lock();
            if let Err(e) = session.begin_deferred() {
                tracing::warn!(error = %e, "observer snapshot unavailable; dropping delivery");
                return;
            }
            {
                let tx = ReadTransaction::new(&session, &self.conn, &self.db.collections);
                for dispatcher in dispatchers {
                    dispatcher.deliver(&tx, change_set);
                }
            }
            if let Err(e) = session.rollback() {
                tracing::warn!(error = %e, "observer snapshot rollback failed");
            }
        }

        self.last_seq.store(change_set.seq(), Ordering::SeqCst);
    }

    /// Run `f` inside a fresh read snapshot on the observing connection.
    /// Used to pair replayed values with a live transaction.
    pub(crate) fn with_snapshot<R>(
        &self,
        f: impl FnOnce(&ReadTransaction<'_, Ctx>) -> R,
    ) -> std::result::Result<R, StorageError> {
        self.conn.drain_mailbox();
        let session = self.conn.session.lock();
        session.begin_deferred()?;
        let out = {
            let tx = ReadTransaction::new(&session, &self.conn, &self.db.collections);
            f(&tx)
        };
        session.rollback()?;
        Ok(out)
    }
}

/// A connection dedicated to change-driven reads.
///
/// Not usable for direct user transactions; instead, derive observables
/// from it and read through the snapshot transaction each emission carries.
pub struct ObservingConnection<Ctx: Collections> {
    core: Arc<ObservingCore<Ctx>>,
}

impl<Ctx: Collections> ObservingConnection<Ctx> {
    pub(crate) fn new(db: Arc<DatabaseShared<Ctx>>) -> Result<Self> {
        Ok(Self {
            core: ObservingCore::new(db)?,
        })
    }

    /// Sequence number of the last change set delivered to this connection.
    pub fn last_delivered_seq(&self) -> crate::types::ChangeSeq {
        self.core.last_seq.load(Ordering::SeqCst)
    }

    /// Observe a collection. The accessor selects the collection out of the
    /// container, e.g. `observing.observe(|c: &AppCollections| &c.users)`.
    pub fn observe<C: Collection>(&self, accessor: fn(&Ctx) -> &C) -> CollectionObservable<Ctx, C> {
        let name = accessor(&self.core.db.collections).name().to_string();
        let node = Arc::new(CollectionNode::new(name));
        let dispatcher: Arc<dyn AnyDispatcher<Ctx>> = node.clone();
        self.core.register_dispatcher(Arc::downgrade(&dispatcher));

        let raw = Observable {
            node,
            core: Arc::clone(&self.core),
        };
        CollectionObservable::new(raw, accessor)
    }
}
