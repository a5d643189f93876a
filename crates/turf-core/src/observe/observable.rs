//! Observable core: subscriber registries and the collection-rooted
//! observable.
//!
//! Observables form a small graph of concrete nodes. Each node owns its
//! downstream subscriber list; derived nodes hold one reference-counted
//! subscription to their upstream, attached when the first subscriber
//! arrives and disposed when the last one leaves. Every emission pairs the
//! value with the read transaction that produced it, borrowed for the
//! duration of the callback.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::changeset::{ChangeSet, CollectionChanges};
use crate::collection::{Collection, Collections, IndexedCollection};
use crate::index::{values_where_sql, Predicate, PreparedQuery};
use crate::transaction::{ReadCollection, ReadTransaction};

use super::disposable::Disposable;
use super::operators::{MapNode, ShareReplayNode, ValuesWhereNode};
use super::ObservingCore;

/// A boxed subscriber callback. The transaction reference is valid only for
/// the duration of the call.
pub(crate) type Callback<Ctx, T> =
    Box<dyn for<'a> FnMut(&ReadTransaction<'a, Ctx>, &T) + Send>;

/// One node's downstream subscribers.
pub(crate) struct SubscriberList<Ctx: Collections, T> {
    inner: Mutex<SubscriberListInner<Ctx, T>>,
}

struct SubscriberListInner<Ctx: Collections, T> {
    next_id: u64,
    entries: Vec<(u64, Arc<Mutex<Callback<Ctx, T>>>)>,
}

impl<Ctx: Collections, T> SubscriberList<Ctx, T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SubscriberListInner {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Add a subscriber. Returns its id, whether the list was empty before,
    /// and the stored callback handle (for replay to just this subscriber).
    pub fn add(&self, callback: Callback<Ctx, T>) -> (u64, bool, Arc<Mutex<Callback<Ctx, T>>>) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let was_empty = inner.entries.is_empty();
        let handle = Arc::new(Mutex::new(callback));
        inner.entries.push((id, Arc::clone(&handle)));
        (id, was_empty, handle)
    }

    /// Remove a subscriber. Returns true when the list became empty.
    pub fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id);
        before > 0 && inner.entries.is_empty()
    }

    /// Invoke every subscriber with the value at this snapshot.
    ///
    /// The list lock is not held during callbacks, so a callback may dispose
    /// subscriptions (including its own); an in-progress callback always
    /// completes.
    pub fn emit(&self, tx: &ReadTransaction<'_, Ctx>, value: &T) {
        let snapshot: Vec<Arc<Mutex<Callback<Ctx, T>>>> = {
            let inner = self.inner.lock();
            inner.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in snapshot {
            (callback.lock())(tx, value);
        }
    }
}

/// A node in the observable graph.
pub(crate) trait ObservableNode<Ctx: Collections, T>: Send + Sync {
    fn subscribe(self: Arc<Self>, callback: Callback<Ctx, T>) -> Disposable;
}

/// A typed stream of transactional values.
///
/// Every emitted value is paired with the read transaction that produced
/// it; the pairing is borrowed, so the snapshot cannot outlive the
/// callback.
pub struct Observable<Ctx: Collections, T> {
    pub(crate) node: Arc<dyn ObservableNode<Ctx, T>>,
    pub(crate) core: Arc<ObservingCore<Ctx>>,
}

impl<Ctx: Collections, T> Clone for Observable<Ctx, T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            core: Arc::clone(&self.core),
        }
    }
}

impl<Ctx: Collections, T: Send + 'static> Observable<Ctx, T> {
    /// Register a callback for every emission. The returned [`Disposable`]
    /// detaches it; when a node loses its last subscriber, its own upstream
    /// subscription is disposed in turn.
    pub fn subscribe_next(
        &self,
        f: impl for<'a> FnMut(&ReadTransaction<'a, Ctx>, &T) + Send + 'static,
    ) -> Disposable {
        Arc::clone(&self.node).subscribe(Box::new(f))
    }

    /// Derive an observable whose value is `f(upstream)`. Synchronous; the
    /// closure may fetch related data from other collections through the
    /// borrowed transaction.
    pub fn map<U: Send + 'static>(
        &self,
        f: impl for<'a> Fn(&ReadTransaction<'a, Ctx>, &T) -> U + Send + Sync + 'static,
    ) -> Observable<Ctx, U> {
        MapNode::observable(self, f)
    }
}

impl<Ctx: Collections, T: Clone + Send + Sync + 'static> Observable<Ctx, T> {
    /// Multicast one upstream subscription to many downstream subscribers.
    /// The upstream subscription is attached on the first subscriber and
    /// disposed when the subscriber count returns to zero.
    pub fn share(&self) -> Observable<Ctx, T> {
        self.share_replay(0)
    }

    /// Like [`Observable::share`], additionally replaying the last
    /// `buffer_size` values to each new subscriber under a fresh snapshot.
    pub fn share_replay(&self, buffer_size: usize) -> Observable<Ctx, T> {
        ShareReplayNode::observable(self, buffer_size)
    }
}

impl<Ctx: Collections, V: Clone + Send + Sync + 'static> Observable<Ctx, Arc<Vec<V>>> {
    /// The first element of a collection-valued observable, `None` when
    /// empty.
    pub fn first(&self) -> Observable<Ctx, Option<V>> {
        self.map(|_tx, values| values.first().cloned())
    }
}

/// Root node: emits a collection's changes for every change set that
/// touches it.
pub(crate) struct CollectionNode<Ctx: Collections> {
    collection_name: String,
    pub(crate) subscribers: SubscriberList<Ctx, CollectionChanges>,
}

impl<Ctx: Collections> CollectionNode<Ctx> {
    pub fn new(collection_name: String) -> Self {
        Self {
            collection_name,
            subscribers: SubscriberList::new(),
        }
    }
}

impl<Ctx: Collections> ObservableNode<Ctx, CollectionChanges> for CollectionNode<Ctx> {
    fn subscribe(self: Arc<Self>, callback: Callback<Ctx, CollectionChanges>) -> Disposable {
        let (id, _was_empty, _handle) = self.subscribers.add(callback);
        let node = Arc::clone(&self);
        Disposable::new(move || {
            node.subscribers.remove(id);
        })
    }
}

impl<Ctx: Collections> super::AnyDispatcher<Ctx> for CollectionNode<Ctx> {
    fn deliver(&self, tx: &ReadTransaction<'_, Ctx>, change_set: &ChangeSet) {
        if let Some(changes) = change_set.collection(&self.collection_name) {
            if !changes.is_empty() {
                self.subscribers.emit(tx, changes);
            }
        }
    }
}

/// The observable for one collection on an observing connection.
///
/// Emits `(read view, changes)` once per commit that touches the
/// collection, in commit order.
pub struct CollectionObservable<Ctx: Collections, C: Collection> {
    raw: Observable<Ctx, CollectionChanges>,
    accessor: fn(&Ctx) -> &C,
}

impl<Ctx: Collections, C: Collection> Clone for CollectionObservable<Ctx, C> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            accessor: self.accessor,
        }
    }
}

impl<Ctx: Collections, C: Collection> CollectionObservable<Ctx, C> {
    pub(crate) fn new(raw: Observable<Ctx, CollectionChanges>, accessor: fn(&Ctx) -> &C) -> Self {
        Self { raw, accessor }
    }

    /// Subscribe to per-commit collection changes. The read view is bound
    /// to the post-commit snapshot and valid only inside the callback.
    pub fn subscribe_next(
        &self,
        mut f: impl for<'a> FnMut(ReadCollection<'a, Ctx, C>, &'a CollectionChanges) + Send + 'static,
    ) -> Disposable {
        let accessor = self.accessor;
        self.raw.subscribe_next(move |tx, changes| {
            let collection = (accessor)(tx.collections());
            f(tx.read_only(collection), changes)
        })
    }

    /// The raw per-commit change stream.
    pub fn changes(&self) -> Observable<Ctx, CollectionChanges> {
        self.raw.clone()
    }
}

impl<Ctx: Collections, C: IndexedCollection> CollectionObservable<Ctx, C> {
    /// Values matching `predicate`, re-queried at each commit that touches
    /// the collection. The default prefilter re-runs the query on every
    /// change set.
    pub fn values_where(&self, predicate: Predicate<C>) -> Observable<Ctx, Arc<Vec<C::Value>>> {
        self.values_where_prefiltered(predicate, |_changes, _previous| true)
    }

    /// Like [`CollectionObservable::values_where`], but when `prefilter`
    /// returns false the previous list is re-emitted without touching the
    /// database.
    pub fn values_where_prefiltered(
        &self,
        predicate: Predicate<C>,
        prefilter: impl Fn(&CollectionChanges, &[C::Value]) -> bool + Send + Sync + 'static,
    ) -> Observable<Ctx, Arc<Vec<C::Value>>> {
        let collection = (self.accessor)(&self.raw.core.db.collections);
        let sql = values_where_sql(collection.name(), predicate.sql());
        ValuesWhereNode::observable(
            &self.raw,
            self.accessor,
            sql,
            predicate.bindings().to_vec(),
            Box::new(prefilter),
        )
    }

    /// Values of a prepared query, re-run per commit under the prefilter.
    /// Bindings were fixed at prepare time.
    pub fn values_prepared(
        &self,
        query: &PreparedQuery<C>,
        prefilter: impl Fn(&CollectionChanges, &[C::Value]) -> bool + Send + Sync + 'static,
    ) -> Observable<Ctx, Arc<Vec<C::Value>>> {
        ValuesWhereNode::observable(
            &self.raw,
            self.accessor,
            query.sql().to_string(),
            query.bindings().to_vec(),
            Box::new(prefilter),
        )
    }
}
