//! Derived observable nodes: `map`, `values_where`, `share_replay`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::changeset::CollectionChanges;
use crate::collection::{Collections, IndexedCollection};
use crate::sql::Scalar;
use crate::transaction::ReadTransaction;

use super::disposable::Disposable;
use super::observable::{Callback, Observable, ObservableNode, SubscriberList};

/// Emits `f(upstream value)` for every upstream emission.
pub(crate) struct MapNode<Ctx: Collections, T, U> {
    upstream: Observable<Ctx, T>,
    f: Arc<dyn for<'a> Fn(&ReadTransaction<'a, Ctx>, &T) -> U + Send + Sync>,
    subscribers: SubscriberList<Ctx, U>,
    upstream_sub: Mutex<Option<Disposable>>,
}

impl<Ctx: Collections, T: Send + 'static, U: Send + 'static> MapNode<Ctx, T, U> {
    pub fn observable(
        upstream: &Observable<Ctx, T>,
        f: impl for<'a> Fn(&ReadTransaction<'a, Ctx>, &T) -> U + Send + Sync + 'static,
    ) -> Observable<Ctx, U> {
        let node = Arc::new(Self {
            upstream: upstream.clone(),
            f: Arc::new(f),
            subscribers: SubscriberList::new(),
            upstream_sub: Mutex::new(None),
        });
        Observable {
            node,
            core: Arc::clone(&upstream.core),
        }
    }

    fn attach_upstream(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self.upstream.subscribe_next(move |tx, value| {
            if let Some(node) = weak.upgrade() {
                let mapped = (node.f)(tx, value);
                node.subscribers.emit(tx, &mapped);
            }
        });
        *self.upstream_sub.lock() = Some(subscription);
    }
}

impl<Ctx: Collections, T: Send + 'static, U: Send + 'static> ObservableNode<Ctx, U>
    for MapNode<Ctx, T, U>
{
    fn subscribe(self: Arc<Self>, callback: Callback<Ctx, U>) -> Disposable {
        let (id, was_empty, _handle) = self.subscribers.add(callback);
        if was_empty {
            self.attach_upstream();
        }
        let node = Arc::clone(&self);
        Disposable::new(move || {
            if node.subscribers.remove(id) {
                if let Some(upstream) = node.upstream_sub.lock().take() {
                    upstream.dispose();
                }
            }
        })
    }
}

/// Prefilter for a `values_where` observable: given the change set and the
/// previously emitted values, decide whether to re-run the query.
pub(crate) type Prefilter<V> = Box<dyn Fn(&CollectionChanges, &[V]) -> bool + Send + Sync>;

/// Re-runs a compiled values query on each upstream change set, caching the
/// last result. When the prefilter declines, or the re-query fails (logged,
/// never surfaced), the previous list is re-emitted unchanged.
pub(crate) struct ValuesWhereNode<Ctx: Collections, C: IndexedCollection> {
    upstream: Observable<Ctx, CollectionChanges>,
    accessor: fn(&Ctx) -> &C,
    sql: String,
    bindings: Vec<Scalar>,
    prefilter: Prefilter<C::Value>,
    previous: Mutex<Arc<Vec<C::Value>>>,
    subscribers: SubscriberList<Ctx, Arc<Vec<C::Value>>>,
    upstream_sub: Mutex<Option<Disposable>>,
}

impl<Ctx: Collections, C: IndexedCollection> ValuesWhereNode<Ctx, C> {
    pub fn observable(
        upstream: &Observable<Ctx, CollectionChanges>,
        accessor: fn(&Ctx) -> &C,
        sql: String,
        bindings: Vec<Scalar>,
        prefilter: Prefilter<C::Value>,
    ) -> Observable<Ctx, Arc<Vec<C::Value>>> {
        let node = Arc::new(Self {
            upstream: upstream.clone(),
            accessor,
            sql,
            bindings,
            prefilter,
            previous: Mutex::new(Arc::new(Vec::new())),
            subscribers: SubscriberList::new(),
            upstream_sub: Mutex::new(None),
        });
        Observable {
            node,
            core: Arc::clone(&upstream.core),
        }
    }

    fn attach_upstream(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self.upstream.subscribe_next(move |tx, changes| {
            let Some(node) = weak.upgrade() else {
                return;
            };
            node.deliver(tx, changes);
        });
        *self.upstream_sub.lock() = Some(subscription);
    }

    fn deliver(&self, tx: &ReadTransaction<'_, Ctx>, changes: &CollectionChanges) {
        let previous = Arc::clone(&self.previous.lock());
        if !(self.prefilter)(changes, &previous) {
            self.subscribers.emit(tx, &previous);
            return;
        }

        let collection = (self.accessor)(tx.collections());
        match tx.read_only(collection).query_values(&self.sql, &self.bindings) {
            Ok(values) => {
                let values = Arc::new(values);
                *self.previous.lock() = Arc::clone(&values);
                self.subscribers.emit(tx, &values);
            }
            Err(e) => {
                tracing::warn!(error = %e, "values query failed; re-emitting last good value");
                self.subscribers.emit(tx, &previous);
            }
        }
    }
}

impl<Ctx: Collections, C: IndexedCollection> ObservableNode<Ctx, Arc<Vec<C::Value>>>
    for ValuesWhereNode<Ctx, C>
{
    fn subscribe(self: Arc<Self>, callback: Callback<Ctx, Arc<Vec<C::Value>>>) -> Disposable {
        let (id, was_empty, _handle) = self.subscribers.add(callback);
        if was_empty {
            self.attach_upstream();
        }
        let node = Arc::clone(&self);
        Disposable::new(move || {
            if node.subscribers.remove(id) {
                if let Some(upstream) = node.upstream_sub.lock().take() {
                    upstream.dispose();
                }
            }
        })
    }
}

/// Multicasts one upstream subscription, buffering the last `capacity`
/// values for replay to late subscribers.
pub(crate) struct ShareReplayNode<Ctx: Collections, T: Clone + Send + Sync + 'static> {
    upstream: Observable<Ctx, T>,
    capacity: usize,
    buffer: Mutex<VecDeque<T>>,
    subscribers: SubscriberList<Ctx, T>,
    upstream_sub: Mutex<Option<Disposable>>,
}

impl<Ctx: Collections, T: Clone + Send + Sync + 'static> ShareReplayNode<Ctx, T> {
    pub fn observable(upstream: &Observable<Ctx, T>, capacity: usize) -> Observable<Ctx, T> {
        let node = Arc::new(Self {
            upstream: upstream.clone(),
            capacity,
            buffer: Mutex::new(VecDeque::new()),
            subscribers: SubscriberList::new(),
            upstream_sub: Mutex::new(None),
        });
        Observable {
            node,
            core: Arc::clone(&upstream.core),
        }
    }

    fn attach_upstream(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self.upstream.subscribe_next(move |tx, value| {
            let Some(node) = weak.upgrade() else {
                return;
            };
            if node.capacity > 0 {
                let mut buffer = node.buffer.lock();
                if buffer.len() == node.capacity {
                    buffer.pop_front();
                }
                buffer.push_back(value.clone());
            }
            node.subscribers.emit(tx, value);
        });
        *self.upstream_sub.lock() = Some(subscription);
    }
}

impl<Ctx: Collections, T: Clone + Send + Sync + 'static> ObservableNode<Ctx, T>
    for ShareReplayNode<Ctx, T>
{
    fn subscribe(self: Arc<Self>, callback: Callback<Ctx, T>) -> Disposable {
        let (id, was_empty, handle) = self.subscribers.add(callback);
        if was_empty {
            self.attach_upstream();
        }

        // Replay buffered values to the new subscriber only, under a fresh
        // snapshot of the observing connection.
        let buffered: Vec<T> = self.buffer.lock().iter().cloned().collect();
        if !buffered.is_empty() {
            let replay = self.core_replay(&buffered, &handle);
            if let Err(e) = replay {
                tracing::warn!(error = %e, "share_replay could not open a snapshot for replay");
            }
        }

        let node = Arc::clone(&self);
        Disposable::new(move || {
            if node.subscribers.remove(id) {
                if let Some(upstream) = node.upstream_sub.lock().take() {
                    upstream.dispose();
                }
            }
        })
    }
}

impl<Ctx: Collections, T: Clone + Send + Sync + 'static> ShareReplayNode<Ctx, T> {
    fn core_replay(
        &self,
        buffered: &[T],
        handle: &Arc<Mutex<Callback<Ctx, T>>>,
    ) -> Result<(), crate::error::StorageError> {
        self.upstream.core.with_snapshot(|tx| {
            let mut callback = handle.lock();
            for value in buffered {
                (callback)(tx, value);
            }
        })
    }
}
