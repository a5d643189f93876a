//! Change sets: the per-commit record of key-level mutations.
//!
//! A write transaction accumulates changes in a [`ChangeSetBuilder`]; on
//! commit the builder freezes into an immutable [`ChangeSet`] stamped with
//! the commit sequence, which is published to sibling connections (cache
//! coherency) and observing connections. Rolled-back transactions publish
//! nothing.

use std::collections::BTreeMap;

use crate::types::{ChangeSeq, RowVersion};

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

/// One key-level mutation. `row_version` is the version the writer assigned
/// to the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    pub kind: ChangeKind,
    pub row_version: RowVersion,
}

/// An event within a collection's change stream, in commit order.
///
/// `AllRemoved` supersedes any events accumulated before it; events recorded
/// after it (a remove-all followed by fresh inserts in the same transaction)
/// follow it in order, and observers are expected to honor the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Changed(Change),
    AllRemoved,
}

/// The ordered changes one commit applied to one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionChanges {
    events: Vec<ChangeEvent>,
}

impl CollectionChanges {
    /// Ordered events, commit order.
    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    /// Per-key changes in commit order, skipping remove-all markers.
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.events.iter().filter_map(|e| match e {
            ChangeEvent::Changed(c) => Some(c),
            ChangeEvent::AllRemoved => None,
        })
    }

    /// True if this commit removed every value at some point.
    pub fn removed_all(&self) -> bool {
        self.events.iter().any(|e| matches!(e, ChangeEvent::AllRemoved))
    }

    /// True if the commit touched `key` (or cleared the whole collection).
    pub fn has_change_for_key(&self, key: &str) -> bool {
        self.events.iter().any(|e| match e {
            ChangeEvent::Changed(c) => c.key == key,
            ChangeEvent::AllRemoved => true,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// The frozen record of one committed write transaction.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    seq: ChangeSeq,
    collections: BTreeMap<String, CollectionChanges>,
}

impl ChangeSet {
    /// The commit sequence number. Observers see change sets in this order,
    /// with no gaps and no duplicates.
    pub fn seq(&self) -> ChangeSeq {
        self.seq
    }

    /// Changes for one collection, if the commit touched it.
    pub fn collection(&self, name: &str) -> Option<&CollectionChanges> {
        self.collections.get(name)
    }

    /// Iterate `(collection name, changes)` pairs.
    pub fn collections(&self) -> impl Iterator<Item = (&str, &CollectionChanges)> {
        self.collections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(CollectionChanges::is_empty)
    }
}

/// Accumulates changes during a write transaction.
#[derive(Debug, Default)]
pub(crate) struct ChangeSetBuilder {
    collections: BTreeMap<String, CollectionChanges>,
}

impl ChangeSetBuilder {
    pub fn record(&mut self, collection: &str, change: Change) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .events
            .push(ChangeEvent::Changed(change));
    }

    /// Record a remove-all. Drops per-key events accumulated so far for the
    /// collection; later events append after the marker.
    pub fn record_all_removed(&mut self, collection: &str) {
        let changes = self.collections.entry(collection.to_string()).or_default();
        changes.events.clear();
        changes.events.push(ChangeEvent::AllRemoved);
    }

    /// Every `(collection, key)` recorded so far, plus whether the
    /// collection was cleared. Used to invalidate the writer's own cache
    /// when the transaction aborts after partial writes.
    pub fn touched(&self) -> impl Iterator<Item = (&str, &CollectionChanges)> {
        self.collections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(CollectionChanges::is_empty)
    }

    pub fn freeze(self, seq: ChangeSeq) -> ChangeSet {
        ChangeSet {
            seq,
            collections: self.collections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str, kind: ChangeKind, version: RowVersion) -> Change {
        Change {
            key: key.to_string(),
            kind,
            row_version: version,
        }
    }

    #[test]
    fn test_changes_accumulate_in_order() {
        let mut builder = ChangeSetBuilder::default();
        builder.record("users", change("a", ChangeKind::Inserted, 1));
        builder.record("users", change("b", ChangeKind::Inserted, 2));
        builder.record("users", change("a", ChangeKind::Updated, 3));

        let set = builder.freeze(1);
        let users = set.collection("users").unwrap();
        let keys: Vec<_> = users.changes().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "a"]);
        assert!(users.has_change_for_key("b"));
        assert!(!users.has_change_for_key("c"));
    }

    #[test]
    fn test_remove_all_supersedes_prior_changes() {
        let mut builder = ChangeSetBuilder::default();
        builder.record("users", change("a", ChangeKind::Inserted, 1));
        builder.record_all_removed("users");
        builder.record("users", change("b", ChangeKind::Inserted, 2));

        let set = builder.freeze(1);
        let users = set.collection("users").unwrap();
        assert!(users.removed_all());
        assert_eq!(
            users.events(),
            &[
                ChangeEvent::AllRemoved,
                ChangeEvent::Changed(change("b", ChangeKind::Inserted, 2)),
            ]
        );
        // A cleared collection reports a change for every key.
        assert!(users.has_change_for_key("never_written"));
    }

    #[test]
    fn test_collections_are_independent() {
        let mut builder = ChangeSetBuilder::default();
        builder.record("users", change("a", ChangeKind::Inserted, 1));
        builder.record("movies", change("m", ChangeKind::Removed, 2));

        let set = builder.freeze(7);
        assert_eq!(set.seq(), 7);
        assert!(set.collection("users").is_some());
        assert!(set.collection("movies").is_some());
        assert!(set.collection("actors").is_none());
        assert_eq!(set.collections().count(), 2);
    }

    #[test]
    fn test_empty_builder_freezes_empty() {
        let builder = ChangeSetBuilder::default();
        assert!(builder.is_empty());
        assert!(builder.freeze(1).is_empty());
    }
}
