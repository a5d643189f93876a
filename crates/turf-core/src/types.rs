//! Core types: row versions, commit sequences, shared constants.

/// Version number assigned to a row by the writer, one per mutation,
/// globally monotonic across all collections of a database.
pub type RowVersion = u64;

/// Commit sequence number. Change sets are totally ordered by it.
pub type ChangeSeq = u64;

/// Default LRU capacity for a collection's per-connection value cache.
pub const DEFAULT_VALUE_CACHE_CAPACITY: usize = 50;
