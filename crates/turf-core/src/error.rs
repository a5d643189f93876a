//! Error types for all Turf operations.

use std::io;
use thiserror::Error;

/// Top-level error type for Turf operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Errors surfaced by the SQL access layer.
///
/// Any storage error aborts the containing transaction.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("database is busy")]
    Busy,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("database corruption: {0}")]
    Corruption(String),

    #[error("sql engine error: {0}")]
    Engine(String),
}

/// Errors raised while registering collections and extensions at setup.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("collection already registered: {0}")]
    DuplicateCollection(String),

    #[error("extension '{extension}' already registered on collection '{collection}'")]
    DuplicateExtension {
        extension: String,
        collection: String,
    },

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid identifier: {0:?}")]
    InvalidName(String),
}

/// Surfaced at open when a collection's stored schema version does not match
/// the declared one. Migration logic is the caller's responsibility.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("collection '{collection}' requires migration from schema version {from} to {to}")]
    MigrationRequired {
        collection: String,
        from: u64,
        to: u64,
    },
}

/// A collection's `serialize` hook failed. Aborts the write transaction.
///
/// The inverse case (the `deserialize` hook returning `None` for a stored
/// row) is not an error: the value is treated as absent and the row remains
/// stored.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to serialize value for collection '{collection}': {reason}")]
    Serialize { collection: String, reason: String },
}

/// Query construction errors.
///
/// The typed predicate DSL prevents these statically in safe use; they remain
/// for the few dynamic entry points (e.g. a property name colliding with a
/// reserved column).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("scalar type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),
}

pub type Result<T> = std::result::Result<T, Error>;
