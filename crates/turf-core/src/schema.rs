//! Schema manager: system tables, per-collection value tables, and
//! schema-version comparison at registration.
//!
//! The on-disk layout is fixed: `__turf_collections` and `__turf_extensions`
//! track what is registered, and each collection stores its rows in
//! `collection_{name}(key, valueData, rowVersion)`.

use crate::error::{Error, MigrationError, RegistrationError, StorageError};
use crate::sql::{Scalar, SqlSession};

/// Create the system tables if they do not exist. Runs once at open, before
/// any collection is registered.
pub(crate) fn create_system_tables(session: &SqlSession) -> Result<(), StorageError> {
    session.execute_batch(
        "CREATE TABLE IF NOT EXISTS __turf_collections (
            name TEXT PRIMARY KEY NOT NULL,
            schemaVersion INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS __turf_extensions (
            name TEXT NOT NULL,
            collection TEXT NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (name, collection)
        );",
    )
}

/// The value table backing a collection.
pub(crate) fn collection_table(name: &str) -> String {
    format!("collection_{name}")
}

/// The side table backing a secondary index on a collection.
pub(crate) fn index_table(collection_name: &str) -> String {
    format!("index_{collection_name}")
}

/// Validate a name that will be spliced into DDL (collection names, index
/// property names). Identifiers are restricted to `[A-Za-z0-9_]`, non-empty.
pub(crate) fn validate_identifier(name: &str) -> Result<(), RegistrationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RegistrationError::InvalidName(name.to_string()))
    }
}

/// Register a collection's schema: create its value table on first sight,
/// or compare the stored schema version against the declared one.
///
/// A mismatch in either direction surfaces `MigrationRequired`; migration
/// itself is the caller's responsibility.
pub(crate) fn ensure_collection(
    session: &SqlSession,
    name: &str,
    schema_version: u64,
) -> Result<(), Error> {
    let stored = session.query_row(
        "SELECT schemaVersion FROM __turf_collections WHERE name = ?",
        &[Scalar::from(name)],
        |row| row.u64(0),
    )?;

    match stored {
        Some(from) if from != schema_version => {
            return Err(MigrationError::MigrationRequired {
                collection: name.to_string(),
                from,
                to: schema_version,
            }
            .into());
        }
        Some(_) => {}
        None => {
            session.execute(
                "INSERT INTO __turf_collections (name, schemaVersion) VALUES (?, ?)",
                &[Scalar::from(name), Scalar::from(schema_version as i64)],
            )?;
        }
    }

    session.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            key TEXT PRIMARY KEY NOT NULL,
            valueData BLOB NOT NULL,
            rowVersion INTEGER NOT NULL
        )",
        collection_table(name)
    ))?;

    Ok(())
}

/// The recorded version of an extension on a collection, if any.
pub(crate) fn extension_version(
    session: &SqlSession,
    collection: &str,
    name: &str,
) -> Result<Option<u64>, StorageError> {
    session.query_row(
        "SELECT version FROM __turf_extensions WHERE name = ? AND collection = ?",
        &[Scalar::from(name), Scalar::from(collection)],
        |row| row.u64(0),
    )
}

/// Record (or bump) an extension's installed version.
pub(crate) fn record_extension(
    session: &SqlSession,
    collection: &str,
    name: &str,
    version: u64,
) -> Result<(), StorageError> {
    session.execute(
        "INSERT OR REPLACE INTO __turf_extensions (name, collection, version) VALUES (?, ?, ?)",
        &[
            Scalar::from(name),
            Scalar::from(collection),
            Scalar::from(version as i64),
        ],
    )?;
    Ok(())
}

/// The largest row version stored in a collection table, 0 when empty.
pub(crate) fn max_row_version(
    session: &SqlSession,
    collection: &str,
) -> Result<u64, StorageError> {
    let max = session.query_row(
        &format!(
            "SELECT COALESCE(MAX(rowVersion), 0) FROM {}",
            collection_table(collection)
        ),
        &[],
        |row| row.u64(0),
    )?;
    Ok(max.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_session() -> (SqlSession, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let session = SqlSession::open(&dir.path().join("test.db"), Duration::from_secs(1)).unwrap();
        create_system_tables(&session).unwrap();
        (session, dir)
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("users_2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("users; DROP TABLE x").is_err());
        assert!(validate_identifier("a-b").is_err());
    }

    #[test]
    fn test_ensure_collection_creates_table() {
        let (session, _dir) = open_session();
        ensure_collection(&session, "users", 1).unwrap();

        // The value table exists and is writable.
        session
            .execute(
                "INSERT INTO collection_users (key, valueData, rowVersion) VALUES (?, ?, ?)",
                &[
                    Scalar::from("a"),
                    Scalar::Blob(vec![1]),
                    Scalar::from(1i64),
                ],
            )
            .unwrap();

        // Re-registering at the same version is a no-op.
        ensure_collection(&session, "users", 1).unwrap();
    }

    #[test]
    fn test_schema_version_mismatch_requires_migration() {
        let (session, _dir) = open_session();
        ensure_collection(&session, "users", 1).unwrap();

        let err = ensure_collection(&session, "users", 2).unwrap_err();
        match err {
            Error::Migration(MigrationError::MigrationRequired { collection, from, to }) => {
                assert_eq!(collection, "users");
                assert_eq!(from, 1);
                assert_eq!(to, 2);
            }
            other => panic!("expected MigrationRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_extension_version_round_trip() {
        let (session, _dir) = open_session();
        assert_eq!(extension_version(&session, "users", "index_users").unwrap(), None);

        record_extension(&session, "users", "index_users", 3).unwrap();
        assert_eq!(
            extension_version(&session, "users", "index_users").unwrap(),
            Some(3)
        );

        record_extension(&session, "users", "index_users", 4).unwrap();
        assert_eq!(
            extension_version(&session, "users", "index_users").unwrap(),
            Some(4)
        );
    }

    #[test]
    fn test_max_row_version() {
        let (session, _dir) = open_session();
        ensure_collection(&session, "users", 1).unwrap();
        assert_eq!(max_row_version(&session, "users").unwrap(), 0);

        for (k, v) in [("a", 3i64), ("b", 9)] {
            session
                .execute(
                    "INSERT INTO collection_users (key, valueData, rowVersion) VALUES (?, ?, ?)",
                    &[Scalar::from(k), Scalar::Blob(vec![0]), Scalar::from(v)],
                )
                .unwrap();
        }
        assert_eq!(max_row_version(&session, "users").unwrap(), 9);
    }
}
