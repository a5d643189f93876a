//! Thin typed wrapper over the embedded relational engine.
//!
//! The engine is treated as a black box offering WAL-mode concurrent readers
//! plus a single writer, prepared statements, and typed scalar columns. All
//! engine errors are mapped into [`StorageError`]; no engine types leak out
//! of this module.

mod scalar;

pub use scalar::{Scalar, ScalarKind};

use std::path::Path;
use std::time::Duration;

use rusqlite::OpenFlags;

use crate::error::StorageError;

/// One SQL session over the shared database file.
///
/// Every connection owns exactly one session; sessions are never shared
/// across connections. A session is `Send` but not `Sync`; callers guard it
/// with their own lock.
pub struct SqlSession {
    conn: rusqlite::Connection,
}

impl SqlSession {
    /// Open a session on the database file, configuring WAL mode so readers
    /// on sibling sessions proceed concurrently with the single writer.
    pub(crate) fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(map_engine_error)?;
        conn.busy_timeout(busy_timeout).map_err(map_engine_error)?;
        // journal_mode returns a result row; query it rather than execute.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))
            .map_err(map_engine_error)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_engine_error)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_engine_error)?;
        Ok(Self { conn })
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[Scalar]) -> Result<usize, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_engine_error)?;
        stmt.execute(rusqlite::params_from_iter(params))
            .map_err(map_engine_error)
    }

    /// Execute one or more statements that take no parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.conn.execute_batch(sql).map_err(map_engine_error)
    }

    /// Run a query expected to return at most one row.
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Scalar],
        f: impl FnOnce(&SqlRow<'_>) -> Result<T, StorageError>,
    ) -> Result<Option<T>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_engine_error)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(map_engine_error)?;
        match rows.next().map_err(map_engine_error)? {
            Some(row) => Ok(Some(f(&SqlRow { inner: row })?)),
            None => Ok(None),
        }
    }

    /// Run a query and collect every row through the mapping closure.
    pub fn query_map<T>(
        &self,
        sql: &str,
        params: &[Scalar],
        mut f: impl FnMut(&SqlRow<'_>) -> Result<T, StorageError>,
    ) -> Result<Vec<T>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_engine_error)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(map_engine_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_engine_error)? {
            out.push(f(&SqlRow { inner: row })?);
        }
        Ok(out)
    }

    /// Stream every row of a query through the closure without collecting.
    pub fn for_each_row(
        &self,
        sql: &str,
        params: &[Scalar],
        mut f: impl FnMut(&SqlRow<'_>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(map_engine_error)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(map_engine_error)?;
        while let Some(row) = rows.next().map_err(map_engine_error)? {
            f(&SqlRow { inner: row })?;
        }
        Ok(())
    }

    pub(crate) fn begin_deferred(&self) -> Result<(), StorageError> {
        self.execute_batch("BEGIN DEFERRED")
    }

    pub(crate) fn begin_immediate(&self) -> Result<(), StorageError> {
        self.execute_batch("BEGIN IMMEDIATE")
    }

    pub(crate) fn commit(&self) -> Result<(), StorageError> {
        self.execute_batch("COMMIT")
    }

    pub(crate) fn rollback(&self) -> Result<(), StorageError> {
        self.execute_batch("ROLLBACK")
    }
}

/// A borrowed result row. Valid only inside the query closure.
pub struct SqlRow<'a> {
    inner: &'a rusqlite::Row<'a>,
}

impl SqlRow<'_> {
    pub fn i64(&self, idx: usize) -> Result<i64, StorageError> {
        self.inner.get(idx).map_err(map_engine_error)
    }

    pub fn u64(&self, idx: usize) -> Result<u64, StorageError> {
        self.i64(idx).map(|v| v as u64)
    }

    pub fn text(&self, idx: usize) -> Result<String, StorageError> {
        self.inner.get(idx).map_err(map_engine_error)
    }

    pub fn blob(&self, idx: usize) -> Result<Vec<u8>, StorageError> {
        self.inner.get(idx).map_err(map_engine_error)
    }

    pub fn scalar(&self, idx: usize) -> Result<Scalar, StorageError> {
        self.inner
            .get::<_, rusqlite::types::Value>(idx)
            .map(Scalar::from)
            .map_err(map_engine_error)
    }
}

/// Map an engine error into the storage error taxonomy.
fn map_engine_error(e: rusqlite::Error) -> StorageError {
    use rusqlite::ErrorCode;

    match &e {
        rusqlite::Error::SqliteFailure(code, message) => {
            let detail = message
                .clone()
                .unwrap_or_else(|| code.to_string());
            match code.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageError::Busy,
                ErrorCode::ConstraintViolation => StorageError::Constraint(detail),
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    StorageError::Corruption(detail)
                }
                _ => StorageError::Engine(detail),
            }
        }
        _ => StorageError::Engine(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_session() -> (SqlSession, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let session = SqlSession::open(&dir.path().join("test.db"), Duration::from_secs(1)).unwrap();
        (session, dir)
    }

    #[test]
    fn test_execute_and_query_row() {
        let (session, _dir) = open_session();
        session
            .execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY, v INTEGER NOT NULL)")
            .unwrap();
        session
            .execute(
                "INSERT INTO t (k, v) VALUES (?, ?)",
                &[Scalar::from("a"), Scalar::from(7i64)],
            )
            .unwrap();

        let v = session
            .query_row("SELECT v FROM t WHERE k = ?", &[Scalar::from("a")], |row| {
                row.i64(0)
            })
            .unwrap();
        assert_eq!(v, Some(7));

        let missing = session
            .query_row("SELECT v FROM t WHERE k = ?", &[Scalar::from("b")], |row| {
                row.i64(0)
            })
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_query_map_collects_all_rows() {
        let (session, _dir) = open_session();
        session
            .execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY)")
            .unwrap();
        for k in ["x", "y", "z"] {
            session
                .execute("INSERT INTO t (k) VALUES (?)", &[Scalar::from(k)])
                .unwrap();
        }
        let keys = session
            .query_map("SELECT k FROM t ORDER BY k", &[], |row| row.text(0))
            .unwrap();
        assert_eq!(keys, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_constraint_violation_maps_to_constraint() {
        let (session, _dir) = open_session();
        session
            .execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY)")
            .unwrap();
        session
            .execute("INSERT INTO t (k) VALUES (?)", &[Scalar::from("a")])
            .unwrap();
        let err = session
            .execute("INSERT INTO t (k) VALUES (?)", &[Scalar::from("a")])
            .unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[test]
    fn test_transaction_rollback_discards_writes() {
        let (session, _dir) = open_session();
        session
            .execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY)")
            .unwrap();
        session.begin_immediate().unwrap();
        session
            .execute("INSERT INTO t (k) VALUES (?)", &[Scalar::from("a")])
            .unwrap();
        session.rollback().unwrap();

        let count = session
            .query_row("SELECT COUNT(*) FROM t", &[], |row| row.i64(0))
            .unwrap();
        assert_eq!(count, Some(0));
    }

    #[test]
    fn test_blob_round_trip() {
        let (session, _dir) = open_session();
        session
            .execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY, v BLOB NOT NULL)")
            .unwrap();
        let payload = vec![0u8, 1, 2, 255];
        session
            .execute(
                "INSERT INTO t (k, v) VALUES (?, ?)",
                &[Scalar::from("a"), Scalar::Blob(payload.clone())],
            )
            .unwrap();
        let read = session
            .query_row("SELECT v FROM t WHERE k = ?", &[Scalar::from("a")], |row| {
                row.blob(0)
            })
            .unwrap();
        assert_eq!(read, Some(payload));
    }
}
