use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};

/// Internal table holding per-column comments.
pub(crate) const COMMENTS_TABLE: &str = "_sys_column_comments";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
// Virtual machine instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

/// One workspace database: a single writer plus a small pool of read-only
/// connections. WAL mode lets readers see committed snapshots while a write
/// is in progress.
pub struct WorkspaceDb {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    read_pool_size: usize,
    query_timeout: Duration,
}

impl WorkspaceDb {
    pub fn open(path: &Path, read_pool_size: usize, query_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::NotReady(format!("{}: {e}", parent.display())))?;
        }

        let writer = Connection::open(path).map_err(|e| Error::NotReady(e.to_string()))?;
        writer
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::NotReady(e.to_string()))?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {COMMENTS_TABLE} (
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                comment TEXT NOT NULL,
                PRIMARY KEY (table_name, column_name)
            );"
        ))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            readers: Mutex::new(Vec::new()),
            read_pool_size,
            query_timeout,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::NotReady(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(conn)
    }

    /// Runs `f` on a pooled read-only connection under the query deadline.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let pooled = self
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader()?,
        };

        let result = with_deadline(&conn, self.query_timeout, || f(&conn));

        let mut readers = self.readers.lock().unwrap_or_else(|e| e.into_inner());
        if readers.len() < self.read_pool_size {
            readers.push(conn);
        }
        result
    }

    /// Runs `f` on the writer connection under the query deadline. Writes
    /// from all callers are serialized here.
    pub fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.writer();
        let deadline = Instant::now() + self.query_timeout;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = f(&mut conn);
        conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
        result
    }
}

fn with_deadline<T>(conn: &Connection, timeout: Duration, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let deadline = Instant::now() + timeout;
    conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
    let result = f();
    conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn readers_see_committed_writes() {
        let dir = TempDir::new().unwrap();
        let db = WorkspaceDb::open(&dir.path().join("ws/db.sqlite"), 2, Duration::from_secs(5)).unwrap();

        db.write(|conn| {
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn readers_reject_writes() {
        let dir = TempDir::new().unwrap();
        let db = WorkspaceDb::open(&dir.path().join("db.sqlite"), 1, Duration::from_secs(5)).unwrap();
        db.write(|conn| Ok(conn.execute_batch("CREATE TABLE t (a)")?)).unwrap();

        let result = db.read(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", [])
                .map_err(Error::from_tenant_sql)
        });
        assert!(result.is_err());
    }

    #[test]
    fn long_queries_hit_the_deadline() {
        let dir = TempDir::new().unwrap();
        let db = WorkspaceDb::open(&dir.path().join("db.sqlite"), 1, Duration::from_millis(50)).unwrap();

        let result = db.read(|conn| {
            conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map_err(Error::from_tenant_sql)
        });
        assert!(matches!(result, Err(Error::QueryTimeout)));
    }
}
