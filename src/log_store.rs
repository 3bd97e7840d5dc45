//! C3 — Log store.
//!
//! Each table owns a `Log`: a single DuckDB file (`log.db`) holding the
//! table's `schema_log` and `insert_log` (spec.md §3), opened lazily on
//! first reference and exclusively owned thereafter. `Log`s are kept in a
//! process-wide map keyed by table name, behind a lock-guarded
//! get-or-create, matching the teacher's `AppState` session-map pattern.
//!
//! `log.db` is always a local DuckDB file even when the data plane is
//! S3-backed: DuckDB has no writable remote catalog-file story, so the
//! log database's durability has to come from local disk regardless of
//! where Parquet data files land. See DESIGN.md for the Open Question this
//! resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use duckdb::{params, Connection};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::engine::Transaction;
use crate::error::{EngineError, EngineResult};
use crate::storage::Storage;

fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn now_unix_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One live (or tombstoned) data-file record from `insert_log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertLogRow {
    pub id: String,
    pub partition: String,
    pub tombstoned_unix_time: i64,
    pub size: i64,
}

pub struct Log {
    table: String,
    log_db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
    storage: Arc<dyn Storage>,
}

impl Log {
    fn open(table: &str, log_root: &Path, storage: Arc<dyn Storage>) -> EngineResult<Self> {
        let dir = log_root.join(table).join("log");
        std::fs::create_dir_all(&dir)?;
        let log_db_path = dir.join("log.db");
        let conn = Connection::open(&log_db_path).map_err(EngineError::from)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_log (
                 ts BIGINT PRIMARY KEY,
                 raw_query VARCHAR NOT NULL
             );
             CREATE TABLE IF NOT EXISTS insert_log (
                 id VARCHAR PRIMARY KEY,
                 partition VARCHAR NOT NULL DEFAULT '',
                 tombstoned_unix_time BIGINT NOT NULL DEFAULT 0,
                 size BIGINT NOT NULL DEFAULT 0
             );",
        )
        .map_err(EngineError::from)?;
        debug!(target: "icebase::log", "opened log.db for table='{}' at {:?}", table, log_db_path);
        Ok(Self { table: table.to_string(), log_db_path, conn: Mutex::new(Some(conn)), storage })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> EngineResult<R>) -> EngineResult<R> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(EngineError::internal(format!("log for table '{}' is closed", self.table))),
        }
    }

    /// Append one DDL event. Called by the dispatcher inside the user's
    /// analytical transaction, but writes to the log database, not to the
    /// user session — failure here aborts that transaction in the caller.
    pub fn log_ddl(&self, raw_sql: &str) -> EngineResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schema_log (ts, raw_query) VALUES (?, ?)",
                params![now_unix_ms(), raw_sql],
            )
            .map_err(EngineError::from)?;
            Ok(())
        })
    }

    /// Replay `schema_log` in ascending timestamp order against `tx`.
    /// Idempotent against an empty `tx`.
    pub fn replay_schema(&self, tx: &dyn Transaction) -> EngineResult<()> {
        let statements = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT raw_query FROM schema_log ORDER BY ts ASC").map_err(EngineError::from)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(EngineError::from)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(EngineError::from)?);
            }
            Ok(out)
        })?;
        for raw in statements {
            tx.exec(&raw).map_err(|e| EngineError::schema_replay(e.to_string()))?;
        }
        Ok(())
    }

    /// The live set L(T): ids with tombstone=0, ordered newest-first (spec.md §4.4).
    pub fn live_ids(&self) -> EngineResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM insert_log WHERE tombstoned_unix_time = 0 ORDER BY id DESC")
                .map_err(EngineError::from)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(EngineError::from)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(EngineError::from)?);
            }
            Ok(out)
        })
    }

    pub fn all_rows(&self) -> EngineResult<Vec<InsertLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, partition, tombstoned_unix_time, size FROM insert_log ORDER BY id DESC")
                .map_err(EngineError::from)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(InsertLogRow {
                        id: row.get(0)?,
                        partition: row.get(1)?,
                        tombstoned_unix_time: row.get(2)?,
                        size: row.get(3)?,
                    })
                })
                .map_err(EngineError::from)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(EngineError::from)?);
            }
            Ok(out)
        })
    }

    fn data_rel_path(&self, id: &str) -> String {
        format!("{}/data/{}.parquet", self.table, id)
    }

    /// Synchronous half of an `INSERT`: mints the file id from `tx`'s own
    /// connection (not `Engine::uuidv7`, which would re-lock the connection
    /// `tx` is already holding and deadlock) and writes the new Parquet
    /// file. Nothing here awaits, so the caller can run this while `tx` is
    /// open without ever holding its non-`Send` guard across an `.await`.
    pub fn insert_prepare(&self, tx: &dyn Transaction, table: &str) -> EngineResult<(String, String)> {
        let id = tx.uuidv7()?.to_string();
        let rel_path = self.data_rel_path(&id);
        let write_uri = self.storage.write_path(&rel_path);
        tx.exec(&format!("COPY {} TO '{}' (FORMAT PARQUET)", table, write_uri))?;
        Ok((id, rel_path))
    }

    /// Async half: stat the file `insert_prepare` wrote and commit its
    /// `insert_log` row — so a failure mid-write never leaves an orphan row
    /// pointing at a file that was never created (spec.md §4.3's Open
    /// Question, resolved here as "file-then-row"; see DESIGN.md). Must run
    /// after `tx` has been resolved: nothing here touches the analytical
    /// engine's connection, only `storage` and this log's own `log.db`.
    pub async fn insert_finalize(&self, id: &str, rel_path: &str) -> EngineResult<()> {
        let stat = self.storage.stat(rel_path).await?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO insert_log (id, partition, tombstoned_unix_time, size) VALUES (?, '', 0, ?)",
                params![id, stat.size as i64],
            )
            .map_err(EngineError::from)?;
            Ok(())
        })?;
        debug!(target: "icebase::log", "table='{}' insert committed id={} size={}", self.table, id, stat.size);
        Ok(())
    }

    /// Commit a vacuum: insert the merged file's row and tombstone every
    /// id that was live at merge time, as a single `log.db` transaction.
    pub fn commit_merge(&self, new_id: &str, new_size: u64, superseded: &[String]) -> EngineResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN TRANSACTION;").map_err(EngineError::from)?;
            let result = (|| -> EngineResult<()> {
                conn.execute(
                    "INSERT INTO insert_log (id, partition, tombstoned_unix_time, size) VALUES (?, '', 0, ?)",
                    params![new_id, new_size as i64],
                )
                .map_err(EngineError::from)?;
                let now = now_unix_secs();
                for old_id in superseded {
                    conn.execute(
                        "UPDATE insert_log SET tombstoned_unix_time = ? WHERE id = ? AND tombstoned_unix_time = 0",
                        params![now, old_id],
                    )
                    .map_err(EngineError::from)?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT;").map_err(EngineError::from),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK;");
                    return Err(e);
                }
            }
        })
    }

    /// Combined insert path used by callers that don't need to resolve `tx`
    /// between the Parquet write and the `insert_log` commit: runs
    /// `insert_prepare` then immediately awaits `insert_finalize`. The
    /// single-statement session lock already serialises every caller, so
    /// holding `tx` open across the `stat` call here costs nothing in
    /// practice; see those two methods for the ordering invariant this
    /// preserves.
    pub async fn insert(&self, tx: &dyn Transaction, table: &str) -> EngineResult<String> {
        let (id, rel_path) = self.insert_prepare(tx, table)?;
        self.insert_finalize(&id, &rel_path).await?;
        Ok(id)
    }

    pub fn read_path_for(&self, id: &str) -> String {
        self.storage.read_path(&self.data_rel_path(id))
    }

    /// A URI the analytical engine can `COPY ... TO` directly, for an
    /// arbitrary path relative to the table's storage root. Used by the
    /// vacuum/merge engine to write its compacted output file.
    pub fn storage_write_path(&self, rel_path: &str) -> String {
        self.storage.write_path(rel_path)
    }

    pub async fn storage_stat_size(&self, rel_path: &str) -> EngineResult<u64> {
        Ok(self.storage.stat(rel_path).await?.size)
    }

    /// Idempotent close of the log database connection.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        *guard = None;
    }

    /// Close and delete every file under `<root>/<table>/`.
    pub async fn destroy(&self) -> EngineResult<()> {
        self.close();
        let _ = std::fs::remove_file(&self.log_db_path);
        if let Some(dir) = self.log_db_path.parent() {
            let _ = std::fs::remove_dir(dir);
        }
        for rel in self.storage.list(&format!("{}/data", self.table)).await? {
            self.storage.delete(&rel).await?;
        }
        Ok(())
    }
}

/// Process-wide map from table name to `Log`, lazily created on first
/// reference, at most one `Log` per table per process.
pub struct LogStore {
    log_root: PathBuf,
    storage: Arc<dyn Storage>,
    logs: RwLock<HashMap<String, Arc<Log>>>,
}

impl LogStore {
    pub fn new(log_root: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self { log_root: log_root.into(), storage, logs: RwLock::new(HashMap::new()) }
    }

    /// Get-or-create the `Log` for `table`, under a single map-level lock.
    pub fn get_or_create(&self, table: &str) -> EngineResult<Arc<Log>> {
        if let Some(log) = self.logs.read().get(table) {
            return Ok(log.clone());
        }
        let mut logs = self.logs.write();
        if let Some(log) = logs.get(table) {
            return Ok(log.clone());
        }
        let log = Arc::new(Log::open(table, &self.log_root, self.storage.clone())?);
        logs.insert(table.to_string(), log.clone());
        Ok(log)
    }

    pub async fn destroy(&self, table: &str) -> EngineResult<()> {
        let log = self.get_or_create(table)?;
        log.destroy().await?;
        self.logs.write().remove(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DuckDbEngine, Engine as _};
    use crate::storage::FilesystemStorage;

    #[tokio::test]
    async fn schema_replay_is_idempotent_against_empty_tx() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
        let store = LogStore::new(dir.path(), storage);
        let log = store.get_or_create("t").unwrap();
        log.log_ddl("CREATE TABLE t (id BIGINT, name VARCHAR)").unwrap();

        let engine = DuckDbEngine::open_in_memory().unwrap();
        let tx = engine.begin().unwrap();
        log.replay_schema(tx.as_ref()).unwrap();
        let result = tx.query("SELECT column_name FROM information_schema.columns WHERE table_name = 't'").unwrap();
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn get_or_create_returns_the_same_log_for_repeat_calls() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
        let store = LogStore::new(dir.path(), storage);
        let a = store.get_or_create("t").unwrap();
        let b = store.get_or_create("t").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn live_ids_excludes_tombstoned_rows() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
        let store = LogStore::new(dir.path(), storage);
        let log = store.get_or_create("t").unwrap();
        log.commit_merge("a", 10, &[]).unwrap();
        log.commit_merge("b", 20, &[]).unwrap();
        assert_eq!(log.live_ids().unwrap(), vec!["b".to_string(), "a".to_string()]);
        log.commit_merge("c", 30, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(log.live_ids().unwrap(), vec!["c".to_string()]);
    }
}
