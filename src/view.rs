//! C4 — Table view builder.
//!
//! Materialises a read-only view of a table inside the caller's
//! transaction: `SELECT * FROM read_parquet([...])` over the live file set,
//! ordered newest-first, with the schema learned by replaying `schema_log`.

use crate::engine::Transaction;
use crate::error::{EngineError, EngineResult};
use crate::log_store::Log;

/// Build (or rebuild) the read view for `table` inside `tx`. If the live set
/// is empty, the view still exists and yields zero rows with the correct
/// schema.
pub fn build_view(log: &Log, tx: &dyn Transaction, table: &str) -> EngineResult<()> {
    let probe = format!("__schema_probe__{}", table);
    // Drop any view left by a prior build_view call in this same transaction
    // (VACUUM's dispatcher-level recovery and its own C6 merge step both call
    // this, per spec.md §4.5/§4.6) before schema replay tries to re-create
    // the real table under `table`'s name.
    tx.exec(&format!("DROP VIEW IF EXISTS \"{}\"", table))?;
    tx.exec(&format!("DROP TABLE IF EXISTS \"{}\"", probe))?;

    // (a) Replay schema into a private scope to learn the column list.
    log.replay_schema(tx)?;
    tx.exec(&format!("ALTER TABLE \"{}\" RENAME TO \"{}\"", table, probe))?;

    let columns_result = tx.query(&format!(
        "SELECT column_name FROM information_schema.columns WHERE table_name = '{}' ORDER BY ordinal_position",
        probe
    ))?;
    if columns_result.row_count() == 0 {
        return Err(EngineError::schema_replay(format!("table '{}' has no columns after schema replay", table)));
    }
    let cols: Vec<String> = columns_result.rows.iter().map(|r| format!("\"{}\"", r[0])).collect();
    let col_list = cols.join(", ");

    let live_ids = log.live_ids()?;

    // (b) Create (or replace) the view over the live set.
    if live_ids.is_empty() {
        tx.exec(&format!(
            "CREATE OR REPLACE VIEW \"{}\" AS SELECT {} FROM \"{}\"",
            table, col_list, probe
        ))?;
    } else {
        let paths: Vec<String> = live_ids.iter().map(|id| format!("'{}'", log.read_path_for(id))).collect();
        tx.exec(&format!(
            "CREATE OR REPLACE VIEW \"{}\" AS SELECT {} FROM read_parquet([{}])",
            table,
            col_list,
            paths.join(", ")
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DuckDbEngine, Engine as _};
    use crate::log_store::LogStore;
    use crate::storage::FilesystemStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_live_set_yields_zero_rows_with_correct_schema() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn crate::storage::Storage> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
        let store = LogStore::new(dir.path(), storage);
        let log = store.get_or_create("t").unwrap();
        log.log_ddl("CREATE TABLE t (id BIGINT, name VARCHAR)").unwrap();

        let engine = DuckDbEngine::open_in_memory().unwrap();
        let tx = engine.begin().unwrap();
        build_view(&log, tx.as_ref(), "t").unwrap();
        let result = tx.query("SELECT * FROM t").unwrap();
        assert_eq!(result.row_count(), 0);
        assert_eq!(result.columns.len(), 2);
    }

    /// VACUUM rebuilds the view twice within one transaction (dispatcher
    /// pre-statement recovery, then again inside the merge engine itself,
    /// per spec.md §4.5/§4.6) — the second call must not collide with the
    /// view the first call left behind.
    #[tokio::test]
    async fn build_view_is_safe_to_call_twice_in_the_same_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn crate::storage::Storage> = Arc::new(FilesystemStorage::new(dir.path()).unwrap());
        let store = LogStore::new(dir.path(), storage);
        let log = store.get_or_create("t").unwrap();
        log.log_ddl("CREATE TABLE t (id BIGINT)").unwrap();

        let engine = DuckDbEngine::open_in_memory().unwrap();
        let tx = engine.begin().unwrap();
        build_view(&log, tx.as_ref(), "t").unwrap();
        build_view(&log, tx.as_ref(), "t").unwrap();
        let result = tx.query("SELECT * FROM t").unwrap();
        assert_eq!(result.row_count(), 0);
    }
}
