//! DuckDB-backed `Engine`. One `duckdb::Connection` is shared by the whole
//! process behind a `parking_lot::Mutex`; the dispatcher's statement-level
//! lock (spec.md §5) is what actually serialises access; the mutex here is a
//! last line of defence rather than the primary synchronisation mechanism.

use std::sync::Arc;

use duckdb::Connection;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

use super::{ColumnMeta, Engine, QueryResult, Transaction};

pub struct DuckDbEngine {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbEngine {
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(EngineError::from)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// `-install-extensions` / `-load-extensions`: `httpfs` is the only
    /// extension this crate's SQL surface needs, for `s3://` read/write paths.
    pub fn install_extensions(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("INSTALL httpfs;")?;
        debug!(target: "icebase::engine", "installed httpfs extension");
        Ok(())
    }

    pub fn load_extensions(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("LOAD httpfs;")?;
        debug!(target: "icebase::engine", "loaded httpfs extension");
        Ok(())
    }
}

impl Engine for DuckDbEngine {
    fn begin(&self) -> EngineResult<Box<dyn Transaction + '_>> {
        let guard = self.conn.lock();
        guard.execute_batch("BEGIN TRANSACTION;")?;
        Ok(Box::new(DuckDbTransaction { guard: Some(guard), finished: false }))
    }

    fn uuidv7(&self) -> EngineResult<Uuid> {
        let conn = self.conn.lock();
        let id: String = conn.query_row("SELECT uuidv7()::VARCHAR", [], |row| row.get(0))?;
        Uuid::parse_str(&id).map_err(|e| EngineError::internal(e.to_string()))
    }
}

struct DuckDbTransaction<'a> {
    guard: Option<MutexGuard<'a, Connection>>,
    finished: bool,
}

impl<'a> DuckDbTransaction<'a> {
    fn conn(&self) -> &Connection {
        self.guard.as_deref().expect("transaction already resolved")
    }
}

impl<'a> Transaction for DuckDbTransaction<'a> {
    fn exec(&self, sql: &str) -> EngineResult<()> {
        self.conn().execute_batch(sql)?;
        Ok(())
    }

    fn uuidv7(&self) -> EngineResult<Uuid> {
        let id: String = self.conn().query_row("SELECT uuidv7()::VARCHAR", [], |row| row.get(0))?;
        Uuid::parse_str(&id).map_err(|e| EngineError::internal(e.to_string()))
    }

    fn query(&self, sql: &str) -> EngineResult<QueryResult> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let columns: Vec<ColumnMeta> = (0..column_count)
            .map(|i| ColumnMeta {
                name: stmt.column_name(i).unwrap_or_default().to_string(),
                type_name: stmt.column_type(i).to_string(),
            })
            .collect();

        let mut rows_out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut out_row = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: duckdb::types::Value = row.get(i)?;
                out_row.push(stringify_value(&value));
            }
            rows_out.push(out_row);
        }
        Ok(QueryResult { columns, rows: rows_out })
    }

    fn commit(mut self: Box<Self>) -> EngineResult<()> {
        let guard = self.guard.take().expect("transaction already resolved");
        guard.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> EngineResult<()> {
        let guard = self.guard.take().expect("transaction already resolved");
        guard.execute_batch("ROLLBACK;")?;
        self.finished = true;
        Ok(())
    }
}

impl<'a> Drop for DuckDbTransaction<'a> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(guard) = self.guard.take() {
                let _ = guard.execute_batch("ROLLBACK;");
            }
        }
    }
}

/// Stringify one cell per spec.md §6: `NULL` for null, canonical hyphenated
/// form for UUIDs, the engine's default string form otherwise.
fn stringify_value(v: &duckdb::types::Value) -> String {
    use duckdb::types::Value;
    match v {
        Value::Null => "NULL".to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::TinyInt(n) => n.to_string(),
        Value::SmallInt(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::HugeInt(n) => n.to_string(),
        Value::UTinyInt(n) => n.to_string(),
        Value::USmallInt(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::UBigInt(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Double(n) => n.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => hex::encode(b),
        other => format!("{:?}", other),
    }
}
