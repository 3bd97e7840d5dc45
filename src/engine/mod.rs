//! C7 — the embedded analytical engine capability.
//!
//! Per spec.md §1/§9, the embedded SQL engine's internals (columnar
//! execution, the Parquet codec, extension loading) are out of scope: this
//! module only describes the capability surface the rest of the crate
//! relies on — execute SQL in a transaction, `COPY ... TO ... (FORMAT
//! PARQUET)`, create a view over `read_parquet([...])`, and evaluate
//! `uuidv7()` — and one concrete backing (`duckdb`), since DuckDB's own SQL
//! surface is exactly this contract.

mod duckdb_engine;

pub use duckdb_engine::DuckDbEngine;

use crate::error::EngineResult;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    /// Every cell stringified per spec.md §6: `"NULL"` for null, canonical
    /// hyphenated form for UUIDs, the engine's default string form otherwise.
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A single short-lived transaction bracket on the shared in-memory session.
pub trait Transaction {
    fn exec(&self, sql: &str) -> EngineResult<()>;
    fn query(&self, sql: &str) -> EngineResult<QueryResult>;
    /// Mint a clock-ordered id on the connection this transaction already
    /// holds. Callers that have a `Transaction` in hand must use this
    /// instead of `Engine::uuidv7` — the engine's own `uuidv7` takes the
    /// same connection lock `begin` is still holding for the life of this
    /// transaction, so calling it while a transaction is open deadlocks.
    fn uuidv7(&self) -> EngineResult<Uuid>;
    fn commit(self: Box<Self>) -> EngineResult<()>;
    fn rollback(self: Box<Self>) -> EngineResult<()>;
}

/// The shared, process-wide analytical session. Every statement opens its
/// own `Transaction`; the session itself holds no stable data between
/// statements (spec.md §3).
pub trait Engine: Send + Sync {
    fn begin(&self) -> EngineResult<Box<dyn Transaction + '_>>;
    /// Convenience wrapper around the engine's `uuidv7()` SQL function, so
    /// every identifier this crate mints shares one clock-ordered source.
    fn uuidv7(&self) -> EngineResult<Uuid>;
}
