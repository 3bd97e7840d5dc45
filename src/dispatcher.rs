//! C5 — Query dispatcher / mini-transaction coordinator.
//!
//! The per-statement pipeline: classify, open a fresh analytical
//! transaction, recover the right state into it (schema replay or view
//! reconstruction), execute the statement, emit the corresponding log
//! event for mutating statements, and finally resolve the transaction.
//! Statements are serialised by a single session-wide lock, since the
//! shared in-memory session's schema/view state is per-statement derived
//! state that would otherwise race across concurrent requests (spec.md §5).

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::classify::{self, Classified, Operation};
use crate::engine::{Engine, QueryResult, Transaction};
use crate::error::{EngineError, EngineResult};
use crate::log_store::LogStore;
use crate::storage::Storage;
use crate::vacuum;
use crate::view;

pub struct Dispatcher {
    engine: Arc<dyn Engine>,
    log_store: Arc<LogStore>,
    storage: Arc<dyn Storage>,
    /// Acquired for the full duration of one statement's recovery, execution
    /// and log emission; released only once the transaction is resolved.
    session_lock: AsyncMutex<()>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn Engine>, log_store: Arc<LogStore>, storage: Arc<dyn Storage>) -> Self {
        Self { engine, log_store, storage, session_lock: AsyncMutex::new(()) }
    }

    pub fn classify(&self, raw_sql: &str) -> Classified {
        classify::classify(raw_sql)
    }

    /// Run the full body as one or more statements. When `query_splitting`
    /// is enabled, the body is split on top-level `;` and each non-empty
    /// statement runs the full pipeline in order; the response returned is
    /// that of the last statement, and the batch stops at the first error
    /// (spec.md §4.5, §7).
    pub async fn handle_query(&self, body: &str, query_splitting: bool) -> EngineResult<QueryResult> {
        if !query_splitting {
            return self.handle_statement(body).await;
        }
        let statements = split_statements(body);
        let mut last = QueryResult::default();
        for stmt in statements {
            last = self.handle_statement(&stmt).await?;
        }
        Ok(last)
    }

    /// Run exactly one statement end to end.
    pub async fn handle_statement(&self, raw_sql: &str) -> EngineResult<QueryResult> {
        let classified = classify::classify(raw_sql);
        let _guard = self.session_lock.lock().await;

        let tx = self.engine.begin()?;

        let exec_outcome = self.run_statement(&classified, raw_sql, tx.as_ref()).await;
        let outcome = match exec_outcome {
            Ok(result) => self.emit_log(&classified, tx.as_ref(), raw_sql).await.map(|()| result),
            Err(e) => Err(e),
        };

        // The in-memory session is derived state: rolling it back loses
        // nothing durable. The real commit already happened in the log
        // database and, for inserts, the Parquet file (spec.md §4.5 step 6).
        let _ = tx.rollback();
        outcome
    }

    async fn run_statement(
        &self,
        classified: &Classified,
        raw_sql: &str,
        tx: &dyn Transaction,
    ) -> EngineResult<QueryResult> {
        let secret = self.storage.engine_secret("icebase_s3");
        if !secret.is_empty() {
            tx.exec(&secret)?;
        }

        let log = match &classified.table {
            Some(t) => Some(self.log_store.get_or_create(t)?),
            None => None,
        };

        match classified.operation {
            Operation::CreateTable | Operation::Insert => {
                if let Some(l) = &log {
                    l.replay_schema(tx)?;
                }
            }
            Operation::Select | Operation::Vacuum => {
                if let (Some(l), Some(t)) = (&log, &classified.table) {
                    view::build_view(l, tx, t)?;
                }
            }
            Operation::Other => {}
        }

        match classified.operation {
            Operation::Vacuum => {
                let t = classified
                    .table
                    .as_ref()
                    .ok_or_else(|| EngineError::parse("VACUUM requires a table name"))?;
                let l = log.as_ref().ok_or_else(|| EngineError::internal("missing log handle for vacuum"))?;
                vacuum::merge(l, tx, t).await?;
                Ok(QueryResult::default())
            }
            _ => tx.query(raw_sql),
        }
    }

    async fn emit_log(&self, classified: &Classified, tx: &dyn Transaction, raw_sql: &str) -> EngineResult<()> {
        match classified.operation {
            Operation::CreateTable => {
                if let Some(t) = &classified.table {
                    let log = self.log_store.get_or_create(t)?;
                    log.log_ddl(raw_sql)?;
                    debug!(target: "icebase::dispatcher", "logged DDL for table '{}'", t);
                }
            }
            Operation::Insert => {
                if let Some(t) = &classified.table {
                    let log = self.log_store.get_or_create(t)?;
                    let id = log.insert(tx, t).await?;
                    debug!(target: "icebase::dispatcher", "logged insert for table '{}' id={}", t, id);
                }
            }
            Operation::Select | Operation::Vacuum | Operation::Other => {}
        }
        Ok(())
    }
}

/// Split on top-level `;`, skipping a `-- ...` line comment found at a split
/// boundary. Tracks single- and double-quote state while scanning so a `;`
/// inside a string literal or quoted identifier is not mistaken for a
/// statement boundary (spec.md §4.5's "at the top level"); this is still a
/// simple toggle, not a full SQL tokenizer — it does not understand escaped
/// quotes (`''` inside a literal), matching the classifier's own
/// keyword-only scope.
pub fn split_statements(body: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    for ch in body.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' if !in_single && !in_double => {
                statements.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }
    statements
        .into_iter()
        .map(|chunk| classify::strip_leading_noise(&chunk).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
