//! The unit of work.
//!
//! A [`Session`] routes each statement to the engine owning its table and lazily
//! begins one transaction per engine. Nothing is committed until [`Session::commit`].

use crate::db::pool::Engine;
use crate::db::state::DatabaseState;
use crate::db::transaction::{DbTransaction, log_statement};
use crate::db::QueryParam;
use crate::error::{DbError, DbResult};
use crate::models::{BindKey, MetaData, Table};
use crate::session::ScopeId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A statement executed by a session, kept when query recording is on.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedQuery {
    pub statement: String,
    pub parameters: Vec<QueryParam>,
    pub bind: BindKey,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug)]
struct OpenTransaction {
    /// The engine the transaction was begun on. A rebuilt engine for the same
    /// bind gets its own transaction.
    engine: Engine,
    tx: DbTransaction,
}

#[derive(Debug)]
pub struct Session {
    scope: ScopeId,
    state: Arc<DatabaseState>,
    engine: Engine,
    /// Table name to engine, resolved when the session was created
    binds: HashMap<String, Engine>,
    transactions: Mutex<Vec<OpenTransaction>>,
    record_queries: bool,
    queries: Mutex<Vec<RecordedQuery>>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Build a session for `scope`, resolving the primary engine and the table routing map.
    pub async fn new(
        scope: ScopeId,
        state: Arc<DatabaseState>,
        metadata: &MetaData,
    ) -> DbResult<Self> {
        let engine = state.get_engine(&BindKey::Primary).await?;
        let binds = state.get_binds(metadata).await?;
        let record_queries = state.settings()?.record_queries;
        Ok(Self {
            scope,
            state,
            engine,
            binds,
            transactions: Mutex::new(Vec::new()),
            record_queries,
            queries: Mutex::new(Vec::new()),
            created_at: Utc::now(),
        })
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The session's default engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The engine a statement against `table` runs on.
    ///
    /// A table with a named bind key goes through that bind's connector, so a rebuilt
    /// engine is picked up. Anything else uses the routing map, then the default engine.
    pub async fn get_bind(&self, table: Option<&Table>) -> DbResult<Engine> {
        if let Some(table) = table {
            if !table.bind_key().is_primary() {
                return self.state.get_engine(table.bind_key()).await;
            }
            if let Some(engine) = self.binds.get(table.name()) {
                return Ok(engine.clone());
            }
        }
        Ok(self.engine.clone())
    }

    /// Execute a statement against the engine owning `table`.
    pub async fn execute(&self, table: &Table, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let engine = self.get_bind(Some(table)).await?;
        self.execute_on(&engine, sql, params).await
    }

    /// Execute a statement against the default engine.
    pub async fn execute_default(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let engine = self.engine.clone();
        self.execute_on(&engine, sql, params).await
    }

    /// Fetch an integer scalar from the engine owning `table`, or the default engine.
    pub async fn fetch_scalar(
        &self,
        table: Option<&Table>,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<i64>> {
        let engine = self.get_bind(table).await?;
        let started = Instant::now();
        let started_at = Utc::now();
        log_statement(engine.bind(), engine.echo(), sql);

        let mut transactions = self.transactions.lock().await;
        let tx = Self::transaction_for(&mut transactions, &engine).await?;
        let value = tx.fetch_scalar(sql, params).await?;
        drop(transactions);

        self.record(&engine, sql, params, started_at, started.elapsed())
            .await;
        Ok(value)
    }

    async fn execute_on(&self, engine: &Engine, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let started = Instant::now();
        let started_at = Utc::now();
        log_statement(engine.bind(), engine.echo(), sql);

        let mut transactions = self.transactions.lock().await;
        let tx = Self::transaction_for(&mut transactions, engine).await?;
        let rows = tx.execute(sql, params).await?;
        drop(transactions);

        self.record(engine, sql, params, started_at, started.elapsed())
            .await;
        Ok(rows)
    }

    async fn transaction_for<'a>(
        transactions: &'a mut Vec<OpenTransaction>,
        engine: &Engine,
    ) -> DbResult<&'a mut DbTransaction> {
        let index = match transactions.iter().position(|t| t.engine.ptr_eq(engine)) {
            Some(index) => index,
            None => {
                let tx = DbTransaction::begin(engine).await?;
                transactions.push(OpenTransaction {
                    engine: engine.clone(),
                    tx,
                });
                transactions.len() - 1
            }
        };
        Ok(&mut transactions[index].tx)
    }

    async fn record(
        &self,
        engine: &Engine,
        sql: &str,
        params: &[QueryParam],
        started_at: DateTime<Utc>,
        duration: Duration,
    ) {
        if !self.record_queries {
            return;
        }
        self.queries.lock().await.push(RecordedQuery {
            statement: sql.to_string(),
            parameters: params.to_vec(),
            bind: engine.bind().clone(),
            started_at,
            duration,
        });
    }

    /// True if any transaction is open.
    pub async fn has_pending(&self) -> bool {
        !self.transactions.lock().await.is_empty()
    }

    pub async fn open_transactions(&self) -> usize {
        self.transactions.lock().await.len()
    }

    /// Commit every open transaction, primary first.
    ///
    /// If one commit fails the remaining transactions are rolled back and the
    /// error is returned.
    pub async fn commit(&self) -> DbResult<()> {
        let mut open = std::mem::take(&mut *self.transactions.lock().await);
        open.sort_by(|a, b| a.engine.bind().cmp(b.engine.bind()));

        let mut remaining = open.into_iter();
        while let Some(OpenTransaction { engine, tx }) = remaining.next() {
            if let Err(e) = tx.commit().await {
                warn!(scope = %self.scope, bind = %engine.bind(), error = %e, "Commit failed");
                for OpenTransaction { engine, tx } in remaining {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(bind = %engine.bind(), error = %rollback_err, "Rollback after failed commit failed");
                    }
                }
                return Err(e);
            }
            debug!(scope = %self.scope, bind = %engine.bind(), "Committed");
        }
        Ok(())
    }

    /// Roll back every open transaction. All are attempted; the first error is returned.
    pub async fn rollback(&self) -> DbResult<()> {
        let open = std::mem::take(&mut *self.transactions.lock().await);
        let mut first_err: Option<DbError> = None;
        for OpenTransaction { engine, tx } in open {
            match tx.rollback().await {
                Ok(()) => debug!(scope = %self.scope, bind = %engine.bind(), "Rolled back"),
                Err(e) => {
                    warn!(scope = %self.scope, bind = %engine.bind(), error = %e, "Rollback failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Discard pending work. The session stays usable.
    pub async fn close(&self) -> DbResult<()> {
        self.rollback().await
    }

    /// Statements recorded so far. Empty unless query recording is on.
    pub async fn recorded_queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().await.clone()
    }
}
