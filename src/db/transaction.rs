//! Backend-specific transactions held by a session.

use crate::db::params::{QueryParam, bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::{DbPool, Engine};
use crate::error::{DbError, DbResult};
use crate::models::{BindKey, DatabaseType};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::{debug, info};

/// Bind every parameter to a scalar query; expands per backend.
macro_rules! bind_scalar_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(v) => query.bind(*v),
                QueryParam::Int(v) => query.bind(*v),
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::String(v) => query.bind(v.as_str()),
            };
        }
        query
    }};
}

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

impl DbTransaction {
    /// Begin a transaction on the engine's pool.
    pub async fn begin(engine: &Engine) -> DbResult<Self> {
        let tx = match engine.pool() {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await?),
            DbPool::Postgres(pool) => DbTransaction::Postgres(pool.begin().await?),
            DbPool::SQLite(pool) => DbTransaction::SQLite(pool.begin().await?),
        };
        debug!(bind = %engine.bind(), "Transaction started");
        Ok(tx)
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let rows_affected = match self {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.execute(&mut **tx).await?.rows_affected()
            }
        };
        Ok(rows_affected)
    }

    /// Fetch the first column of the first row as an integer.
    pub async fn fetch_scalar(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Option<i64>> {
        let value = match self {
            DbTransaction::MySql(tx) => {
                bind_scalar_params!(sqlx::query_scalar::<_, i64>(sql), params)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            DbTransaction::Postgres(tx) => {
                bind_scalar_params!(sqlx::query_scalar::<_, i64>(sql), params)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            DbTransaction::SQLite(tx) => {
                bind_scalar_params!(sqlx::query_scalar::<_, i64>(sql), params)
                    .fetch_optional(&mut **tx)
                    .await?
            }
        };
        Ok(value)
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}

/// Log a statement the way the engine's echo flag asks for.
pub(crate) fn log_statement(bind: &BindKey, echo: bool, sql: &str) {
    if echo {
        info!(target: "sqlx_binds::echo", bind = %bind, sql = %sql, "Executing statement");
    } else {
        debug!(bind = %bind, sql = %sql, "Executing statement");
    }
}
