//! Engine construction.
//!
//! An [`Engine`] is a lazily-connecting, backend-specific sqlx pool plus the options
//! it was built with. Pools are created with `connect_lazy_with`, so building an
//! engine performs no I/O; connections open on first use.

use crate::config::{
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_OVERFLOW, DEFAULT_POOL_SIZE, DEFAULT_POOL_TIMEOUT_SECS,
    MYSQL_DEFAULT_CHARSET, MYSQL_DEFAULT_POOL_RECYCLE_SECS, MYSQL_DEFAULT_POOL_SIZE, PoolOptions,
};
use crate::error::{DbError, DbResult};
use crate::models::{BindKey, DatabaseType, DatabaseUrl, GAE_MYSQL_DRIVER, SQLITE_MEMORY};
use chrono::{DateTime, Utc};
use sqlx::pool::PoolOptions as SqlxPoolOptions;
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgConnectOptions, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Connections currently open (idle or in use).
    pub fn size(&self) -> u32 {
        match self {
            DbPool::MySql(pool) => pool.size(),
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }
}

/// How connections are kept between checkouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolClass {
    /// Bounded queue of reusable connections.
    #[default]
    Queue,
    /// Every connection opens the same shared-cache database, and at least one is
    /// held open for the life of the engine. Keeps in-memory SQLite alive.
    Static,
    /// No reuse: every connection is closed when released.
    Null,
}

/// Options handed to the pool constructor, after pool defaults and driver policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub pool_size: Option<u32>,
    pub pool_timeout_secs: Option<u64>,
    pub pool_recycle_secs: Option<u64>,
    pub max_overflow: Option<u32>,
    pub pool_class: PoolClass,
    pub connect_args: BTreeMap<String, String>,
    /// `Some(false)` when native unicode handling is disabled
    pub use_native_unicode: Option<bool>,
    pub echo: bool,
}

impl EngineOptions {
    /// Copy each pool option that was explicitly configured.
    pub fn apply_pool_defaults(&mut self, pool: &PoolOptions) {
        if let Some(size) = pool.pool_size {
            self.pool_size = Some(size);
        }
        if let Some(timeout) = pool.pool_timeout_secs {
            self.pool_timeout_secs = Some(timeout);
        }
        if let Some(recycle) = pool.pool_recycle_secs {
            self.pool_recycle_secs = Some(recycle);
        }
        if let Some(overflow) = pool.max_overflow {
            self.max_overflow = Some(overflow);
        }
    }

    /// Apply driver-specific policy. May rewrite the URL (MySQL charset).
    pub fn apply_driver_hacks(
        &mut self,
        url: &mut DatabaseUrl,
        use_native_unicode: bool,
    ) -> DbResult<()> {
        match url.backend() {
            DatabaseType::MySQL => {
                url.set_query_default("charset", MYSQL_DEFAULT_CHARSET);
                if url.drivername() != GAE_MYSQL_DRIVER {
                    self.pool_size.get_or_insert(MYSQL_DEFAULT_POOL_SIZE);
                    self.pool_recycle_secs
                        .get_or_insert(MYSQL_DEFAULT_POOL_RECYCLE_SECS);
                }
            }
            DatabaseType::SQLite => {
                if url.is_sqlite_memory() {
                    self.pool_class = PoolClass::Static;
                    self.connect_args
                        .insert("check_same_thread".to_string(), "false".to_string());
                    if self.pool_size == Some(0) {
                        return Err(DbError::incompatible_option(
                            "pool_size",
                            "SQLite in-memory database with an empty pool is not possible due to data loss",
                        ));
                    }
                } else if self.pool_size.unwrap_or(0) == 0 {
                    self.pool_class = PoolClass::Null;
                }
            }
            DatabaseType::PostgreSQL => {}
        }

        if !use_native_unicode {
            self.use_native_unicode = Some(false);
        }
        Ok(())
    }

    /// Upper bound on open connections.
    pub fn max_connections(&self) -> u32 {
        let size = self.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        let overflow = self.max_overflow.unwrap_or(DEFAULT_MAX_OVERFLOW);
        size.saturating_add(overflow).max(1)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs.unwrap_or(DEFAULT_POOL_TIMEOUT_SECS))
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        match self.pool_class {
            PoolClass::Static | PoolClass::Null => None,
            PoolClass::Queue => self
                .pool_recycle_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn min_connections(&self) -> u32 {
        match self.pool_class {
            PoolClass::Static => 1,
            PoolClass::Queue | PoolClass::Null => 0,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.pool_class {
            PoolClass::Queue => Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            PoolClass::Static | PoolClass::Null => None,
        }
    }

    /// False for null pools, whose connections are closed on release.
    pub fn reuses_connections(&self) -> bool {
        self.pool_class != PoolClass::Null
    }

    /// Apply these options to a backend's pool builder.
    fn configure<DB: sqlx::Database>(&self, builder: SqlxPoolOptions<DB>) -> SqlxPoolOptions<DB> {
        let builder = builder
            .min_connections(self.min_connections())
            .max_connections(self.max_connections())
            .acquire_timeout(self.acquire_timeout())
            .idle_timeout(self.idle_timeout())
            .max_lifetime(self.max_lifetime());
        if self.reuses_connections() {
            builder
        } else {
            builder.after_release(|_conn, _meta| Box::pin(async { Ok(false) }))
        }
    }
}

#[derive(Debug)]
struct EngineInner {
    pool: DbPool,
    bind: BindKey,
    url: String,
    options: EngineOptions,
    created_at: DateTime<Utc>,
}

/// A connection pool handle for one bind. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn pool(&self) -> &DbPool {
        &self.inner.pool
    }

    pub fn bind(&self) -> &BindKey {
        &self.inner.bind
    }

    /// Display-safe URL the engine was built from.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn echo(&self) -> bool {
        self.inner.options.echo
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.pool.db_type()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// True if both handles refer to the same constructed pool.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn dispose(&self) {
        self.inner.pool.close().await;
    }
}

/// Resolve options for `uri` and build a lazily-connecting engine.
///
/// Must be called from within a tokio runtime: static pools spawn the task that
/// keeps their single connection open.
pub fn create_engine(
    bind: &BindKey,
    uri: &str,
    echo: bool,
    pool: &PoolOptions,
    use_native_unicode: bool,
) -> DbResult<Engine> {
    let mut url = DatabaseUrl::parse(uri)?;
    let mut options = EngineOptions::default();
    options.apply_pool_defaults(pool);
    options.apply_driver_hacks(&mut url, use_native_unicode)?;
    options.echo = echo;

    let db_pool = build_pool(&url, &options)?;

    debug!(
        bind = %bind,
        url = %url,
        pool_class = ?options.pool_class,
        max_connections = options.max_connections(),
        "Created engine"
    );

    Ok(Engine {
        inner: Arc::new(EngineInner {
            pool: db_pool,
            bind: bind.clone(),
            url: url.masked(),
            options,
            created_at: Utc::now(),
        }),
    })
}

fn build_pool(url: &DatabaseUrl, options: &EngineOptions) -> DbResult<DbPool> {
    match url.backend() {
        DatabaseType::MySQL => {
            let connect = MySqlConnectOptions::from_str(&url.connect_string()?).map_err(|e| {
                DbError::configuration(format!("Invalid MySQL connection string: {}", e))
            })?;
            let pool = options
                .configure(MySqlPoolOptions::new())
                .connect_lazy_with(connect);
            Ok(DbPool::MySql(pool))
        }
        DatabaseType::PostgreSQL => {
            let connect = PgConnectOptions::from_str(&url.connect_string()?).map_err(|e| {
                DbError::configuration(format!("Invalid PostgreSQL connection string: {}", e))
            })?;
            let pool = options
                .configure(PgPoolOptions::new())
                .connect_lazy_with(connect);
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let connect = if url.is_sqlite_memory() {
                // Each parse names a distinct shared-cache memory database; every
                // connection built from these options opens that same database
                SqliteConnectOptions::from_str(&format!("sqlite:{}", SQLITE_MEMORY)).map_err(
                    |e| DbError::configuration(format!("Invalid SQLite connection string: {}", e)),
                )?
            } else {
                SqliteConnectOptions::new()
                    .filename(url.database())
                    .create_if_missing(true)
            };
            let pool = options
                .configure(SqlitePoolOptions::new())
                .connect_lazy_with(connect);
            Ok(DbPool::SQLite(pool))
        }
    }
}
