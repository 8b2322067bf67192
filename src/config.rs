//! Configuration handling for sqlx-binds.
//!
//! [`DatabaseSettings`] is the per-application configuration the library consumes.
//! [`Config`] is the command line / environment surface of the bundled server and
//! converts into `DatabaseSettings`.

use crate::error::{DbError, DbResult};
use crate::models::{BindKey, SQLITE_MEMORY};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// URI used when neither a primary URI nor any bind is configured.
pub const DEFAULT_DATABASE_URI: &str = "sqlite:///:memory:";

// Pool defaults applied when an option is left unset
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

// MySQL policy (except the App Engine driver)
pub const MYSQL_DEFAULT_POOL_SIZE: u32 = 10;
pub const MYSQL_DEFAULT_POOL_RECYCLE_SECS: u64 = 7200;
pub const MYSQL_DEFAULT_CHARSET: &str = "utf8mb4";

/// Connection pool configuration. Every option is copied into the engine options
/// only when explicitly set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub pool_size: Option<u32>,
    pub pool_timeout_secs: Option<u64>,
    /// Connections older than this are closed instead of reused
    pub pool_recycle_secs: Option<u64>,
    /// Connections allowed beyond `pool_size`
    pub max_overflow: Option<u32>,
}

/// A named secondary database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    pub name: String,
    /// Contains sensitive data - never log
    pub uri: String,
}

impl BindConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    /// Parse `name=uri`. The `=` must come before the scheme separator.
    pub fn parse(s: &str) -> Result<Self, String> {
        let scheme_pos = s.find("://").or_else(|| s.find(':')).unwrap_or(s.len());
        match s[..scheme_pos].find('=') {
            Some(idx) => {
                let name = s[..idx].trim();
                let uri = s[idx + 1..].trim();
                if name.is_empty() {
                    return Err(format!("Bind name is empty in '{}'", s));
                }
                if uri.is_empty() {
                    return Err(format!("Bind '{}' has no URI", name));
                }
                Ok(Self::new(name, uri))
            }
            None => Err(format!(
                "Invalid bind '{}'. Expected the form name=uri (e.g. reporting=sqlite:///reports.db)",
                s
            )),
        }
    }
}

/// Per-application database configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Primary database URI.
    pub database_uri: Option<String>,
    /// Secondary databases, in declaration order.
    pub binds: Vec<BindConfig>,
    /// Log every statement at info level.
    pub echo: bool,
    /// Overrides the per-`Database` native unicode default when set.
    pub native_unicode: Option<bool>,
    /// Record executed statements on each session.
    pub record_queries: bool,
    pub pool: PoolOptions,
    /// Commit the request's session after a successful response.
    pub commit_on_response: bool,
}

impl DatabaseSettings {
    pub fn new(database_uri: impl Into<String>) -> Self {
        Self {
            database_uri: Some(database_uri.into()),
            ..Self::default()
        }
    }

    pub fn with_bind(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.binds.push(BindConfig::new(name, uri));
        self
    }

    /// Fill in defaults the way `init_app` does.
    pub fn apply_defaults(&mut self) {
        let uri_missing = self
            .database_uri
            .as_deref()
            .is_none_or(|uri| uri.trim().is_empty());
        if uri_missing {
            if self.binds.is_empty() {
                warn!(
                    default_uri = DEFAULT_DATABASE_URI,
                    "Neither database_uri nor binds is set. Defaulting database_uri to an in-memory SQLite database"
                );
            }
            self.database_uri = Some(DEFAULT_DATABASE_URI.to_string());
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        let mut seen = std::collections::HashSet::new();
        for bind in &self.binds {
            if bind.name.trim().is_empty() {
                return Err(DbError::configuration("Bind names cannot be empty"));
            }
            if !seen.insert(bind.name.as_str()) {
                return Err(DbError::Configuration {
                    message: format!("Bind '{}' is configured more than once", bind.name),
                    bind: Some(bind.name.clone()),
                });
            }
        }
        Ok(())
    }

    /// Resolve the URI for a bind.
    pub fn bind_uri(&self, bind: &BindKey) -> DbResult<&str> {
        match bind {
            BindKey::Primary => self.database_uri.as_deref().ok_or_else(|| {
                DbError::configuration("No database_uri is configured for the primary bind")
            }),
            BindKey::Named(name) => self
                .binds
                .iter()
                .find(|b| &b.name == name)
                .map(|b| b.uri.as_str())
                .ok_or_else(|| DbError::unknown_bind(name.clone())),
        }
    }

    /// Configured secondary bind names, in declaration order.
    pub fn bind_names(&self) -> impl Iterator<Item = &str> {
        self.binds.iter().map(|b| b.name.as_str())
    }

    /// Primary first, then secondary binds in declaration order.
    pub fn bind_keys(&self) -> Vec<BindKey> {
        std::iter::once(BindKey::Primary)
            .chain(self.bind_names().map(BindKey::from))
            .collect()
    }

    /// True if the primary URI is the in-memory fallback.
    pub fn uses_memory_fallback(&self) -> bool {
        self.database_uri
            .as_deref()
            .is_some_and(|uri| uri.ends_with(SQLITE_MEMORY))
    }
}

/// Configuration for the sqlx-binds server binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sqlx-binds",
    about = "Serve an axum application with per-request database sessions over multiple binds",
    version,
    author
)]
pub struct Config {
    /// Primary database URI
    #[arg(long = "database-uri", value_name = "URI", env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Secondary databases as name=uri. Can be specified multiple times.
    #[arg(
        short = 'b',
        long = "bind",
        value_name = "NAME=URI",
        env = "DATABASE_BINDS",
        value_delimiter = ','
    )]
    pub binds: Vec<String>,

    /// Log every SQL statement
    #[arg(long, env = "DATABASE_ECHO")]
    pub echo: bool,

    /// Disable native unicode handling in the drivers
    #[arg(long, env = "DATABASE_NO_NATIVE_UNICODE")]
    pub no_native_unicode: bool,

    /// Record executed statements per session
    #[arg(long, env = "DATABASE_RECORD_QUERIES")]
    pub record_queries: bool,

    #[arg(long, env = "DATABASE_POOL_SIZE")]
    pub pool_size: Option<u32>,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "DATABASE_POOL_TIMEOUT")]
    pub pool_timeout: Option<u64>,

    /// Seconds after which a connection is recycled
    #[arg(long, env = "DATABASE_POOL_RECYCLE")]
    pub pool_recycle: Option<u64>,

    #[arg(long, env = "DATABASE_MAX_OVERFLOW")]
    pub max_overflow: Option<u32>,

    /// Commit the request session after each successful response
    #[arg(long, env = "COMMIT_ON_RESPONSE")]
    pub commit_on_response: bool,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "HTTP_PORT")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database_uri: None,
            binds: Vec::new(),
            echo: false,
            no_native_unicode: false,
            record_queries: false,
            pool_size: None,
            pool_timeout: None,
            pool_recycle: None,
            max_overflow: None,
            commit_on_response: false,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Build the library settings from the parsed arguments.
    pub fn database_settings(&self) -> Result<DatabaseSettings, String> {
        let binds = self
            .binds
            .iter()
            .map(|s| BindConfig::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DatabaseSettings {
            database_uri: self.database_uri.clone(),
            binds,
            echo: self.echo,
            native_unicode: self.no_native_unicode.then_some(false),
            record_queries: self.record_queries,
            pool: PoolOptions {
                pool_size: self.pool_size,
                pool_timeout_secs: self.pool_timeout,
                pool_recycle_secs: self.pool_recycle,
                max_overflow: self.max_overflow,
            },
            commit_on_response: self.commit_on_response,
        })
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
