//! sqlx-binds
//!
//! Binds sqlx connection pools to the axum request lifecycle: lazily built engines
//! per configured database ("bind"), one session per request scope, and routing of
//! declared tables to the engine of their bind.

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod session;

pub use config::{Config, DatabaseSettings};
pub use database::Database;
pub use error::{DbError, DbResult};
pub use lifecycle::DbSession;
pub use models::{BindKey, BindSelector, Column, MetaData, Table};
pub use session::{ScopeId, Session};
