//! Data models for sqlx-binds.
//!
//! This module re-exports all model types used throughout the crate.

pub mod bind;
pub mod connection;
pub mod schema;
pub mod table;

// Re-export commonly used types
pub use bind::{ALL_BINDS, BindKey, BindSelector};
pub use connection::{DatabaseType, DatabaseUrl, GAE_MYSQL_DRIVER, SQLITE_MEMORY};
pub use schema::{ReflectedColumn, ReflectedSchema, ReflectedTable, TableType};
pub use table::{Column, MetaData, Table};
