//! Database layer.
//!
//! This module provides:
//! - Engines: backend-specific connection pools with per-driver option adjustments
//! - Engine connectors: a lazily rebuilt engine cache per bind
//! - Per-application state holding settings and connectors
//! - Transactions used by sessions
//! - Schema DDL and reflection

pub mod connector;
pub mod params;
pub mod pool;
pub mod schema;
pub mod state;
pub mod transaction;

pub use connector::EngineConnector;
pub use params::QueryParam;
pub use pool::{DbPool, Engine, EngineOptions, PoolClass, create_engine};
pub use schema::SchemaInspector;
pub use state::DatabaseState;
pub use transaction::DbTransaction;
