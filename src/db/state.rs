//! Per-application database state.
//!
//! One [`DatabaseState`] exists per configured [`Database`](crate::Database). It owns
//! the settings and one [`EngineConnector`] per bind, created on first use and kept for
//! the lifetime of the state.

use crate::config::DatabaseSettings;
use crate::db::connector::EngineConnector;
use crate::db::pool::Engine;
use crate::error::{DbError, DbResult};
use crate::models::{BindKey, MetaData};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct DatabaseState {
    settings: RwLock<DatabaseSettings>,
    connectors: Mutex<HashMap<BindKey, Arc<EngineConnector>>>,
    use_native_unicode: bool,
}

impl DatabaseState {
    pub fn new(settings: DatabaseSettings, use_native_unicode: bool) -> Self {
        Self {
            settings: RwLock::new(settings),
            connectors: Mutex::new(HashMap::new()),
            use_native_unicode,
        }
    }

    /// A snapshot of the current settings.
    pub fn settings(&self) -> DbResult<DatabaseSettings> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|_| DbError::internal("settings lock poisoned"))
    }

    /// Mutate the settings in place. Engines pick up URI and echo changes on next use.
    pub fn update_settings(&self, update: impl FnOnce(&mut DatabaseSettings)) -> DbResult<()> {
        let mut settings = self
            .settings
            .write()
            .map_err(|_| DbError::internal("settings lock poisoned"))?;
        let mut next = settings.clone();
        update(&mut next);
        next.validate()?;
        *settings = next;
        Ok(())
    }

    pub fn use_native_unicode(&self) -> bool {
        self.use_native_unicode
    }

    /// The connector for `bind`, created on first request.
    pub async fn connector(&self, bind: &BindKey) -> Arc<EngineConnector> {
        let mut connectors = self.connectors.lock().await;
        Arc::clone(connectors.entry(bind.clone()).or_insert_with(|| {
            debug!(bind = %bind, "Created engine connector");
            Arc::new(EngineConnector::new(bind.clone()))
        }))
    }

    pub async fn connector_count(&self) -> usize {
        self.connectors.lock().await.len()
    }

    /// Resolve the engine for `bind` through its connector.
    pub async fn get_engine(&self, bind: &BindKey) -> DbResult<Engine> {
        let settings = self.settings()?;
        // Fail before creating a connector for a bind that was never configured
        settings.bind_uri(bind)?;
        let connector = self.connector(bind).await;
        connector.get_engine(&settings, self.use_native_unicode).await
    }

    /// Map every declared table of every configured bind to its engine.
    pub async fn get_binds(&self, metadata: &MetaData) -> DbResult<HashMap<String, Engine>> {
        let bind_keys = self.settings()?.bind_keys();
        let mut binds = HashMap::new();
        for bind in bind_keys {
            let engine = self.get_engine(&bind).await?;
            for table in metadata.tables_for_bind(&bind) {
                binds.insert(table.name().to_string(), engine.clone());
            }
        }
        Ok(binds)
    }

    /// Close every engine built so far.
    pub async fn dispose(&self) {
        let connectors: Vec<_> = self.connectors.lock().await.values().cloned().collect();
        for connector in connectors {
            if let Some(engine) = connector.current().await {
                engine.dispose().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Table};

    fn settings() -> DatabaseSettings {
        DatabaseSettings::new("sqlite::memory:").with_bind("reporting", "sqlite::memory:")
    }

    #[tokio::test]
    async fn test_one_connector_per_bind() {
        let state = DatabaseState::new(settings(), true);
        let a = state.connector(&BindKey::Primary).await;
        let b = state.connector(&BindKey::Primary).await;
        assert!(Arc::ptr_eq(&a, &b));
        state.connector(&BindKey::named("reporting")).await;
        assert_eq!(state.connector_count().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_bind_creates_no_connector() {
        let state = DatabaseState::new(settings(), true);
        let err = state.get_engine(&BindKey::named("missing")).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert_eq!(state.connector_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_binds_routes_tables() {
        let state = DatabaseState::new(settings(), true);
        let metadata = MetaData::new();
        metadata
            .declare(Table::new("users").column(Column::new("id", "INTEGER")))
            .unwrap();
        metadata
            .declare(
                Table::new("events")
                    .with_bind_key("reporting")
                    .column(Column::new("id", "INTEGER")),
            )
            .unwrap();

        let binds = state.get_binds(&metadata).await.unwrap();
        assert_eq!(binds.len(), 2);
        assert!(binds["users"].bind().is_primary());
        assert_eq!(binds["events"].bind(), &BindKey::named("reporting"));
    }

    #[test]
    fn test_update_settings_validates() {
        let state = DatabaseState::new(settings(), true);
        let err = state
            .update_settings(|s| s.binds.push(crate::config::BindConfig::new("reporting", "x")))
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert_eq!(state.settings().unwrap().binds.len(), 1);
    }
}
