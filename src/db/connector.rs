//! Lazy per-bind engine cache.
//!
//! An [`EngineConnector`] owns at most one engine for one bind. The engine is
//! rebuilt only when the resolved URI or the echo flag differ from the values it
//! was built for; otherwise the cached handle is returned unchanged.

use crate::config::DatabaseSettings;
use crate::db::pool::{Engine, create_engine};
use crate::error::DbResult;
use crate::models::BindKey;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The `(uri, echo)` pair an engine was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectedFor {
    uri: String,
    echo: bool,
}

#[derive(Debug)]
struct Connected {
    connected_for: ConnectedFor,
    engine: Engine,
}

#[derive(Debug)]
pub struct EngineConnector {
    bind: BindKey,
    /// Serializes resolution so concurrent callers never build two pools.
    connected: Mutex<Option<Connected>>,
}

impl EngineConnector {
    pub fn new(bind: BindKey) -> Self {
        Self {
            bind,
            connected: Mutex::new(None),
        }
    }

    pub fn bind(&self) -> &BindKey {
        &self.bind
    }

    /// Return the cached engine, rebuilding it if the URI or echo flag changed.
    pub async fn get_engine(
        &self,
        settings: &DatabaseSettings,
        default_native_unicode: bool,
    ) -> DbResult<Engine> {
        let mut connected = self.connected.lock().await;

        let wanted = ConnectedFor {
            uri: settings.bind_uri(&self.bind)?.to_string(),
            echo: settings.echo,
        };

        if let Some(current) = connected.as_ref() {
            if current.connected_for == wanted {
                return Ok(current.engine.clone());
            }
            debug!(bind = %self.bind, "Engine settings changed, rebuilding");
        }

        let native_unicode = settings.native_unicode.unwrap_or(default_native_unicode);
        let engine = create_engine(
            &self.bind,
            &wanted.uri,
            wanted.echo,
            &settings.pool,
            native_unicode,
        )?;

        info!(
            bind = %self.bind,
            url = %engine.url(),
            echo = wanted.echo,
            "Engine ready"
        );

        *connected = Some(Connected {
            connected_for: wanted,
            engine: engine.clone(),
        });
        Ok(engine)
    }

    /// The cached engine, if one has been built.
    pub async fn current(&self) -> Option<Engine> {
        self.connected.lock().await.as_ref().map(|c| c.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    #[tokio::test]
    async fn test_same_settings_return_cached_engine() {
        let connector = EngineConnector::new(BindKey::Primary);
        let settings = DatabaseSettings::new("sqlite::memory:");
        let first = connector.get_engine(&settings, true).await.unwrap();
        let second = connector.get_engine(&settings, true).await.unwrap();
        assert!(first.ptr_eq(&second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_engine() {
        let connector = std::sync::Arc::new(EngineConnector::new(BindKey::Primary));
        let settings = DatabaseSettings::new("sqlite::memory:");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let connector = std::sync::Arc::clone(&connector);
                let settings = settings.clone();
                tokio::spawn(async move { connector.get_engine(&settings, true).await })
            })
            .collect();

        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap().unwrap());
        }
        let current = connector.current().await.unwrap();
        assert!(engines.iter().all(|e| e.ptr_eq(&current)));
    }

    #[tokio::test]
    async fn test_echo_change_rebuilds() {
        let connector = EngineConnector::new(BindKey::Primary);
        let mut settings = DatabaseSettings::new("sqlite::memory:");
        let first = connector.get_engine(&settings, true).await.unwrap();
        settings.echo = true;
        let second = connector.get_engine(&settings, true).await.unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(second.echo());
        let current = connector.current().await.unwrap();
        assert!(current.ptr_eq(&second));
    }

    #[tokio::test]
    async fn test_unknown_bind_fails() {
        let connector = EngineConnector::new(BindKey::named("reporting"));
        let settings = DatabaseSettings::new("sqlite::memory:");
        let err = connector.get_engine(&settings, true).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { bind: Some(ref b), .. } if b == "reporting"));
        assert!(connector.current().await.is_none());
    }
}
