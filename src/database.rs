//! The application-facing database context.
//!
//! A [`Database`] owns the declared table metadata, the per-application state created
//! by [`Database::init_app`], and the scoped-session registry.

use crate::config::DatabaseSettings;
use crate::db::pool::Engine;
use crate::db::schema::SchemaInspector;
use crate::db::state::DatabaseState;
use crate::error::{DbError, DbResult};
use crate::lifecycle::session_lifecycle;
use crate::models::{BindKey, BindSelector, MetaData, ReflectedSchema, Table};
use crate::session::{ScopeFn, ScopeId, ScopedSession, Session, current_scope};
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

pub struct Database {
    metadata: Arc<MetaData>,
    use_native_unicode: bool,
    scope_fn: ScopeFn,
    state: OnceLock<Arc<DatabaseState>>,
    sessions: ScopedSession,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.metadata.len())
            .field("use_native_unicode", &self.use_native_unicode)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_metadata(Arc::new(MetaData::new()))
    }

    /// Share table declarations with another context.
    pub fn with_metadata(metadata: Arc<MetaData>) -> Self {
        Self {
            metadata,
            use_native_unicode: true,
            scope_fn: Arc::new(current_scope),
            state: OnceLock::new(),
            sessions: ScopedSession::new(),
        }
    }

    /// Default for engines whose settings leave `native_unicode` unset.
    pub fn with_native_unicode(mut self, enabled: bool) -> Self {
        self.use_native_unicode = enabled;
        self
    }

    /// Replace the function deciding which scope `session()` belongs to.
    pub fn with_scope_fn(mut self, scope_fn: impl Fn() -> ScopeId + Send + Sync + 'static) -> Self {
        self.scope_fn = Arc::new(scope_fn);
        self
    }

    pub fn metadata(&self) -> &Arc<MetaData> {
        &self.metadata
    }

    pub fn declare(&self, table: Table) -> DbResult<Arc<Table>> {
        self.metadata.declare(table)
    }

    /// Create the per-application state. Fails if already configured.
    pub fn configure(&self, mut settings: DatabaseSettings) -> DbResult<Arc<DatabaseState>> {
        settings.apply_defaults();
        settings.validate()?;
        let state = Arc::new(DatabaseState::new(settings, self.use_native_unicode));
        self.state
            .set(Arc::clone(&state))
            .map_err(|_| DbError::lifecycle("The database is already initialized for this application"))?;
        info!(
            binds = state.settings()?.binds.len(),
            tables = self.metadata.len(),
            "Database configured"
        );
        Ok(state)
    }

    /// Configure the state and attach the session lifecycle middleware to `router`.
    pub fn init_app<S>(self: &Arc<Self>, router: Router<S>, settings: DatabaseSettings) -> DbResult<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.configure(settings)?;
        Ok(router.layer(axum::middleware::from_fn_with_state(
            Arc::clone(self),
            session_lifecycle,
        )))
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    pub fn state(&self) -> DbResult<&Arc<DatabaseState>> {
        self.state.get().ok_or_else(|| {
            DbError::lifecycle(
                "The database is not initialized for this application. Call init_app or configure first",
            )
        })
    }

    pub fn settings(&self) -> DbResult<DatabaseSettings> {
        self.state()?.settings()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut DatabaseSettings)) -> DbResult<()> {
        self.state()?.update_settings(update)
    }

    /// The primary engine.
    pub async fn engine(&self) -> DbResult<Engine> {
        self.get_engine(BindKey::Primary).await
    }

    pub async fn get_engine(&self, bind: impl Into<BindKey>) -> DbResult<Engine> {
        self.state()?.get_engine(&bind.into()).await
    }

    /// Declared tables owned by `bind`.
    pub fn get_tables_for_bind(&self, bind: impl Into<BindKey>) -> Vec<Arc<Table>> {
        self.metadata.tables_for_bind(&bind.into())
    }

    /// Every declared table of every configured bind, mapped to its engine.
    pub async fn get_binds(&self) -> DbResult<HashMap<String, Engine>> {
        self.state()?.get_binds(&self.metadata).await
    }

    /// The session for the caller's scope.
    pub async fn session(&self) -> DbResult<Arc<Session>> {
        let scope = (self.scope_fn)();
        self.session_for(&scope).await
    }

    pub async fn session_for(&self, scope: &ScopeId) -> DbResult<Arc<Session>> {
        let state = Arc::clone(self.state()?);
        self.sessions
            .get_or_create(scope, || Session::new(scope.clone(), state, &self.metadata))
            .await
    }

    /// The session for `scope` if one was created.
    pub async fn find_session(&self, scope: &ScopeId) -> Option<Arc<Session>> {
        self.sessions.get(scope).await
    }

    /// Close the session for `scope` and forget it.
    pub async fn remove_session(&self, scope: &ScopeId) -> DbResult<bool> {
        self.sessions.remove(scope).await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Create the declared tables of each selected bind on that bind's engine.
    pub async fn create_all(&self, selector: impl Into<BindSelector>) -> DbResult<()> {
        for bind in self.selected_binds(selector.into())? {
            let engine = self.get_engine(bind.clone()).await?;
            let tables = self.metadata.tables_for_bind(&bind);
            SchemaInspector::create_tables(&engine, &tables).await?;
        }
        Ok(())
    }

    /// Drop the declared tables of each selected bind, in reverse declaration order.
    pub async fn drop_all(&self, selector: impl Into<BindSelector>) -> DbResult<()> {
        for bind in self.selected_binds(selector.into())? {
            let engine = self.get_engine(bind.clone()).await?;
            let tables = self.metadata.tables_for_bind(&bind);
            SchemaInspector::drop_tables(&engine, &tables).await?;
        }
        Ok(())
    }

    /// Reflect the whole schema of each selected bind's engine.
    pub async fn reflect(&self, selector: impl Into<BindSelector>) -> DbResult<Vec<ReflectedSchema>> {
        let mut schemas = Vec::new();
        for bind in self.selected_binds(selector.into())? {
            let engine = self.get_engine(bind.clone()).await?;
            let tables = SchemaInspector::reflect(&engine).await?;
            schemas.push(ReflectedSchema { bind, tables });
        }
        Ok(schemas)
    }

    fn selected_binds(&self, selector: BindSelector) -> DbResult<Vec<BindKey>> {
        let settings = self.settings()?;
        let binds = selector.resolve(settings.bind_names());
        debug!(binds = ?binds, "Selected binds");
        Ok(binds)
    }

    /// Close every session and engine.
    pub async fn dispose(&self) {
        self.sessions.clear().await;
        if let Some(state) = self.state.get() {
            state.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_before_init_is_lifecycle_error() {
        let db = Database::new();
        assert!(matches!(db.state(), Err(DbError::Lifecycle { .. })));
        assert!(matches!(db.engine().await, Err(DbError::Lifecycle { .. })));
        assert!(matches!(db.session().await, Err(DbError::Lifecycle { .. })));
    }

    #[tokio::test]
    async fn test_configure_twice_fails() {
        let db = Database::new();
        db.configure(DatabaseSettings::new("sqlite::memory:")).unwrap();
        let err = db
            .configure(DatabaseSettings::new("sqlite::memory:"))
            .unwrap_err();
        assert!(matches!(err, DbError::Lifecycle { .. }));
    }

    #[tokio::test]
    async fn test_memory_fallback_applied() {
        let db = Database::new();
        db.configure(DatabaseSettings::default()).unwrap();
        assert!(db.settings().unwrap().uses_memory_fallback());
        db.engine().await.unwrap();
    }

    #[tokio::test]
    async fn test_scope_fn_decides_session() {
        let db = Database::new().with_scope_fn(|| ScopeId::named("fixed"));
        db.configure(DatabaseSettings::new("sqlite::memory:")).unwrap();
        let a = db.session().await.unwrap();
        let b = db.session_for(&ScopeId::named("fixed")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(db.session_count().await, 1);
    }
}
