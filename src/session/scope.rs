//! Session scopes and the scoped-session registry.

use crate::error::DbResult;
use crate::session::Session;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread::ThreadId;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies the unit of concurrency a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeId {
    /// One HTTP request, installed by the lifecycle middleware.
    Request(Uuid),
    /// A tokio task with no request scope installed.
    Task(task::Id),
    /// Code running outside any tokio task.
    Thread(ThreadId),
    /// Caller-managed scope, e.g. a background job.
    Named(String),
}

impl ScopeId {
    pub fn request() -> Self {
        ScopeId::Request(Uuid::new_v4())
    }

    pub fn named(name: impl Into<String>) -> Self {
        ScopeId::Named(name.into())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Request(id) => write!(f, "request:{}", id),
            ScopeId::Task(id) => write!(f, "task:{}", id),
            ScopeId::Thread(id) => write!(f, "thread:{:?}", id),
            ScopeId::Named(name) => write!(f, "named:{}", name),
        }
    }
}

tokio::task_local! {
    static CURRENT_SCOPE: ScopeId;
}

/// Returns the scope of the calling task.
pub type ScopeFn = Arc<dyn Fn() -> ScopeId + Send + Sync>;

/// The task-local scope if one is installed, else the current task, else the
/// current thread.
pub fn current_scope() -> ScopeId {
    CURRENT_SCOPE.try_with(Clone::clone).unwrap_or_else(|_| {
        task::try_id()
            .map(ScopeId::Task)
            .unwrap_or_else(|| ScopeId::Thread(std::thread::current().id()))
    })
}

/// Run `fut` with `scope` installed as the task-local scope.
pub async fn with_scope<F: Future>(scope: ScopeId, fut: F) -> F::Output {
    CURRENT_SCOPE.scope(scope, fut).await
}

/// One session per scope, memoized until removed.
#[derive(Debug, Default)]
pub struct ScopedSession {
    sessions: Mutex<HashMap<ScopeId, Arc<Session>>>,
}

impl ScopedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `scope`, built with `create` on first request.
    pub async fn get_or_create<F, Fut>(&self, scope: &ScopeId, create: F) -> DbResult<Arc<Session>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<Session>>,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(scope) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(create().await?);
        sessions.insert(scope.clone(), Arc::clone(&session));
        debug!(scope = %scope, "Session created");
        Ok(session)
    }

    pub async fn get(&self, scope: &ScopeId) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(scope).cloned()
    }

    /// Close and forget the session for `scope`. Returns false if there was none.
    pub async fn remove(&self, scope: &ScopeId) -> DbResult<bool> {
        let Some(session) = self.sessions.lock().await.remove(scope) else {
            return Ok(false);
        };
        if let Err(e) = session.close().await {
            warn!(scope = %scope, error = %e, "Failed to close session");
            return Err(e);
        }
        debug!(scope = %scope, "Session removed");
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every session.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        for (scope, session) in drained {
            if let Err(e) = session.close().await {
                warn!(scope = %scope, error = %e, "Failed to close session");
            }
        }
    }
}
