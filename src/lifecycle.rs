//! Request lifecycle integration for axum.
//!
//! [`session_lifecycle`] gives every request its own session scope. Handlers reach the
//! request's session through the [`DbSession`] extractor. When the response is ready the
//! session is committed (if configured and the response is not a server error) or
//! rolled back, then removed.

use crate::database::Database;
use crate::error::DbError;
use crate::session::{ScopeId, Session, with_scope};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// The database context and scope of the current request.
#[derive(Clone)]
pub struct RequestSession {
    db: Arc<Database>,
    scope: ScopeId,
}

impl RequestSession {
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

/// Middleware installed by [`Database::init_app`].
pub async fn session_lifecycle(
    State(db): State<Arc<Database>>,
    mut request: Request,
    next: Next,
) -> Response {
    let scope = ScopeId::request();
    request.extensions_mut().insert(RequestSession {
        db: Arc::clone(&db),
        scope: scope.clone(),
    });

    let mut guard = SessionGuard {
        db: Arc::clone(&db),
        scope: scope.clone(),
        removed: false,
    };

    let response = with_scope(scope.clone(), next.run(request)).await;
    let response = finalize(&db, &scope, response).await;

    if let Err(e) = db.remove_session(&scope).await {
        warn!(scope = %scope, error = %e, "Failed to remove request session");
    }
    guard.removed = true;
    response
}

async fn finalize(db: &Database, scope: &ScopeId, response: Response) -> Response {
    let Some(session) = db.find_session(scope).await else {
        return response;
    };

    if response.status().is_server_error() {
        debug!(scope = %scope, status = %response.status(), "Server error, rolling back");
        if let Err(e) = session.rollback().await {
            warn!(scope = %scope, error = %e, "Rollback failed");
        }
        return response;
    }

    let commit_on_response = db.settings().is_ok_and(|s| s.commit_on_response);
    if !commit_on_response {
        return response;
    }

    match session.commit().await {
        Ok(()) => response,
        Err(e) => {
            warn!(scope = %scope, error = %e, "Commit on response failed");
            if let Err(rollback_err) = session.rollback().await {
                warn!(scope = %scope, error = %rollback_err, "Rollback failed");
            }
            e.into_response()
        }
    }
}

/// Removes the request's session if the request future is dropped early.
struct SessionGuard {
    db: Arc<Database>,
    scope: ScopeId,
    removed: bool,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.removed {
            return;
        }

        let db = Arc::clone(&self.db);
        let scope = self.scope.clone();
        tokio::spawn(async move {
            match db.remove_session(&scope).await {
                Ok(_) => warn!(scope = %scope, "Request session removed via Drop"),
                Err(e) => warn!(scope = %scope, error = %e, "Failed to remove abandoned session"),
            }
        });
    }
}

/// Extractor for the current request's session.
#[derive(Debug, Clone)]
pub struct DbSession(pub Arc<Session>);

impl Deref for DbSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for DbSession
where
    S: Send + Sync,
{
    type Rejection = DbError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_session = parts
            .extensions
            .get::<RequestSession>()
            .cloned()
            .ok_or_else(|| {
                DbError::lifecycle("No request session. Install the middleware with Database::init_app")
            })?;
        let session = request_session
            .db
            .session_for(&request_session.scope)
            .await?;
        Ok(DbSession(session))
    }
}
