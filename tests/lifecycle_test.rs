use axum::{Extension, Router};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use serde_json::Value;
use sqlx_binds::{
    BindSelector, Column, Database, DatabaseSettings, DbResult, DbSession, ScopeId, Table,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

async fn insert_note(session: DbSession) -> DbResult<StatusCode> {
    session
        .execute_default("INSERT INTO notes (body) VALUES ('hello')", &[])
        .await?;
    Ok(StatusCode::CREATED)
}

async fn insert_note_then_fail(session: DbSession) -> impl IntoResponse {
    if let Err(e) = session
        .execute_default("INSERT INTO notes (body) VALUES ('lost')", &[])
        .await
    {
        return e.into_response();
    }
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

async fn insert_orphan(session: DbSession) -> DbResult<StatusCode> {
    session
        .execute_default("INSERT INTO children (id, parent_id) VALUES (1, 99)", &[])
        .await?;
    Ok(StatusCode::OK)
}

async fn insert_note_then_hang(
    Extension(written): Extension<Arc<Notify>>,
    session: DbSession,
) -> DbResult<StatusCode> {
    session
        .execute_default("INSERT INTO notes (body) VALUES ('abandoned')", &[])
        .await?;
    written.notify_one();
    std::future::pending::<()>().await;
    Ok(StatusCode::OK)
}

async fn app(commit_on_response: bool) -> (Arc<Database>, Router, Arc<Notify>) {
    let db = Arc::new(Database::new());
    db.declare(
        Table::new("notes")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(Column::new("body", "TEXT")),
    )
    .unwrap();
    db.declare(Table::new("parents").column(Column::new("id", "INTEGER").primary_key()))
        .unwrap();
    db.declare(
        Table::new("children")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(
                Column::new("parent_id", "INTEGER")
                    .constraint("REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED"),
            ),
    )
    .unwrap();

    let mut settings = DatabaseSettings::new("sqlite:///:memory:");
    settings.commit_on_response = commit_on_response;

    let router = Router::new()
        .route("/notes", post(insert_note))
        .route("/fail", post(insert_note_then_fail))
        .route("/orphan", post(insert_orphan))
        .route("/hang", post(insert_note_then_hang));
    let written = Arc::new(Notify::new());
    let router = router.layer(Extension(Arc::clone(&written)));
    let router = db.init_app(router, settings).unwrap();
    db.create_all(BindSelector::All).await.unwrap();
    (db, router, written)
}

async fn count(db: &Database, table: &str) -> i64 {
    let scope = ScopeId::named("count");
    let session = db.session_for(&scope).await.unwrap();
    let value = session
        .fetch_scalar(None, &format!("SELECT COUNT(*) FROM {}", table), &[])
        .await
        .unwrap();
    db.remove_session(&scope).await.unwrap();
    value.unwrap_or(0)
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_successful_response_commits() {
    let (db, router, _) = app(true).await;

    let response = router.oneshot(post_request("/notes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    assert_eq!(count(&db, "notes").await, 1);
    assert_eq!(db.session_count().await, 0);
}

#[tokio::test]
async fn test_without_commit_on_response_work_is_discarded() {
    let (db, router, _) = app(false).await;

    let response = router.oneshot(post_request("/notes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    assert_eq!(count(&db, "notes").await, 0);
    assert_eq!(db.session_count().await, 0);
}

#[tokio::test]
async fn test_server_error_rolls_back_and_propagates() {
    let (db, router, _) = app(true).await;

    let response = router.oneshot(post_request("/fail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"boom");

    assert_eq!(count(&db, "notes").await, 0);
    assert_eq!(db.session_count().await, 0);
}

#[tokio::test]
async fn test_failed_commit_rolls_back_and_reports() {
    let (db, router, _) = app(true).await;

    let response = router.oneshot(post_request("/orphan")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "database");

    assert_eq!(count(&db, "children").await, 0);
    assert_eq!(db.session_count().await, 0);
}

#[tokio::test]
async fn test_each_request_gets_its_own_scope() {
    let (db, router, _) = app(true).await;

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(post_request("/notes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    assert_eq!(count(&db, "notes").await, 3);
    assert_eq!(db.session_count().await, 0);
}

#[tokio::test]
async fn test_extractor_without_middleware_is_rejected() {
    let router: Router = Router::new().route("/notes", post(insert_note));

    let response = router.oneshot(post_request("/notes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "lifecycle");
}

#[tokio::test]
async fn test_init_app_twice_fails() {
    let (db, _, _) = app(true).await;
    let err = db
        .init_app(Router::<()>::new(), DatabaseSettings::new("sqlite:///:memory:"))
        .unwrap_err();
    assert!(matches!(err, sqlx_binds::DbError::Lifecycle { .. }));
}

#[tokio::test]
async fn test_cancelled_request_releases_session() {
    let (db, router, written) = app(true).await;

    let request = router.oneshot(post_request("/hang"));
    tokio::select! {
        _ = request => panic!("handler never returns"),
        _ = written.notified() => {}
    }

    // The request future is gone; its session is removed in the background
    for _ in 0..200 {
        if db.session_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(db.session_count().await, 0);
    assert_eq!(count(&db, "notes").await, 0);
}
