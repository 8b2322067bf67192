use sqlx_binds::models::TableType;
use sqlx_binds::{BindKey, BindSelector, Column, Database, DatabaseSettings, DbError, Table};

fn database() -> Database {
    let db = Database::new();
    db.declare(
        Table::new("users")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(Column::new("email", "VARCHAR(255)").not_null()),
    )
    .unwrap();
    db.declare(
        Table::new("events")
            .with_bind_key("reporting")
            .column(Column::new("id", "INTEGER").primary_key())
            .column(Column::new("kind", "TEXT").default_value("'visit'")),
    )
    .unwrap();
    db.configure(
        DatabaseSettings::new("sqlite:///:memory:").with_bind("reporting", "sqlite:///:memory:"),
    )
    .unwrap();
    db
}

#[tokio::test]
async fn test_get_tables_for_bind_is_exact() {
    let db = database();
    let names = |bind: BindKey| {
        db.get_tables_for_bind(bind)
            .iter()
            .map(|t| t.name().to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(BindKey::Primary), vec!["users"]);
    assert_eq!(names(BindKey::named("reporting")), vec!["events"]);
    assert!(names(BindKey::named("nothing")).is_empty());
}

#[tokio::test]
async fn test_create_all_places_tables_on_their_bind() {
    let db = database();
    db.create_all(BindSelector::All).await.unwrap();

    let schemas = db.reflect(BindSelector::All).await.unwrap();
    assert_eq!(schemas.len(), 2);

    let primary = &schemas[0];
    assert_eq!(primary.bind, BindKey::Primary);
    assert!(primary.has_table("users"));
    assert!(!primary.has_table("events"));

    let reporting = &schemas[1];
    assert_eq!(reporting.bind, BindKey::named("reporting"));
    assert!(reporting.has_table("events"));
    assert!(!reporting.has_table("users"));

    let users = primary.table("users").unwrap();
    assert_eq!(users.table_type, TableType::Table);
    assert!(users.column("id").unwrap().primary_key);
    assert!(!users.column("email").unwrap().nullable);
}

#[tokio::test]
async fn test_create_all_for_one_bind() {
    let db = database();
    db.create_all(BindSelector::bind("reporting")).await.unwrap();

    let schemas = db.reflect(BindSelector::All).await.unwrap();
    assert!(schemas[0].tables.is_empty());
    assert_eq!(schemas[1].table_names(), vec!["events"]);
}

#[tokio::test]
async fn test_create_all_is_idempotent() {
    let db = database();
    db.create_all(BindSelector::All).await.unwrap();
    db.create_all(BindSelector::All).await.unwrap();
    let schemas = db.reflect(BindSelector::primary()).await.unwrap();
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].table_names(), vec!["users"]);
}

#[tokio::test]
async fn test_drop_all_removes_declared_tables() {
    let db = database();
    db.create_all(BindSelector::All).await.unwrap();
    db.drop_all(BindSelector::All).await.unwrap();

    let schemas = db.reflect(BindSelector::All).await.unwrap();
    assert!(schemas.iter().all(|s| s.tables.is_empty()));
}

#[tokio::test]
async fn test_reflect_includes_undeclared_tables() {
    let db = database();
    let scope = sqlx_binds::ScopeId::named("ddl");
    let session = db.session_for(&scope).await.unwrap();
    session
        .execute_default("CREATE TABLE legacy (code TEXT)", &[])
        .await
        .unwrap();
    session
        .execute_default("CREATE VIEW legacy_codes AS SELECT code FROM legacy", &[])
        .await
        .unwrap();
    session.commit().await.unwrap();
    db.remove_session(&scope).await.unwrap();

    let schemas = db.reflect(BindSelector::primary()).await.unwrap();
    let schema = &schemas[0];
    assert!(schema.has_table("legacy"));
    assert_eq!(
        schema.table("legacy_codes").unwrap().table_type,
        TableType::View
    );
}

#[tokio::test]
async fn test_unknown_bind_in_selector() {
    let db = database();
    let err = db.create_all(BindSelector::bind("archive")).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { bind: Some(ref b), .. } if b == "archive"));
}

#[tokio::test]
async fn test_schema_ops_before_init_fail() {
    let db = Database::new();
    let err = db.create_all(BindSelector::All).await.unwrap_err();
    assert!(matches!(err, DbError::Lifecycle { .. }));
}
