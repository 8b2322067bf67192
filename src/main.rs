//! sqlx-binds demo server.
//!
//! Serves a small axum application whose requests each get their own database
//! session, over the primary database and any configured binds.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{Value, json};
use sqlx_binds::models::ReflectedSchema;
use sqlx_binds::{BindSelector, Column, Config, Database, DbResult, DbSession, Table};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn visits_table() -> Table {
    Table::new("visits")
        .column(Column::new("id", "INTEGER").primary_key())
        .column(Column::new("path", "VARCHAR(255)").not_null())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn schema(State(db): State<Arc<Database>>) -> DbResult<Json<Vec<ReflectedSchema>>> {
    Ok(Json(db.reflect(BindSelector::All).await?))
}

async fn record_visit(session: DbSession) -> DbResult<Json<Value>> {
    let visits = visits_table();
    session
        .execute(&visits, "INSERT INTO visits (path) VALUES ('/visits')", &[])
        .await?;
    let count = session
        .fetch_scalar(Some(&visits), "SELECT COUNT(*) FROM visits", &[])
        .await?;
    Ok(Json(json!({ "visits": count.unwrap_or(0) })))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    info!("Starting sqlx-binds v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.database_settings()?;
    let db = Arc::new(Database::new().with_native_unicode(!config.no_native_unicode));
    db.declare(visits_table())?;

    let router = Router::new()
        .route("/health", get(health))
        .route("/schema", get(schema))
        .route("/visits", get(record_visit))
        .with_state(Arc::clone(&db));
    let app = db.init_app(router, settings)?;

    db.create_all(BindSelector::All).await?;

    let bind_addr = config.http_bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await;

    info!("Closing database connections");
    db.dispose().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
