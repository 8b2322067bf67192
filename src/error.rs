//! Error types for sqlx-binds.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Configuration, lifecycle and incompatible-option errors signal programmer error and
//! are surfaced at the point of misuse; they are never retried.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Unregistered bind or unresolvable database URI.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        /// Offending bind name, when the error concerns a secondary bind
        bind: Option<String>,
    },

    /// Operation attempted before `init_app`, or outside any application context.
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    #[error("Incompatible option '{option}': {reason}")]
    IncompatibleOption { option: String, reason: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error not tied to a particular bind.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            bind: None,
        }
    }

    /// Create a configuration error for a bind missing from the bind mapping.
    pub fn unknown_bind(bind: impl Into<String>) -> Self {
        let bind = bind.into();
        Self::Configuration {
            message: format!(
                "Bind '{}' is not specified. Add it to the binds configuration",
                bind
            ),
            bind: Some(bind),
        }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    pub fn incompatible_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Lifecycle { .. } => {
                Some("Call Database::init_app (or Database::configure) before using the database")
            }
            _ => None,
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Lifecycle { .. } => "lifecycle",
            Self::IncompatibleOption { .. } => "incompatible_option",
            Self::Connection { .. } => "connection",
            Self::Database { .. } => "database",
            Self::Schema { .. } => "schema",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status used when the error reaches the framework.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Increase pool_size / pool_timeout or release sessions sooner",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Recreate the engine")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = serde_json::Value::String(suggestion.to_string());
        }
        if let DbError::Database {
            sql_state: Some(code),
            ..
        } = &self
        {
            body["sql_state"] = serde_json::Value::String(code.clone());
        }
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bind_names_the_bind() {
        let err = DbError::unknown_bind("reporting");
        assert!(err.to_string().contains("reporting"));
        match err {
            DbError::Configuration { bind, .. } => assert_eq!(bind.as_deref(), Some("reporting")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert!(DbError::lifecycle("not initialized").suggestion().is_some());
        assert_eq!(DbError::configuration("x").suggestion(), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DbError::connection("down", "retry").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DbError::incompatible_option("pool_size", "no").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = DbError::lifecycle("not initialized").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "database");
    }
}
