//! Error types for the extension.
//!
//! Every layer below the route dispatcher returns [`ExtensionError`]. The
//! dispatcher is the only place these are turned into HTTP responses, and it
//! never forwards the detail to the client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Signing error: {message}")]
    Signing { message: String },

    #[error("Backend not found: {backend}")]
    BackendNotFound { backend: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExtensionError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
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

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Create a backend not found error.
    pub fn backend_not_found(backend: impl Into<String>) -> Self {
        Self::BackendNotFound {
            backend: backend.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Operator hint logged alongside connection and database errors.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// True for errors raised while waiting on a connection.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for errors that mean no connection could be lent.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to ExtensionError.
impl From<sqlx::Error> for ExtensionError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => ExtensionError::connection(
                msg.to_string(),
                "Check the backend host, port and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                ExtensionError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::PoolTimedOut => ExtensionError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => ExtensionError::connection(
                "Connection pool is closed",
                "The extension is shutting down",
            ),
            sqlx::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::TimedOut => {
                ExtensionError::timeout("connection establishment", 0)
            }
            sqlx::Error::Io(io_err) => ExtensionError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => ExtensionError::connection(
                format!("TLS error: {}", tls_err),
                "Verify the server certificate or enable insecure TLS mode",
            ),
            sqlx::Error::Protocol(msg) => ExtensionError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => ExtensionError::internal(format!(
                "Failed to decode column {}: {}",
                index, source
            )),
            sqlx::Error::Decode(source) => {
                ExtensionError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => ExtensionError::internal("Database worker crashed"),
            _ => ExtensionError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for extension operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtensionError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));

        let err = ExtensionError::configuration("PRIMARY_HOST is not set");
        assert_eq!(
            err.to_string(),
            "Configuration error: PRIMARY_HOST is not set"
        );
    }

    #[test]
    fn test_error_suggestion() {
        let err = ExtensionError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(ExtensionError::signing("bad key").suggestion(), None);
    }

    #[test]
    fn test_pool_errors_classify_as_connection() {
        let closed: ExtensionError = sqlx::Error::PoolClosed.into();
        assert!(closed.is_connection());
        assert!(!closed.is_timeout());

        let timed_out: ExtensionError = sqlx::Error::PoolTimedOut.into();
        assert!(timed_out.is_timeout());
        assert!(timed_out.is_connection());
    }

    #[test]
    fn test_io_timeout_classifies_as_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
        let err: ExtensionError = sqlx::Error::Io(io).into();
        assert!(err.is_timeout());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ExtensionError = sqlx::Error::Io(io).into();
        assert!(!err.is_timeout());
        assert!(err.is_connection());
    }
}
