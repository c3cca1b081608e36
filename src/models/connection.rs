//! Backend connection models.
//!
//! A [`BackendConfig`] describes one named database backend. It is built once
//! at startup and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Default cap on pooled connections per backend.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 5;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    /// Only reachable through [`crate::db::PoolRegistry::insert`]; never configured from the environment.
    SQLite,
}

impl DatabaseType {
    /// Parse the `<PREFIX>_TYPE` value.
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transport security for backend connections.
///
/// TLS is always requested. `InsecureAcceptInvalidCerts` still encrypts but
/// accepts self-signed or otherwise invalid server certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    #[default]
    Strict,
    InsecureAcceptInvalidCerts,
}

impl TlsPolicy {
    pub fn from_insecure_flag(insecure: bool) -> Self {
        if insecure {
            Self::InsecureAcceptInvalidCerts
        } else {
            Self::Strict
        }
    }
}

/// Configuration for one named database backend.
#[derive(Clone, Serialize)]
pub struct BackendConfig {
    pub name: String,
    pub db_type: DatabaseType,
    pub user: String,
    pub host: String,
    pub database: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub port: u16,
    pub max_pool_size: u32,
    pub tls: TlsPolicy,
}

impl BackendConfig {
    /// Validate a backend name. Names become part of a route path and an
    /// environment variable prefix.
    pub fn validate_name(name: &str) -> Result<(), BackendConfigError> {
        if name.is_empty() {
            return Err(BackendConfigError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(BackendConfigError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Environment variable prefix for a backend name: `reporting-db` -> `REPORTING_DB`.
    pub fn env_prefix(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Route serving this backend, e.g. `/reporting_sql_query`.
    pub fn route_path(&self) -> String {
        Self::route_path_for(&self.name)
    }

    pub fn route_path_for(name: &str) -> String {
        format!("/{}_sql_query", name)
    }

    /// Connection target without credentials, safe for logs.
    pub fn display_target(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.db_type.display_name().to_lowercase(),
            self.user,
            self.host,
            self.port,
            self.database
        )
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("password", &"****")
            .field("port", &self.port)
            .field("max_pool_size", &self.max_pool_size)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Errors that can occur when naming a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendConfigError {
    #[error("Backend name cannot be empty")]
    EmptyName,

    #[error("Backend name contains invalid characters: {0}")]
    InvalidName(String),

    #[error("Backend '{0}' is configured more than once")]
    Duplicate(String),

    #[error("Backends '{first}' and '{second}' both read {prefix}_* variables")]
    SharedEnvPrefix {
        first: String,
        second: String,
        prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackendConfig {
        BackendConfig {
            name: "reporting".to_string(),
            db_type: DatabaseType::PostgreSQL,
            user: "app".to_string(),
            host: "db.internal".to_string(),
            database: "reports".to_string(),
            password: "hunter2".to_string(),
            port: 5432,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            tls: TlsPolicy::Strict,
        }
    }

    #[test]
    fn test_database_type_from_env_value() {
        assert_eq!(
            DatabaseType::from_env_value("postgres"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_env_value(" MySQL "),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(DatabaseType::from_env_value("sqlite"), None);
        assert_eq!(DatabaseType::from_env_value("oracle"), None);
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(BackendConfig::env_prefix("main"), "MAIN");
        assert_eq!(BackendConfig::env_prefix("reporting-db"), "REPORTING_DB");
    }

    #[test]
    fn test_validate_name() {
        assert!(BackendConfig::validate_name("archive_2").is_ok());
        assert!(matches!(
            BackendConfig::validate_name(""),
            Err(BackendConfigError::EmptyName)
        ));
        assert!(matches!(
            BackendConfig::validate_name("a/b"),
            Err(BackendConfigError::InvalidName(_))
        ));
    }

    #[test]
    fn test_route_path() {
        assert_eq!(sample().route_path(), "/reporting_sql_query");
    }

    #[test]
    fn test_password_never_displayed() {
        let config = sample();
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert!(!config.display_target().contains("hunter2"));
        assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_tls_policy() {
        assert_eq!(TlsPolicy::default(), TlsPolicy::Strict);
        assert_eq!(TlsPolicy::from_insecure_flag(false), TlsPolicy::Strict);
        assert_eq!(
            TlsPolicy::from_insecure_flag(true),
            TlsPolicy::InsecureAcceptInvalidCerts
        );
    }
}
