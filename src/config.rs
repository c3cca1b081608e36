//! Configuration handling for the extension and its host binary.
//!
//! Host settings come from CLI arguments with environment fallbacks (`clap`).
//! Backend credentials and blob storage settings come from the environment
//! only, one variable group per backend, and are validated before anything
//! connects: a missing value is an error, never a placeholder.

use crate::error::{ExtensionError, ExtensionResult};
use crate::models::{
    BackendConfig, BackendConfigError, BlobStorageConfig, DEFAULT_MAX_POOL_SIZE, DatabaseType,
    TlsPolicy,
};
use clap::{Parser, ValueEnum};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_BACKEND: &str = "main";

pub const BLOB_ACCOUNT_NAME_VAR: &str = "AZURE_STORAGE_ACCOUNT_NAME";
pub const BLOB_CONTAINER_NAME_VAR: &str = "AZURE_STORAGE_CONTAINER_NAME";
pub const BLOB_ACCOUNT_KEY_VAR: &str = "AZURE_STORAGE_ACCOUNT_KEY";

/// How the startup connectivity probe treats acquisition timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProbePolicy {
    /// Every probe failure is an error
    #[default]
    Strict,
    /// Timeouts are logged and ignored; other failures are errors
    BestEffort,
}

impl ProbePolicy {
    /// Whether a startup connectivity failure with `err` lets startup continue.
    pub fn tolerates(&self, err: &ExtensionError) -> bool {
        *self == Self::BestEffort && err.is_timeout()
    }
}

impl std::fmt::Display for ProbePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Source of environment variables. Lets tests supply a plain map.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

fn required(env: &impl EnvSource, key: &str) -> ExtensionResult<String> {
    match env.var(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ExtensionError::configuration(format!("{key} is empty"))),
        None => Err(ExtensionError::configuration(format!("{key} is not set"))),
    }
}

fn optional(env: &impl EnvSource, key: &str) -> Option<String> {
    env.var(key).filter(|v| !v.trim().is_empty())
}

impl BackendConfig {
    /// Load one backend's settings from `<PREFIX>_*` variables.
    pub fn from_env(name: &str, tls: TlsPolicy, env: &impl EnvSource) -> ExtensionResult<Self> {
        Self::validate_name(name).map_err(|e| ExtensionError::configuration(e.to_string()))?;
        let prefix = Self::env_prefix(name);

        let user = required(env, &format!("{prefix}_USER"))?;
        let host = required(env, &format!("{prefix}_HOST"))?;
        let database = required(env, &format!("{prefix}_DATABASE"))?;
        let password = required(env, &format!("{prefix}_PASSWORD"))?;

        let port_key = format!("{prefix}_PORT");
        let port_raw = required(env, &port_key)?;
        let port = port_raw.trim().parse::<u16>().map_err(|_| {
            ExtensionError::configuration(format!(
                "{port_key} must be a port number, got '{port_raw}'"
            ))
        })?;

        let pool_key = format!("{prefix}_MAX_POOL_SIZE");
        let max_pool_size = match optional(env, &pool_key) {
            None => DEFAULT_MAX_POOL_SIZE,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ExtensionError::configuration(format!(
                        "{pool_key} must be a positive integer, got '{raw}'"
                    )));
                }
            },
        };

        let type_key = format!("{prefix}_TYPE");
        let db_type = match optional(env, &type_key) {
            None => DatabaseType::PostgreSQL,
            Some(raw) => DatabaseType::from_env_value(&raw).ok_or_else(|| {
                ExtensionError::configuration(format!(
                    "{type_key} must be 'postgres' or 'mysql', got '{raw}'"
                ))
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            db_type,
            user,
            host,
            database,
            password,
            port,
            max_pool_size,
            tls,
        })
    }
}

impl BlobStorageConfig {
    /// Load the blob account settings.
    pub fn from_env(env: &impl EnvSource) -> ExtensionResult<Self> {
        Ok(Self::new(
            required(env, BLOB_ACCOUNT_NAME_VAR)?,
            required(env, BLOB_CONTAINER_NAME_VAR)?,
            required(env, BLOB_ACCOUNT_KEY_VAR)?,
        ))
    }
}

/// Host configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-blob-extension",
    about = "Pooled SQL passthrough and signed blob URLs over HTTP",
    version,
    author
)]
pub struct Config {
    /// Backend names. The first one also serves /sql_query.
    /// Each name reads <NAME>_USER, <NAME>_HOST, <NAME>_DATABASE, <NAME>_PASSWORD and <NAME>_PORT.
    #[arg(
        short = 'b',
        long = "backend",
        value_name = "NAME",
        env = "EXT_BACKENDS",
        value_delimiter = ',',
        default_value = DEFAULT_BACKEND
    )]
    pub backends: Vec<String>,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "EXT_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "EXT_HTTP_PORT")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "EXT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "EXT_JSON_LOGS")]
    pub json_logs: bool,

    /// Accept invalid or self-signed database server certificates.
    /// Connections are still encrypted.
    #[arg(long, env = "EXT_INSECURE_TLS")]
    pub insecure_tls: bool,

    /// How the startup connectivity probe treats timeouts
    #[arg(long, value_enum, default_value_t = ProbePolicy::Strict, env = "EXT_PROBE_POLICY")]
    pub probe_policy: ProbePolicy,

    /// Bearer tokens accepted by the host. Empty disables authentication.
    #[arg(
        long = "auth-token",
        value_name = "TOKEN",
        env = "EXT_AUTH_TOKENS",
        value_delimiter = ','
    )]
    pub auth_tokens: Vec<String>,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            backends: vec![DEFAULT_BACKEND.to_string()],
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            json_logs: false,
            insecure_tls: false,
            probe_policy: ProbePolicy::Strict,
            auth_tokens: Vec::new(),
        }
    }

    /// TLS policy applied to every backend.
    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy::from_insecure_flag(self.insecure_tls)
    }

    /// Load and validate every configured backend, in order.
    pub fn load_backends(&self, env: &impl EnvSource) -> ExtensionResult<Vec<BackendConfig>> {
        if self.backends.is_empty() {
            return Err(ExtensionError::configuration(
                "At least one backend must be configured",
            ));
        }

        let mut seen = HashSet::new();
        let mut prefixes: HashMap<String, &str> = HashMap::new();
        let mut configs = Vec::with_capacity(self.backends.len());
        for name in &self.backends {
            let name = name.trim();
            if !seen.insert(name.to_string()) {
                return Err(ExtensionError::configuration(
                    BackendConfigError::Duplicate(name.to_string()).to_string(),
                ));
            }
            let prefix = BackendConfig::env_prefix(name);
            if let Some(first) = prefixes.get(&prefix) {
                return Err(ExtensionError::configuration(
                    BackendConfigError::SharedEnvPrefix {
                        first: first.to_string(),
                        second: name.to_string(),
                        prefix,
                    }
                    .to_string(),
                ));
            }
            prefixes.insert(prefix, name);
            configs.push(BackendConfig::from_env(name, self.tls_policy(), env)?);
        }
        Ok(configs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_env(prefix: &str) -> HashMap<String, String> {
        [
            ("USER", "app"),
            ("HOST", "db.internal"),
            ("DATABASE", "appdb"),
            ("PASSWORD", "secret"),
            ("PORT", "5432"),
        ]
        .into_iter()
        .map(|(k, v)| (format!("{prefix}_{k}"), v.to_string()))
        .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backends, vec!["main".to_string()]);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.probe_policy, ProbePolicy::Strict);
        assert_eq!(config.tls_policy(), TlsPolicy::Strict);
    }

    #[test]
    fn test_parse_cli_arguments() {
        let config = Config::try_parse_from([
            "db-blob-extension",
            "--backend",
            "primary,archive",
            "--backend",
            "reporting",
            "--insecure-tls",
            "--probe-policy",
            "best-effort",
            "--http-port",
            "3000",
        ])
        .unwrap();
        assert_eq!(config.backends, vec!["primary", "archive", "reporting"]);
        assert!(config.insecure_tls);
        assert_eq!(config.tls_policy(), TlsPolicy::InsecureAcceptInvalidCerts);
        assert_eq!(config.probe_policy, ProbePolicy::BestEffort);
        assert_eq!(config.http_port, 3000);
    }

    #[test]
    fn test_backend_from_env() {
        let env = backend_env("PRIMARY");
        let backend = BackendConfig::from_env("primary", TlsPolicy::Strict, &env).unwrap();
        assert_eq!(backend.name, "primary");
        assert_eq!(backend.db_type, DatabaseType::PostgreSQL);
        assert_eq!(backend.user, "app");
        assert_eq!(backend.host, "db.internal");
        assert_eq!(backend.database, "appdb");
        assert_eq!(backend.password, "secret");
        assert_eq!(backend.port, 5432);
        assert_eq!(backend.max_pool_size, DEFAULT_MAX_POOL_SIZE);
    }

    #[test]
    fn test_backend_optional_settings() {
        let mut env = backend_env("ARCHIVE");
        env.insert("ARCHIVE_MAX_POOL_SIZE".to_string(), "2".to_string());
        env.insert("ARCHIVE_TYPE".to_string(), "mysql".to_string());
        let backend = BackendConfig::from_env("archive", TlsPolicy::Strict, &env).unwrap();
        assert_eq!(backend.max_pool_size, 2);
        assert_eq!(backend.db_type, DatabaseType::MySQL);
    }

    #[test]
    fn test_missing_variable_fails_fast() {
        let mut env = backend_env("PRIMARY");
        env.remove("PRIMARY_HOST");
        let err = BackendConfig::from_env("primary", TlsPolicy::Strict, &env).unwrap_err();
        assert!(matches!(err, ExtensionError::Configuration { .. }));
        assert!(err.to_string().contains("PRIMARY_HOST is not set"));
    }

    #[test]
    fn test_empty_variable_fails_fast() {
        let mut env = backend_env("PRIMARY");
        env.insert("PRIMARY_PASSWORD".to_string(), "  ".to_string());
        let err = BackendConfig::from_env("primary", TlsPolicy::Strict, &env).unwrap_err();
        assert!(err.to_string().contains("PRIMARY_PASSWORD is empty"));
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let mut env = backend_env("PRIMARY");
        env.insert("PRIMARY_PORT".to_string(), "undefined".to_string());
        let err = BackendConfig::from_env("primary", TlsPolicy::Strict, &env).unwrap_err();
        assert!(err.to_string().contains("PRIMARY_PORT"));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut env = backend_env("PRIMARY");
        env.insert("PRIMARY_MAX_POOL_SIZE".to_string(), "0".to_string());
        assert!(BackendConfig::from_env("primary", TlsPolicy::Strict, &env).is_err());
    }

    #[test]
    fn test_load_backends_keeps_order_and_rejects_duplicates() {
        let mut env = backend_env("PRIMARY");
        env.extend(backend_env("ARCHIVE"));

        let config = Config {
            backends: vec!["primary".to_string(), "archive".to_string()],
            ..Config::default()
        };
        let backends = config.load_backends(&env).unwrap();
        let names: Vec<_> = backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["primary", "archive"]);

        let config = Config {
            backends: vec!["primary".to_string(), "primary".to_string()],
            ..Config::default()
        };
        assert!(config.load_backends(&env).is_err());
    }

    #[test]
    fn test_load_backends_rejects_shared_env_prefix() {
        let env = backend_env("REPORTING_DB");
        let config = Config {
            backends: vec!["reporting-db".to_string(), "reporting_db".to_string()],
            ..Config::default()
        };
        let err = config.load_backends(&env).unwrap_err();
        assert!(matches!(err, ExtensionError::Configuration { .. }));
        let message = err.to_string();
        assert!(message.contains("'reporting-db' and 'reporting_db'"), "{message}");
        assert!(message.contains("REPORTING_DB_*"), "{message}");

        let config = Config {
            backends: vec!["reporting-db".to_string()],
            ..Config::default()
        };
        assert_eq!(config.load_backends(&env).unwrap()[0].name, "reporting-db");
    }

    #[test]
    fn test_best_effort_tolerates_only_timeouts() {
        let io_timeout: ExtensionError = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ))
        .into();
        let pool_timeout: ExtensionError = sqlx::Error::PoolTimedOut.into();
        let refused: ExtensionError = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
        .into();

        assert!(ProbePolicy::BestEffort.tolerates(&io_timeout));
        assert!(ProbePolicy::BestEffort.tolerates(&pool_timeout));
        assert!(!ProbePolicy::BestEffort.tolerates(&refused));
        assert!(!ProbePolicy::Strict.tolerates(&io_timeout));
        assert!(!ProbePolicy::Strict.tolerates(&pool_timeout));
    }

    #[test]
    fn test_blob_config_from_env() {
        let mut env = HashMap::new();
        env.insert(BLOB_ACCOUNT_NAME_VAR.to_string(), "acct".to_string());
        env.insert(BLOB_CONTAINER_NAME_VAR.to_string(), "docs".to_string());
        assert!(BlobStorageConfig::from_env(&env).is_err());

        env.insert(BLOB_ACCOUNT_KEY_VAR.to_string(), "c2VjcmV0".to_string());
        let blob = BlobStorageConfig::from_env(&env).unwrap();
        assert_eq!(blob.account_name, "acct");
        assert_eq!(blob.container_name, "docs");
    }
}
