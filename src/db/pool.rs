//! Connection pool management.
//!
//! One database-specific pool (PgPool, MySqlPool, SqlitePool) per named
//! backend. The registry is built once at startup and handed to the route
//! dispatcher; it is never global state.

use crate::error::{ExtensionError, ExtensionResult};
use crate::models::{BackendConfig, DatabaseType, TlsPolicy};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// How long a request waits for a free connection before failing.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Build a pool for `config` without opening any connection yet.
    ///
    /// Connections are established on first use, so an unreachable backend
    /// does not prevent startup; the connectivity probe surfaces it instead.
    pub fn connect_lazy(config: &BackendConfig) -> ExtensionResult<Self> {
        let acquire_timeout = Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        match config.db_type {
            DatabaseType::PostgreSQL => {
                let ssl_mode = match config.tls {
                    TlsPolicy::Strict => PgSslMode::VerifyFull,
                    TlsPolicy::InsecureAcceptInvalidCerts => PgSslMode::Require,
                };
                let options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.database)
                    .ssl_mode(ssl_mode);

                let pool = PgPoolOptions::new()
                    .max_connections(config.max_pool_size)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options);
                Ok(DbPool::Postgres(pool))
            }
            DatabaseType::MySQL => {
                let ssl_mode = match config.tls {
                    TlsPolicy::Strict => MySqlSslMode::VerifyIdentity,
                    TlsPolicy::InsecureAcceptInvalidCerts => MySqlSslMode::Required,
                };
                let options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.database)
                    .ssl_mode(ssl_mode)
                    .charset("utf8mb4");

                let pool = MySqlPoolOptions::new()
                    .max_connections(config.max_pool_size)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options);
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::SQLite => Err(ExtensionError::configuration(format!(
                "Backend '{}': SQLite pools must be registered directly",
                config.name
            ))),
        }
    }

    /// Borrow one connection and give it straight back.
    pub async fn acquire_and_release(&self) -> Result<(), sqlx::Error> {
        match self {
            DbPool::Postgres(pool) => pool.acquire().await.map(drop),
            DbPool::MySql(pool) => pool.acquire().await.map(drop),
            DbPool::SQLite(pool) => pool.acquire().await.map(drop),
        }
    }

    /// Close the connection pool. Safe to call more than once.
    pub async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::MySql(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Connections currently open (idle or lent out).
    pub fn size(&self) -> u32 {
        match self {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::MySql(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }
}

/// Named backend pools, in configuration order.
///
/// The first registered backend is the default one.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    order: Vec<String>,
    pools: HashMap<String, DbPool>,
    closed: AtomicBool,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one lazily-connecting pool per backend.
    pub fn from_configs(configs: &[BackendConfig]) -> ExtensionResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            info!(
                backend = %config.name,
                target = %config.display_target(),
                max_pool_size = config.max_pool_size,
                tls = ?config.tls,
                "Creating connection pool"
            );
            let pool = DbPool::connect_lazy(config)?;
            registry.insert(&config.name, pool)?;
        }
        Ok(registry)
    }

    /// Register a pool under `name`.
    pub fn insert(&mut self, name: impl Into<String>, pool: DbPool) -> ExtensionResult<()> {
        let name = name.into();
        BackendConfig::validate_name(&name)
            .map_err(|e| ExtensionError::configuration(e.to_string()))?;
        if self.pools.contains_key(&name) {
            return Err(ExtensionError::configuration(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        debug!(backend = %name, db_type = %pool.db_type(), "Registered pool");
        self.order.push(name.clone());
        self.pools.insert(name, pool);
        Ok(())
    }

    /// Get the pool for a backend.
    pub fn get(&self, name: &str) -> ExtensionResult<DbPool> {
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| ExtensionError::backend_not_found(name))
    }

    /// Name of the backend serving the unprefixed query route.
    pub fn default_backend(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    /// Backend names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every pool.
    ///
    /// Pools stay registered, so later queries fail with a connection error
    /// rather than an unknown-backend error.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Pools already closed");
            return;
        }
        for name in &self.order {
            if let Some(pool) = self.pools.get(name) {
                info!(backend = %name, "Closing connection pool");
                pool.close().await;
            }
        }
        info!("All connection pools closed");
    }
}
