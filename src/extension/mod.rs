//! The extension as seen by its host.
//!
//! A host calls [`Extension::init`] once with its router and
//! [`Extension::exit`] once on shutdown. Everything the route handlers need
//! travels in [`ExtensionState`].

pub mod routes;

use crate::config::ProbePolicy;
use crate::db::{PoolRegistry, QueryExecutor};
use crate::error::ExtensionResult;
use crate::storage::SignedUrlIssuer;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Catalog record describing the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtensionMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const METADATA: ExtensionMetadata = ExtensionMetadata {
    id: "db-blob",
    name: "Database and blob access",
    description: "Runs SQL against pooled database backends and issues read-only signed blob URLs",
};

/// Shared state handed to every route handler.
#[derive(Debug, Clone)]
pub struct ExtensionState {
    pub registry: Arc<PoolRegistry>,
    pub executor: QueryExecutor,
    pub issuer: Arc<SignedUrlIssuer>,
}

#[derive(Debug, Clone)]
pub struct Extension {
    state: ExtensionState,
}

impl Extension {
    pub fn new(registry: PoolRegistry, issuer: SignedUrlIssuer) -> Self {
        Self {
            state: ExtensionState {
                registry: Arc::new(registry),
                executor: QueryExecutor::new(),
                issuer: Arc::new(issuer),
            },
        }
    }

    pub fn metadata(&self) -> &'static ExtensionMetadata {
        &METADATA
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.state.registry
    }

    /// Register every route on the host's `router`.
    pub fn init(&self, router: Router) -> Router {
        info!(
            extension = METADATA.id,
            backends = ?self.state.registry.names().collect::<Vec<_>>(),
            "Registering extension routes"
        );
        router.merge(routes::router(self.state.clone()))
    }

    /// Close every backend pool. Safe to call more than once.
    pub async fn exit(&self) {
        info!(extension = METADATA.id, "Shutting down extension");
        self.state.registry.close_all().await;
    }

    /// Run a connectivity probe against every backend, in order.
    ///
    /// Stops at the first backend whose probe fails under `policy`.
    pub async fn probe_backends(&self, policy: ProbePolicy) -> ExtensionResult<()> {
        for name in self.state.registry.names() {
            let pool = self.state.registry.get(name)?;
            info!(backend = %name, policy = %policy, "Probing backend");
            self.state.executor.connect_probe(&pool, policy).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::models::BlobStorageConfig;
    use sqlx::sqlite::SqlitePoolOptions;

    fn issuer() -> SignedUrlIssuer {
        SignedUrlIssuer::new(BlobStorageConfig::new("acct", "docs", "c2VjcmV0LWtleQ==")).unwrap()
    }

    async fn extension() -> Extension {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let mut registry = PoolRegistry::new();
        registry.insert("main", DbPool::SQLite(pool)).unwrap();
        Extension::new(registry, issuer())
    }

    #[test]
    fn test_metadata() {
        assert_eq!(METADATA.id, "db-blob");
        assert!(!METADATA.description.is_empty());
    }

    #[tokio::test]
    async fn test_probe_backends() {
        let extension = extension().await;
        assert_eq!(extension.metadata(), &METADATA);
        extension.probe_backends(ProbePolicy::Strict).await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_is_idempotent() {
        let extension = extension().await;
        extension.exit().await;
        extension.exit().await;
        assert!(extension.registry().is_closed());
        assert!(extension.probe_backends(ProbePolicy::BestEffort).await.is_err());
    }
}
