//! Data models for the extension.
//!
//! This module re-exports all model types used throughout the crate.

pub mod blob;
pub mod connection;
pub mod query;

// Re-export commonly used types
pub use blob::{BlobStorageConfig, SIGNED_URL_VALIDITY_MINUTES, SignedUrlGrant};
pub use connection::{
    BackendConfig, BackendConfigError, DEFAULT_MAX_POOL_SIZE, DatabaseType, TlsPolicy,
};
pub use query::{QueryParam, QueryRequest, QueryResult};
