//! Host extension exposing pooled SQL passthrough over one or more named
//! database backends, plus read-only signed URLs for blobs in one storage
//! container.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extension;
pub mod models;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use error::{ExtensionError, ExtensionResult};
pub use extension::{Extension, ExtensionMetadata, ExtensionState};
