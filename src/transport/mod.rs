//! Host transport for running the extension as a standalone process.

pub mod http;

pub use http::HttpTransport;

use crate::error::ExtensionResult;
use std::future::Future;

/// A host process that serves the extension until shut down.
pub trait Transport: Send + Sync {
    /// Serve until a shutdown signal, then run the extension's exit hook.
    fn run(&self) -> impl Future<Output = ExtensionResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
