//! db-blob-extension host binary.
//!
//! Loads every backend and the blob account from the environment, probes the
//! backends, then serves the extension routes over HTTP.

use clap::Parser;
use db_blob_extension::auth::AuthConfig;
use db_blob_extension::config::{Config, ProcessEnv};
use db_blob_extension::db::PoolRegistry;
use db_blob_extension::models::BlobStorageConfig;
use db_blob_extension::storage::SignedUrlIssuer;
use db_blob_extension::transport::{HttpTransport, Transport};
use db_blob_extension::Extension;
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        backends = ?config.backends,
        probe_policy = %config.probe_policy,
        insecure_tls = config.insecure_tls,
        "Starting db-blob-extension v{}",
        env!("CARGO_PKG_VERSION")
    );

    let env = ProcessEnv;
    let backends = config.load_backends(&env).inspect_err(|e| {
        error!(error = %e, "Invalid backend configuration");
    })?;
    let blob_config = BlobStorageConfig::from_env(&env).inspect_err(|e| {
        error!(error = %e, "Invalid blob storage configuration");
    })?;
    let auth = AuthConfig::from_tokens(&config.auth_tokens)?;

    let registry = PoolRegistry::from_configs(&backends)?;
    let issuer = SignedUrlIssuer::new(blob_config)?;
    let extension = Extension::new(registry, issuer);

    if let Err(e) = extension.probe_backends(config.probe_policy).await {
        error!(error = %e, "Backend probe failed");
        extension.exit().await;
        return Err(e.into());
    }

    let transport = HttpTransport::new(extension, auth, &config.http_host, config.http_port);
    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
