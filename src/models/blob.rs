//! Blob storage models.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifetime of every signed URL.
pub const SIGNED_URL_VALIDITY_MINUTES: i64 = 15;

/// Static blob account configuration.
#[derive(Clone)]
pub struct BlobStorageConfig {
    pub account_name: String,
    pub container_name: String,
    /// Base64 account key. Contains sensitive data - never log
    pub account_key: String,
}

impl BlobStorageConfig {
    pub fn new(
        account_name: impl Into<String>,
        container_name: impl Into<String>,
        account_key: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            container_name: container_name.into(),
            account_key: account_key.into(),
        }
    }

    /// `https://<account>.blob.core.windows.net`
    pub fn endpoint(&self) -> String {
        format!("https://{}.blob.core.windows.net", self.account_name)
    }
}

impl std::fmt::Debug for BlobStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStorageConfig")
            .field("account_name", &self.account_name)
            .field("container_name", &self.container_name)
            .field("account_key", &"****")
            .finish()
    }
}

/// Scope of one signed URL. Generated per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrlGrant {
    pub blob_name: String,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
    /// `r`
    pub permissions: &'static str,
    /// `https`
    pub protocol: &'static str,
}

impl SignedUrlGrant {
    /// Read-only, https-only grant valid for [`SIGNED_URL_VALIDITY_MINUTES`] from `now`.
    pub fn read_only(blob_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            blob_name: blob_name.into(),
            starts_on: now,
            expires_on: now + chrono::Duration::minutes(SIGNED_URL_VALIDITY_MINUTES),
            permissions: "r",
            protocol: "https",
        }
    }
}
