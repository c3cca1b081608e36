//! Service SAS issuance for single blobs.
//!
//! A URL is signed locally with HMAC-SHA256 over the service SAS
//! string-to-sign; nothing is sent to the storage service and the blob is
//! never checked for existence.

use crate::error::{ExtensionError, ExtensionResult};
use crate::models::{BlobStorageConfig, SignedUrlGrant};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use url::Url;

/// Storage service version the signature is computed for.
pub const SAS_SERVICE_VERSION: &str = "2022-11-02";

/// `sr=b`: the grant covers one blob.
const SIGNED_RESOURCE_BLOB: &str = "b";

type HmacSha256 = Hmac<Sha256>;

/// Issues read-only signed URLs for blobs in one container.
#[derive(Clone)]
pub struct SignedUrlIssuer {
    config: BlobStorageConfig,
    key: Vec<u8>,
}

impl SignedUrlIssuer {
    /// Decode the account key and validate the endpoint once, at startup.
    pub fn new(config: BlobStorageConfig) -> ExtensionResult<Self> {
        let key = STANDARD
            .decode(config.account_key.trim())
            .map_err(|e| ExtensionError::signing(format!("Account key is not valid base64: {}", e)))?;
        if key.is_empty() {
            return Err(ExtensionError::signing("Account key is empty"));
        }
        Url::parse(&config.endpoint()).map_err(|e| {
            ExtensionError::configuration(format!(
                "Invalid storage account name '{}': {}",
                config.account_name, e
            ))
        })?;
        Ok(Self { config, key })
    }

    /// Signed URL for `blob_name`, valid from now for 15 minutes.
    pub fn issue_read_url(&self, blob_name: &str) -> ExtensionResult<String> {
        self.issue_read_url_at(blob_name, Utc::now())
    }

    /// Signed URL for `blob_name`, valid from `now` for 15 minutes.
    pub fn issue_read_url_at(&self, blob_name: &str, now: DateTime<Utc>) -> ExtensionResult<String> {
        if blob_name.is_empty() {
            return Err(ExtensionError::invalid_input("Blob name must not be empty"));
        }
        // URL normalization would drop these while the signature keeps them.
        if blob_name.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(ExtensionError::invalid_input(format!(
                "Blob name '{}' must not contain '.' or '..' path segments",
                blob_name
            )));
        }

        let grant = SignedUrlGrant::read_only(blob_name, now);
        let signature = self.sign(&grant)?;

        let mut url = Url::parse(&self.config.endpoint())
            .map_err(|e| ExtensionError::internal(format!("Invalid blob endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ExtensionError::internal("Blob endpoint cannot be a base URL"))?
            .clear()
            .push(&self.config.container_name)
            .extend(blob_name.split('/'));
        url.query_pairs_mut()
            .append_pair("sv", SAS_SERVICE_VERSION)
            .append_pair("spr", grant.protocol)
            .append_pair("st", &format_sas_time(grant.starts_on))
            .append_pair("se", &format_sas_time(grant.expires_on))
            .append_pair("sr", SIGNED_RESOURCE_BLOB)
            .append_pair("sp", grant.permissions)
            .append_pair("sig", &signature);

        debug!(
            blob = %blob_name,
            container = %self.config.container_name,
            expires_on = %grant.expires_on,
            "Issued signed blob URL"
        );
        Ok(url.into())
    }

    /// `base64(HMAC-SHA256(key, string_to_sign))`.
    pub fn sign(&self, grant: &SignedUrlGrant) -> ExtensionResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ExtensionError::signing(format!("Invalid signing key: {}", e)))?;
        mac.update(self.string_to_sign(grant).as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Service SAS string-to-sign for service versions 2020-12-06 and later.
    ///
    /// Identifier, IP range, snapshot, encryption scope and the response
    /// header overrides are never set and sign as empty lines.
    pub fn string_to_sign(&self, grant: &SignedUrlGrant) -> String {
        let canonical_resource = format!(
            "/blob/{}/{}/{}",
            self.config.account_name, self.config.container_name, grant.blob_name
        );
        let start = format_sas_time(grant.starts_on);
        let expiry = format_sas_time(grant.expires_on);

        [
            grant.permissions,
            start.as_str(),
            expiry.as_str(),
            canonical_resource.as_str(),
            "", // si
            "", // sip
            grant.protocol,
            SAS_SERVICE_VERSION,
            SIGNED_RESOURCE_BLOB,
            "", // snapshot
            "", // ses
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n")
    }
}

impl std::fmt::Debug for SignedUrlIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlIssuer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// ISO 8601 UTC without fractional seconds, e.g. `2024-05-01T12:00:00Z`.
pub fn format_sas_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
