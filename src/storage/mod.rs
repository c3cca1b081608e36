//! Blob storage access.

pub mod sas;

pub use sas::{SAS_SERVICE_VERSION, SignedUrlIssuer};
