//! Object-store capability backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where capability
//! URLs are minted. Implementations cover a generic S3-compatible
//! endpoint, AWS S3 via the default credential chain, and a
//! notification-capable MinIO deployment. The service never moves object
//! bytes itself; a backend's only job is to authenticate *operations* by
//! issuing time-bounded presigned URLs, so a leaked URL is worth one
//! object, one method, one time window.

use std::future::Future;
use std::pin::Pin;

pub mod aws;
pub mod backend;
pub mod generic;
pub mod minio;

use crate::config::{DefaultBackendSettings, GenericBackendSettings, MinioBackendSettings};
use crate::errors::StoreError;
use backend::{BackendKind, BackendProvider, StorageBackend};

/// Backend provider resolving credentials from `{KIND}_*` environment
/// variables on every open.
///
/// Issuance is request-scoped by design: each call constructs a fresh SDK
/// client rather than sharing a pooled handle across concurrent requests.
pub struct EnvBackendProvider {
    kind: BackendKind,
    label: String,
}

impl EnvBackendProvider {
    /// Parse the configured kind label once at startup; request-time
    /// dispatch is over the closed [`BackendKind`] set, never over string
    /// prefixes.
    pub fn new(label: &str) -> Result<Self, StoreError> {
        let kind = BackendKind::parse(label)?;
        Ok(Self {
            kind,
            label: label.to_string(),
        })
    }

    /// The configured kind label (doubles as the record `location`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The resolved backend variant.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl BackendProvider for EnvBackendProvider {
    fn open(
        &self,
        object_key: &str,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StorageBackend>, StoreError>> + Send + '_>>
    {
        let object_key = object_key.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            match self.kind {
                BackendKind::GenericS3 => {
                    let settings = GenericBackendSettings::from_env(&self.label)?;
                    settings.log();
                    let backend =
                        generic::GenericS3Backend::connect(&self.label, settings, object_key)
                            .await?;
                    Ok(Box::new(backend) as Box<dyn StorageBackend>)
                }
                BackendKind::AwsDefault => {
                    let settings = DefaultBackendSettings::from_env(&self.label)?;
                    settings.log();
                    let backend =
                        aws::AwsDefaultBackend::connect(&self.label, settings, object_key).await?;
                    Ok(Box::new(backend) as Box<dyn StorageBackend>)
                }
                BackendKind::MinioNotifying => {
                    let settings = MinioBackendSettings::from_env(&self.label)?;
                    settings.log();
                    let backend =
                        minio::MinioBackend::connect(&self.label, settings, object_key, filename)
                            .await?;
                    Ok(Box::new(backend) as Box<dyn StorageBackend>)
                }
            }
        })
    }
}
