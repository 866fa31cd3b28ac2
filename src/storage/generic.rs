//! Generic S3-compatible capability backend.
//!
//! Talks to any S3-compatible endpoint (a local MinIO, Ceph RGW,
//! LocalStack, real AWS) with static credentials and an explicit endpoint
//! resolved from `{KIND}_*` environment values. Path-style addressing is
//! forced so bucket names do not have to resolve in DNS.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use tracing::debug;

use super::backend::{StorageBackend, OPERATION_TIMEOUT};
use crate::config::GenericBackendSettings;
use crate::errors::StoreError;
use crate::lifecycle::Operation;

/// Capability issuer for a generic S3-compatible endpoint, scoped to one
/// object.
pub struct GenericS3Backend {
    /// Configured kind label, persisted as the record location.
    label: String,
    /// S3 SDK client, freshly constructed per request.
    client: Client,
    /// Target bucket.
    bucket: String,
    /// Full object key within the bucket.
    object_key: String,
    /// Presign validity window.
    presign: Duration,
}

impl GenericS3Backend {
    /// Build the SDK client from resolved settings and connect.
    pub async fn connect(
        label: &str,
        settings: GenericBackendSettings,
        object_key: String,
    ) -> Result<Self, StoreError> {
        let client = build_client(
            settings.endpoint_url(),
            settings.region.clone(),
            &settings.access_key_id,
            &settings.secret_access_key,
        )
        .await;

        debug!(
            label,
            endpoint = %settings.endpoint_url(),
            bucket = %settings.bucket,
            key = %object_key,
            "opened generic s3 backend"
        );

        Ok(Self {
            label: label.to_string(),
            client,
            bucket: settings.bucket,
            object_key,
            presign: Duration::from_secs(settings.presign_minutes * 60),
        })
    }
}

/// Construct an S3 client against an explicit endpoint with static
/// credentials and the global operation timeout.
pub(crate) async fn build_client(
    endpoint: String,
    region: String,
    access_key_id: &str,
    secret_access_key: &str,
) -> Client {
    let credentials = aws_sdk_s3::config::Credentials::new(
        access_key_id,
        secret_access_key,
        None, // session token
        None, // expiry
        "filestore-config",
    );

    let timeouts = aws_config::timeout::TimeoutConfig::builder()
        .operation_timeout(OPERATION_TIMEOUT)
        .build();

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region))
        .endpoint_url(endpoint)
        .credentials_provider(credentials)
        .timeout_config(timeouts)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();

    Client::from_conf(s3_config)
}

/// Map a presigning failure to the retryable backend error, keeping the
/// kind and object context but no credentials.
pub(super) fn presign_error(
    label: &str,
    operation: Operation,
    key: &str,
    err: impl std::fmt::Display,
) -> StoreError {
    StoreError::BackendUnavailable {
        backend: label.to_string(),
        detail: format!("presign {operation} for key '{key}' failed: {err}"),
    }
}

impl StorageBackend for GenericS3Backend {
    fn bucket_location(&self) -> (String, String) {
        (self.label.clone(), self.bucket.clone())
    }

    fn presigned_url(
        &self,
        operation: Operation,
        checksum: &str,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        let checksum = checksum.to_string();
        Box::pin(async move {
            let config = PresigningConfig::expires_in(self.presign)
                .map_err(|e| presign_error(&self.label, operation, &self.object_key, e))?;

            let presigned = match operation {
                Operation::Get => self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&self.object_key)
                    .presigned(config)
                    .await
                    .map_err(|e| presign_error(&self.label, operation, &self.object_key, e))?,
                Operation::Head => self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(&self.object_key)
                    .presigned(config)
                    .await
                    .map_err(|e| presign_error(&self.label, operation, &self.object_key, e))?,
                Operation::Put => {
                    let mut request = self
                        .client
                        .put_object()
                        .bucket(&self.bucket)
                        .key(&self.object_key);
                    // Bind the registered checksum and length into the
                    // capability so the store rejects a mismatched body.
                    if !checksum.is_empty() {
                        request = request.checksum_sha256(checksum);
                    }
                    if size > 0 {
                        request = request.content_length(size);
                    }
                    request
                        .presigned(config)
                        .await
                        .map_err(|e| presign_error(&self.label, operation, &self.object_key, e))?
                }
            };

            let url = presigned.uri().to_string();
            debug!(label = %self.label, %operation, key = %self.object_key, "issued presigned url");
            Ok(url)
        })
    }
}

// -- Tests --------------------------------------------------------------------
