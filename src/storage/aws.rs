//! AWS S3 capability backend using the default credential chain.
//!
//! No endpoint or static keys are configured here: credentials, region,
//! and endpoint all resolve through the standard AWS chain (env vars,
//! `~/.aws/credentials`, IAM role, ...). Only the bucket name and presign
//! validity come from `{KIND}_*` environment values.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use tracing::debug;

use super::backend::{StorageBackend, OPERATION_TIMEOUT};
use super::generic::presign_error;
use crate::config::DefaultBackendSettings;
use crate::errors::StoreError;
use crate::lifecycle::Operation;

/// Capability issuer for AWS S3 via the default credential chain, scoped
/// to one object.
pub struct AwsDefaultBackend {
    label: String,
    client: Client,
    bucket: String,
    object_key: String,
    presign: Duration,
}

impl AwsDefaultBackend {
    pub async fn connect(
        label: &str,
        settings: DefaultBackendSettings,
        object_key: String,
    ) -> Result<Self, StoreError> {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(OPERATION_TIMEOUT)
            .build();

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .timeout_config(timeouts)
            .load()
            .await;
        let client = Client::new(&sdk_config);

        debug!(label, bucket = %settings.bucket, key = %object_key, "opened aws default backend");

        Ok(Self {
            label: label.to_string(),
            client,
            bucket: settings.bucket,
            object_key,
            presign: Duration::from_secs(settings.presign_minutes * 60),
        })
    }
}

impl StorageBackend for AwsDefaultBackend {
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
