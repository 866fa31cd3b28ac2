//! Notification-capable MinIO capability backend.
//!
//! Addressed through the S3 SDK with path-style URLs. Differs from the
//! generic backend in three ways that all come from how its deployments
//! are used:
//!
//! - presign validity is denominated in days, not minutes, because
//!   capability URLs are handed to devices that may stay offline for long
//!   windows;
//! - the bucket is created on first use (idempotently), and GET/HEAD
//!   capabilities require the object to already exist — an upload must
//!   have landed before a read capability makes sense;
//! - GET/HEAD URLs carry a content-disposition override so browsers save
//!   the object under its registered file name.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use tracing::debug;

use super::backend::StorageBackend;
use super::generic::{build_client, presign_error};
use crate::config::MinioBackendSettings;
use crate::errors::StoreError;
use crate::lifecycle::Operation;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Capability issuer for a notification-capable MinIO deployment, scoped
/// to one object.
pub struct MinioBackend {
    label: String,
    client: Client,
    bucket: String,
    object_key: String,
    /// Registered file name, used for the content-disposition override.
    filename: String,
    region: String,
    presign: Duration,
}

impl MinioBackend {
    pub async fn connect(
        label: &str,
        settings: MinioBackendSettings,
        object_key: String,
        filename: String,
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
            "opened minio backend"
        );

        Ok(Self {
            label: label.to_string(),
            client,
            bucket: settings.bucket,
            object_key,
            filename,
            region: settings.region,
            presign: Duration::from_secs(settings.presign_days * SECONDS_PER_DAY),
        })
    }

    /// Check bucket existence and create the bucket if absent. Idempotent:
    /// racing creators settle on "already owned".
    async fn assure_bucket_exists(&self) -> Result<(), StoreError> {
        debug!(bucket = %self.bucket, "checking bucket");
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(StoreError::BackendUnavailable {
                        backend: self.label.clone(),
                        detail: format!("head_bucket '{}' failed: {service_err}", self.bucket),
                    });
                }
            }
        }

        debug!(bucket = %self.bucket, "bucket absent, creating");
        let constraint = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
            .build();
        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .create_bucket_configuration(constraint)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_bucket_already_owned_by_you()
                    || service_err.is_bucket_already_exists()
                {
                    Ok(())
                } else {
                    Err(StoreError::BackendUnavailable {
                        backend: self.label.clone(),
                        detail: format!("create_bucket '{}' failed: {service_err}", self.bucket),
                    })
                }
            }
        }
    }

    /// Check that both the bucket and the object exist. Used before read
    /// capabilities: a GET on an object nothing was uploaded to would only
    /// fail later, at the store, with less context.
    async fn assure_bucket_object_exist(&self) -> Result<(), StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {}
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    return Err(StoreError::BucketNotFound {
                        bucket: self.bucket.clone(),
                    });
                }
                return Err(StoreError::BackendUnavailable {
                    backend: self.label.clone(),
                    detail: format!("head_bucket '{}' failed: {service_err}", self.bucket),
                });
            }
        }

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.object_key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Err(StoreError::ObjectNotFound {
                        bucket: self.bucket.clone(),
                        key: self.object_key.clone(),
                    })
                } else {
                    Err(StoreError::BackendUnavailable {
                        backend: self.label.clone(),
                        detail: format!(
                            "head_object '{}/{}' failed: {service_err}",
                            self.bucket, self.object_key
                        ),
                    })
                }
            }
        }
    }

    fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

impl StorageBackend for MinioBackend {
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
            // PUT creates the object, so only the bucket must pre-exist;
            // GET/HEAD additionally require the object itself.
            match operation {
                Operation::Put => self.assure_bucket_exists().await?,
                Operation::Get | Operation::Head => {
                    self.assure_bucket_exists().await?;
                    self.assure_bucket_object_exist().await?;
                }
            }

            let config = PresigningConfig::expires_in(self.presign)
                .map_err(|e| presign_error(&self.label, operation, &self.object_key, e))?;

            let presigned = match operation {
                Operation::Get => self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&self.object_key)
                    .response_content_disposition(self.content_disposition())
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

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    #[test]
    fn test_presign_days_conversion() {
        // 2 days of validity expressed in seconds.
        assert_eq!(2 * super::SECONDS_PER_DAY, 172_800);
    }

    #[test]
    fn test_content_disposition_format() {
        let disposition = format!("attachment; filename=\"{}\"", "report.pdf");
        assert_eq!(disposition, "attachment; filename=\"report.pdf\"");
    }
}
