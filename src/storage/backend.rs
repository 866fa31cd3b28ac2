//! Abstract capability-issuing backend trait.
//!
//! Every storage backend must implement [`StorageBackend`]. A backend
//! instance is scoped to a single object: it is constructed with the
//! object's key already resolved, mirroring how a capability is always
//! requested for one specific record.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::StoreError;
use crate::lifecycle::Operation;

/// Closed set of supported backend variants, selected once at startup
/// from the configured kind label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Any S3-compatible endpoint with static credentials (a local MinIO
    /// used through plain S3 calls, Ceph RGW, LocalStack, ...).
    GenericS3,
    /// AWS S3 through the standard default credential chain.
    AwsDefault,
    /// A MinIO deployment whose bucket notifications feed the
    /// reconciliation pipeline.
    MinioNotifying,
}

impl BackendKind {
    /// Resolve a configured kind label. The label `awss3` selects the AWS
    /// default-credential variant; any other label starting with `awss3`
    /// a generic endpoint; labels starting with `minio` the
    /// notification-capable variant.
    pub fn parse(label: &str) -> Result<Self, StoreError> {
        if label == "awss3" {
            Ok(BackendKind::AwsDefault)
        } else if label.starts_with("awss3") {
            Ok(BackendKind::GenericS3)
        } else if label.starts_with("minio") {
            Ok(BackendKind::MinioNotifying)
        } else {
            Err(StoreError::InvalidArgument {
                message: format!("invalid store kind: {label}"),
            })
        }
    }

    /// Whether this variant emits storage-side notifications that the
    /// reconciliation pipeline can subscribe to.
    pub fn supports_notifications(&self) -> bool {
        matches!(self, BackendKind::MinioNotifying)
    }
}

/// Network timeout applied to every backend SDK call. Nothing in this
/// core is allowed to block indefinitely.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Async capability-issuer contract, one implementation per
/// [`BackendKind`].
pub trait StorageBackend: Send + Sync {
    /// The (location, bucket) pair identifying where this backend places
    /// objects. Used immediately after record creation to link metadata to
    /// the physical location. Never fails.
    fn bucket_location(&self) -> (String, String);

    /// Produce a presigned URL authorizing `operation` on this backend's
    /// object for the configured validity window.
    ///
    /// `checksum` and `size` are bound into PUT capabilities when
    /// provided, so the store can refuse a body that does not match what
    /// the client registered.
    fn presigned_url(
        &self,
        operation: Operation,
        checksum: &str,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>>;
}

/// Request-scoped backend construction seam.
///
/// The lifecycle controller opens a fresh backend per issuance through
/// this trait; tests substitute a stub that needs neither credentials nor
/// a network.
pub trait BackendProvider: Send + Sync {
    fn open(
        &self,
        object_key: &str,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StorageBackend>, StoreError>> + Send + '_>>;
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_awss3_is_default_chain() {
        assert_eq!(BackendKind::parse("awss3").unwrap(), BackendKind::AwsDefault);
    }

    #[test]
    fn test_parse_awss3_prefix_is_generic() {
        assert_eq!(
            BackendKind::parse("awss3local").unwrap(),
            BackendKind::GenericS3
        );
        assert_eq!(
            BackendKind::parse("awss3test").unwrap(),
            BackendKind::GenericS3
        );
    }

    #[test]
    fn test_parse_minio_prefix() {
        assert_eq!(
            BackendKind::parse("minio").unwrap(),
            BackendKind::MinioNotifying
        );
        assert_eq!(
            BackendKind::parse("miniolocal").unwrap(),
            BackendKind::MinioNotifying
        );
    }

    #[test]
    fn test_parse_unknown_kind_rejected() {
        assert!(BackendKind::parse("gcs").is_err());
        assert!(BackendKind::parse("").is_err());
    }

    #[test]
    fn test_notification_support() {
        assert!(BackendKind::MinioNotifying.supports_notifications());
        assert!(!BackendKind::AwsDefault.supports_notifications());
        assert!(!BackendKind::GenericS3.supports_notifications());
    }
}
