//! Service error types.
//!
//! Every variant maps to a stable error code and an HTTP status. The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(StoreError::LinkageMissing { .. })`. Messages carry enough
//! context to diagnose (backend kind, object key, operation) but never
//! credentials.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::lifecycle::{ObjectStatus, Operation};

/// Error taxonomy of the capability and reconciliation core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required backend configuration value is missing or malformed.
    /// Fatal to backend construction; retrying without an operator fix
    /// cannot succeed.
    #[error("missing or malformed required configuration value: {key}")]
    ConfigurationIncomplete { key: String },

    /// The backend session or client could not be constructed or reached.
    /// Transient; the caller may retry.
    #[error("storage backend '{backend}' unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },

    /// The bucket a capability was requested against does not exist.
    #[error("bucket does not exist: {bucket}")]
    BucketNotFound { bucket: String },

    /// The object a GET/HEAD capability was requested for does not exist.
    #[error("object does not exist: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// An operation outside {GET, PUT, HEAD} was requested, or a facility
    /// (such as event listening) was requested of a backend kind that does
    /// not provide it.
    #[error("operation not supported: {operation}")]
    OperationUnsupported { operation: String },

    /// More than one metadata record matched a canonical object name during
    /// reconciliation. Data-integrity violation; never auto-resolved.
    #[error("reconciliation matched {matched} records for canonical name '{canonical}'")]
    ReconciliationConflict { canonical: String, matched: u64 },

    /// A capability was requested for a record whose bucket/location
    /// linkage has not been persisted yet.
    #[error("record {id} has no bucket/location linkage")]
    LinkageMissing { id: i64 },

    /// The record's lifecycle state does not permit issuing a capability
    /// for the requested operation.
    #[error("capability {operation} not allowed in state {status}")]
    CapabilityDenied {
        status: ObjectStatus,
        operation: Operation,
    },

    /// A status update would move the record to an earlier or unrelated
    /// state.
    #[error("illegal transition from {from} to {to}")]
    InvalidTransition { from: ObjectStatus, to: ObjectStatus },

    /// No metadata record exists with the given id.
    #[error("no record with id {id}")]
    RecordNotFound { id: i64 },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// Metadata repository failure.
    #[error("metadata store error: {0}")]
    Metadata(#[from] anyhow::Error),
}

impl StoreError {
    /// Stable error code string, reported in responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ConfigurationIncomplete { .. } => "ConfigurationIncomplete",
            StoreError::BackendUnavailable { .. } => "BackendUnavailable",
            StoreError::BucketNotFound { .. } => "BucketNotFound",
            StoreError::ObjectNotFound { .. } => "ObjectNotFound",
            StoreError::OperationUnsupported { .. } => "OperationUnsupported",
            StoreError::ReconciliationConflict { .. } => "ReconciliationConflict",
            StoreError::LinkageMissing { .. } => "LinkageMissing",
            StoreError::CapabilityDenied { .. } => "CapabilityDenied",
            StoreError::InvalidTransition { .. } => "InvalidTransition",
            StoreError::RecordNotFound { .. } => "RecordNotFound",
            StoreError::InvalidArgument { .. } => "InvalidArgument",
            StoreError::Metadata(_) => "MetadataError",
        }
    }

    /// The HTTP status this error renders as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::ConfigurationIncomplete { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            StoreError::BucketNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::OperationUnsupported { .. } => StatusCode::BAD_REQUEST,
            StoreError::ReconciliationConflict { .. } => StatusCode::CONFLICT,
            StoreError::LinkageMissing { .. } => StatusCode::CONFLICT,
            StoreError::CapabilityDenied { .. } => StatusCode::CONFLICT,
            StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            StoreError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            StoreError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller may reasonably retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::BackendUnavailable { .. } | StoreError::Metadata(_)
        )
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": false,
            "code": self.code(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = StoreError::ConfigurationIncomplete {
            key: "MINIO_HOST".into(),
        };
        assert_eq!(err.code(), "ConfigurationIncomplete");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = StoreError::ObjectNotFound {
            bucket: "files".into(),
            key: "2-t1-d1-f.txt".into(),
        };
        assert_eq!(err.code(), "ObjectNotFound");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_configuration_incomplete_names_the_key() {
        let err = StoreError::ConfigurationIncomplete {
            key: "MINIO_BUCKET_NAME".into(),
        };
        assert!(err.to_string().contains("MINIO_BUCKET_NAME"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::BackendUnavailable {
            backend: "miniolocal".into(),
            detail: "connect timed out".into(),
        }
        .is_retryable());
        assert!(!StoreError::RecordNotFound { id: 9 }.is_retryable());
        assert!(!StoreError::ReconciliationConflict {
            canonical: "minio:files:0-a-b-c".into(),
            matched: 2,
        }
        .is_retryable());
    }
}
