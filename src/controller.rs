//! Lifecycle controller.
//!
//! The single place where client-visible actions meet the state machine.
//! Every capability issuance and every metadata mutation on the request
//! path goes through here, so the lifecycle rules — no capability without
//! linkage, no capability in a denying state, no backwards transition —
//! are enforced once, before any backend call is made.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::lifecycle::{ObjectStatus, Operation};
use crate::metadata::store::{FileRecord, MetadataStore};
use crate::metrics::CAPABILITIES_ISSUED_TOTAL;
use crate::namespace;
use crate::storage::backend::{BackendProvider, StorageBackend};

/// Orchestrates record creation, linkage, capability issuance, and
/// client-driven updates.
pub struct LifecycleController {
    metadata: Arc<dyn MetadataStore>,
    backends: Arc<dyn BackendProvider>,
    /// Configured store kind label; persisted as each record's location.
    location: String,
    namespace_modulus: u64,
    checksum_type: String,
}

impl LifecycleController {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        backends: Arc<dyn BackendProvider>,
        store: &StoreConfig,
    ) -> Self {
        Self {
            metadata,
            backends,
            location: store.kind.clone(),
            namespace_modulus: store.namespace_modulus,
            checksum_type: store.checksum_type.clone(),
        }
    }

    /// The configured store kind label.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Recompute the object key for a record. The key is derived from the
    /// id and identity triple, never persisted.
    fn object_key_for(&self, record: &FileRecord) -> String {
        namespace::object_key(
            self.namespace_modulus,
            record.id,
            &record.tenant_id,
            &record.device_id,
            &record.name,
        )
    }

    /// Create a record, link it to its bucket, and mint the PUT capability
    /// the client uploads through.
    ///
    /// The record is created in `New`, linked immediately (a capability
    /// must never exist for an unlinked record), and advanced to `Created`
    /// once the capability has been issued.
    pub async fn issue_create_capability(
        &self,
        tenant_id: &str,
        device_id: &str,
        name: &str,
        checksum: &str,
        size: i64,
    ) -> Result<(FileRecord, String), StoreError> {
        let record = self
            .metadata
            .create(
                tenant_id,
                device_id,
                name,
                &self.checksum_type,
                checksum,
                size,
            )
            .await?;
        debug!(id = record.id, tenant = tenant_id, device = device_id, "created metadata record");

        let key = self.object_key_for(&record);
        let backend = self.backends.open(&key, &record.name).await?;
        let record = self.link_record(record, backend.as_ref()).await?;

        let url = backend
            .presigned_url(Operation::Put, &record.checksum, record.size)
            .await?;
        counter!(CAPABILITIES_ISSUED_TOTAL,
            "operation" => Operation::Put.as_str(), "backend" => self.location.clone())
        .increment(1);

        let record = self
            .metadata
            .update_by_id(record.id, ObjectStatus::Created, None, None)
            .await?
            .ok_or(StoreError::RecordNotFound { id: record.id })?;

        info!(id = record.id, key = %key, "issued create capability");
        Ok((record, url))
    }

    /// Mint a capability for an existing record.
    ///
    /// Preconditions run before any backend call: the record must exist,
    /// must be linked to a bucket, and must be in a state that permits the
    /// operation.
    pub async fn issue_access_capability(
        &self,
        id: i64,
        operation: Operation,
    ) -> Result<(FileRecord, String), StoreError> {
        let record = self
            .metadata
            .read_by_id(id)
            .await?
            .ok_or(StoreError::RecordNotFound { id })?;

        if !record.is_linked() {
            return Err(StoreError::LinkageMissing { id });
        }
        if !record.status.allows_capability(operation) {
            return Err(StoreError::CapabilityDenied {
                status: record.status,
                operation,
            });
        }

        let key = self.object_key_for(&record);
        let backend = self.backends.open(&key, &record.name).await?;
        let url = backend
            .presigned_url(operation, &record.checksum, record.size)
            .await?;
        counter!(CAPABILITIES_ISSUED_TOTAL,
            "operation" => operation.as_str(), "backend" => self.location.clone())
        .increment(1);

        info!(id, %operation, key = %key, "issued access capability");
        Ok((record, url))
    }

    /// Resolve the backend's bucket location and persist the linkage for
    /// an existing record.
    pub async fn link_and_persist(&self, id: i64) -> Result<FileRecord, StoreError> {
        let record = self
            .metadata
            .read_by_id(id)
            .await?
            .ok_or(StoreError::RecordNotFound { id })?;
        let key = self.object_key_for(&record);
        let backend = self.backends.open(&key, &record.name).await?;
        self.link_record(record, backend.as_ref()).await
    }

    /// Persist the bucket/location pair reported by an already-open
    /// backend.
    async fn link_record(
        &self,
        mut record: FileRecord,
        backend: &dyn StorageBackend,
    ) -> Result<FileRecord, StoreError> {
        let (location, bucket) = backend.bucket_location();
        self.metadata
            .link_bucket_location(record.id, &bucket, &location)
            .await?;
        debug!(id = record.id, bucket = %bucket, location = %location, "linked bucket location");
        record.bucket = Some(bucket);
        record.location = Some(location);
        Ok(record)
    }

    /// Read one record.
    pub async fn read_file(&self, id: i64) -> Result<FileRecord, StoreError> {
        self.metadata
            .read_by_id(id)
            .await?
            .ok_or(StoreError::RecordNotFound { id })
    }

    /// Read all records of a (tenant, device) pair.
    pub async fn read_files(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self.metadata.read_by_filter(tenant_id, device_id).await?)
    }

    /// Client-driven update (PATCH): new status plus optional checksum and
    /// size corrections. The monotonic transition rule applies.
    pub async fn update_file(
        &self,
        id: i64,
        status: ObjectStatus,
        checksum: Option<String>,
        size: Option<i64>,
    ) -> Result<FileRecord, StoreError> {
        let record = self
            .metadata
            .read_by_id(id)
            .await?
            .ok_or(StoreError::RecordNotFound { id })?;
        record.status.check_transition(status)?;

        self.metadata
            .update_by_id(id, status, checksum, size)
            .await?
            .ok_or(StoreError::RecordNotFound { id })
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::StoreConfig;
    use crate::events::reconcile::Reconciler;
    use crate::events::notification::EventRecord;
    use crate::metadata::memory::MemoryMetadataStore;

    /// Backend stub: deterministic URLs, no credentials, no network.
    struct StubBackend {
        location: String,
        bucket: String,
        object_key: String,
    }

    impl StorageBackend for StubBackend {
        fn bucket_location(&self) -> (String, String) {
            (self.location.clone(), self.bucket.clone())
        }

        fn presigned_url(
            &self,
            operation: Operation,
            _checksum: &str,
            _size: i64,
        ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
            Box::pin(async move {
                Ok(format!(
                    "https://stub.local/{}/{}?op={}",
                    self.bucket, self.object_key, operation
                ))
            })
        }
    }

    /// Provider stub counting how often a backend was opened.
    struct StubProvider {
        opens: AtomicUsize,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                opens: AtomicUsize::new(0),
            }
        }
    }

    impl BackendProvider for StubProvider {
        fn open(
            &self,
            object_key: &str,
            _filename: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StorageBackend>, StoreError>> + Send + '_>>
        {
            let object_key = object_key.to_string();
            Box::pin(async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(StubBackend {
                    location: "minio".to_string(),
                    bucket: "files".to_string(),
                    object_key,
                }) as Box<dyn StorageBackend>)
            })
        }
    }

    fn controller_with(
        provider: Arc<StubProvider>,
    ) -> (LifecycleController, Arc<MemoryMetadataStore>) {
        let metadata = Arc::new(MemoryMetadataStore::new(10));
        let store = StoreConfig {
            kind: "minio".to_string(),
            namespace_modulus: 10,
            checksum_type: "SHA256".to_string(),
        };
        let controller = LifecycleController::new(metadata.clone(), provider, &store);
        (controller, metadata)
    }

    fn created_event(bucket: &str, key: &str) -> EventRecord {
        serde_json::from_value(serde_json::json!({
            "eventName": "s3:ObjectCreated:Put",
            "s3": {"bucket": {"name": bucket}, "object": {"key": key, "size": 3}},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_links_and_advances_to_created() {
        let provider = Arc::new(StubProvider::new());
        let (controller, _) = controller_with(provider);

        let (record, url) = controller
            .issue_create_capability("t1", "d1", "f.txt", "abc", 3)
            .await
            .unwrap();
        assert_eq!(record.status, ObjectStatus::Created);
        assert_eq!(record.bucket.as_deref(), Some("files"));
        assert_eq!(record.location.as_deref(), Some("minio"));
        assert!(url.contains("/files/"));
        assert!(url.ends_with("op=PUT"));
    }

    #[tokio::test]
    async fn test_full_lifecycle_scenario() {
        // Create -> PUT capability -> created notification -> Uploaded ->
        // replay -> still Uploaded.
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider);

        let (record, url) = controller
            .issue_create_capability("t1", "d1", "f.txt", "abc", 3)
            .await
            .unwrap();
        assert!(!url.is_empty());
        assert_eq!(record.status, ObjectStatus::Created);

        let key = namespace::object_key(10, record.id, "t1", "d1", "f.txt");
        let reconciler = Reconciler::new(metadata.clone(), "minio");
        for _ in 0..2 {
            reconciler
                .apply_record(&created_event("files", &key))
                .await
                .unwrap();
            let stored = metadata.read_by_id(record.id).await.unwrap().unwrap();
            assert_eq!(stored.status, ObjectStatus::Uploaded);
        }
    }

    #[tokio::test]
    async fn test_access_capability_after_upload() {
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider);

        let (record, _) = controller
            .issue_create_capability("t1", "d1", "f.txt", "abc", 3)
            .await
            .unwrap();
        metadata
            .update_by_id(record.id, ObjectStatus::Uploaded, None, None)
            .await
            .unwrap();

        let (record, url) = controller
            .issue_access_capability(record.id, Operation::Get)
            .await
            .unwrap();
        assert_eq!(record.status, ObjectStatus::Uploaded);
        assert!(url.ends_with("op=GET"));
    }

    #[tokio::test]
    async fn test_access_refused_without_linkage_and_no_backend_call() {
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider.clone());

        // A record created directly in the store: status New, no linkage.
        let record = metadata
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();

        let err = controller
            .issue_access_capability(record.id, Operation::Get)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LinkageMissing");
        // The precondition fired before any backend was opened.
        assert_eq!(provider.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_access_denied_in_expired_state() {
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider);

        let (record, _) = controller
            .issue_create_capability("t1", "d1", "f.txt", "abc", 3)
            .await
            .unwrap();
        metadata
            .update_by_id(record.id, ObjectStatus::Expired, None, None)
            .await
            .unwrap();

        let err = controller
            .issue_access_capability(record.id, Operation::Put)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CapabilityDenied");
    }

    #[tokio::test]
    async fn test_access_unknown_record() {
        let provider = Arc::new(StubProvider::new());
        let (controller, _) = controller_with(provider);
        let err = controller
            .issue_access_capability(404, Operation::Get)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RecordNotFound");
    }

    #[tokio::test]
    async fn test_update_rejects_regression() {
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider);

        let (record, _) = controller
            .issue_create_capability("t1", "d1", "f.txt", "abc", 3)
            .await
            .unwrap();
        metadata
            .update_by_id(record.id, ObjectStatus::Uploaded, None, None)
            .await
            .unwrap();

        let err = controller
            .update_file(record.id, ObjectStatus::Created, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidTransition");

        // Forward moves still work, and corrections ride along.
        let record = controller
            .update_file(record.id, ObjectStatus::Expired, Some("fixed".into()), Some(9))
            .await
            .unwrap();
        assert_eq!(record.status, ObjectStatus::Expired);
        assert_eq!(record.checksum, "fixed");
        assert_eq!(record.size, 9);
    }

    #[tokio::test]
    async fn test_link_and_persist_standalone() {
        let provider = Arc::new(StubProvider::new());
        let (controller, metadata) = controller_with(provider);

        let record = metadata
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();
        let linked = controller.link_and_persist(record.id).await.unwrap();
        assert_eq!(linked.bucket.as_deref(), Some("files"));
        assert_eq!(linked.location.as_deref(), Some("minio"));
    }
}
