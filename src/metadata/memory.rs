//! In-memory metadata store.
//!
//! Stores all records in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe
//! access; ids are allocated from a monotonically increasing counter.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use tracing::debug;

use super::store::{now_timestamp, FileRecord, MetadataStore};
use crate::lifecycle::ObjectStatus;
use crate::namespace::{self, CanonicalName};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<i64, FileRecord>,
    next_id: i64,
}

/// Metadata store held entirely in process memory.
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
    /// Namespace-sharding modulus used to recompute object keys when
    /// matching canonical names. The key is derived, never stored.
    namespace_modulus: u64,
}

impl MemoryMetadataStore {
    pub fn new(namespace_modulus: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                next_id: 1,
            }),
            namespace_modulus,
        }
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create(
        &self,
        tenant_id: &str,
        device_id: &str,
        name: &str,
        checksum_type: &str,
        checksum: &str,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>> {
        let tenant_id = tenant_id.to_string();
        let device_id = device_id.to_string();
        let name = name.to_string();
        let checksum_type = checksum_type.to_string();
        let checksum = checksum.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            let now = now_timestamp();
            let record = FileRecord {
                id,
                tenant_id,
                device_id,
                name,
                checksum_type,
                checksum,
                size,
                status: ObjectStatus::New,
                bucket: None,
                location: None,
                created_at: now.clone(),
                updated_at: now,
            };
            inner.records.insert(id, record.clone());
            Ok(record)
        })
    }

    fn read_by_id(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.records.get(&id).cloned())
        })
    }

    fn read_by_filter(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>> {
        let tenant_id = tenant_id.to_string();
        let device_id = device_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut records: Vec<FileRecord> = inner
                .records
                .values()
                .filter(|r| r.tenant_id == tenant_id && r.device_id == device_id)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.id);
            Ok(records)
        })
    }

    fn update_by_id(
        &self,
        id: i64,
        status: ObjectStatus,
        checksum: Option<String>,
        size: Option<i64>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let Some(record) = inner.records.get_mut(&id) else {
                return Ok(None);
            };
            record.status = status;
            if let Some(checksum) = checksum {
                record.checksum = checksum;
            }
            if let Some(size) = size {
                record.size = size;
            }
            record.updated_at = now_timestamp();
            Ok(Some(record.clone()))
        })
    }

    fn update_by_canonical_name(
        &self,
        canonical: &CanonicalName,
        status: ObjectStatus,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let canonical = canonical.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let matched: Vec<i64> = inner
                .records
                .values()
                .filter(|r| {
                    r.location.as_deref() == Some(canonical.location.as_str())
                        && r.bucket.as_deref() == Some(canonical.bucket.as_str())
                        && namespace::object_key(
                            self.namespace_modulus,
                            r.id,
                            &r.tenant_id,
                            &r.device_id,
                            &r.name,
                        ) == canonical.key
                })
                .map(|r| r.id)
                .collect();

            if let [id] = matched[..] {
                let record = inner.records.get_mut(&id).expect("matched id present");
                if record.status == status {
                    debug!(id, status = %status, "record already at target status");
                } else if record.status.can_transition(status) {
                    record.status = status;
                    record.updated_at = now_timestamp();
                } else {
                    debug!(
                        id,
                        from = %record.status,
                        to = %status,
                        "ignoring regressive reconciliation update"
                    );
                }
            }

            Ok(matched.len() as u64)
        })
    }

    fn link_bucket_location(
        &self,
        id: i64,
        bucket: &str,
        location: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let location = location.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let record = inner
                .records
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no record with id {id}"))?;
            match (&record.bucket, &record.location) {
                (None, None) => {
                    record.bucket = Some(bucket);
                    record.location = Some(location);
                    record.updated_at = now_timestamp();
                    Ok(())
                }
                (Some(b), Some(l)) if *b == bucket && *l == location => Ok(()),
                _ => Err(anyhow::anyhow!(
                    "record {id} already linked to a different bucket/location"
                )),
            }
        })
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_for(store_kind: &str, bucket: &str, record: &FileRecord) -> CanonicalName {
        let key = namespace::object_key(
            10,
            record.id,
            &record.tenant_id,
            &record.device_id,
            &record.name,
        );
        CanonicalName::new(store_kind, bucket, &key)
    }

    #[tokio::test]
    async fn test_create_starts_new_and_unlinked() {
        let store = MemoryMetadataStore::new(10);
        let record = store
            .create("t1", "d1", "f.txt", "SHA256", "abc", 3)
            .await
            .unwrap();
        assert_eq!(record.status, ObjectStatus::New);
        assert!(!record.is_linked());
        assert_eq!(record.id, 1);
    }

    #[tokio::test]
    async fn test_read_by_filter_scopes_to_tenant_device() {
        let store = MemoryMetadataStore::new(10);
        store.create("t1", "d1", "a", "SHA256", "", 0).await.unwrap();
        store.create("t1", "d2", "b", "SHA256", "", 0).await.unwrap();
        store.create("t2", "d1", "c", "SHA256", "", 0).await.unwrap();

        let records = store.read_by_filter("t1", "d1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "a");
    }

    #[tokio::test]
    async fn test_link_is_set_exactly_once() {
        let store = MemoryMetadataStore::new(10);
        let record = store.create("t", "d", "n", "SHA256", "", 0).await.unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        // Same values: idempotent.
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        // Different values: refused.
        assert!(store
            .link_bucket_location(record.id, "other", "minio")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_update_by_canonical_name_applies_once() {
        let store = MemoryMetadataStore::new(10);
        let record = store
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        store
            .update_by_id(record.id, ObjectStatus::Created, None, None)
            .await
            .unwrap();

        let canonical = canonical_for("minio", "files", &record);
        let matched = store
            .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
            .await
            .unwrap();
        assert_eq!(matched, 1);
        let record = store.read_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ObjectStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_update_by_canonical_name_replay_is_noop() {
        let store = MemoryMetadataStore::new(10);
        let record = store
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        let canonical = canonical_for("minio", "files", &record);

        for _ in 0..2 {
            let matched = store
                .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
                .await
                .unwrap();
            assert_eq!(matched, 1);
        }
        let record = store.read_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ObjectStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_update_by_canonical_name_zero_matches() {
        let store = MemoryMetadataStore::new(10);
        let canonical = CanonicalName::new("minio", "files", "0-x-y-z");
        let matched = store
            .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
            .await
            .unwrap();
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn test_update_by_canonical_name_never_regresses() {
        let store = MemoryMetadataStore::new(10);
        let record = store
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        store
            .update_by_id(record.id, ObjectStatus::Expired, None, None)
            .await
            .unwrap();

        let canonical = canonical_for("minio", "files", &record);
        let matched = store
            .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
            .await
            .unwrap();
        // The record matched but the regressive update was ignored.
        assert_eq!(matched, 1);
        let record = store.read_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ObjectStatus::Expired);
    }
}
