//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`]. The trait uses
//! `async_trait`-style methods (manual desugaring with pinned futures) so
//! it can back both the embedded SQLite store and future remote stores.
//! All operations are single-row and rely on the store's own atomicity; no
//! cross-record transactions are required.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::lifecycle::ObjectStatus;
use crate::namespace::CanonicalName;

/// Metadata record for a stored file.
///
/// The identity triple (tenant, device, name) and the id are immutable once
/// assigned. Status moves forward only (see the lifecycle module). Bucket
/// and location are set exactly once, right after creation, before any
/// capability is issued.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    /// Unique numeric identity, allocated by the store.
    pub id: i64,
    /// Owning tenant.
    pub tenant_id: String,
    /// Originating device within the tenant.
    pub device_id: String,
    /// Client-visible file name.
    pub name: String,
    /// Checksum algorithm label (e.g. `SHA256`).
    pub checksum_type: String,
    /// Client-supplied checksum of the content.
    pub checksum: String,
    /// Content size in bytes.
    pub size: i64,
    /// Lifecycle status.
    pub status: ObjectStatus,
    /// Physical bucket name; `None` until linkage.
    pub bucket: Option<String>,
    /// Backend kind label the bucket lives on; `None` until linkage.
    pub location: Option<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// ISO-8601 last-update timestamp.
    pub updated_at: String,
}

impl FileRecord {
    /// Whether bucket/location linkage has been persisted.
    pub fn is_linked(&self) -> bool {
        self.bucket.is_some() && self.location.is_some()
    }
}

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    /// Create a new record in status `New`, allocating its id.
    fn create(
        &self,
        tenant_id: &str,
        device_id: &str,
        name: &str,
        checksum_type: &str,
        checksum: &str,
        size: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<FileRecord>> + Send + '_>>;

    /// Read a record by primary key.
    fn read_by_id(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>>;

    /// Read all records for a (tenant, device) pair.
    fn read_by_filter(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<FileRecord>>> + Send + '_>>;

    /// Update status and, when provided, checksum and size of a record.
    /// Returns the updated record, or `None` if the id does not exist.
    ///
    /// The caller is responsible for the monotonic-transition check; the
    /// store applies what it is told.
    fn update_by_id(
        &self,
        id: i64,
        status: ObjectStatus,
        checksum: Option<String>,
        size: Option<i64>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>>;

    /// Conditionally update the status of the record matching a canonical
    /// object name, returning how many records matched.
    ///
    /// The update is applied only when exactly one record matches and the
    /// transition is a legal forward move; a record already at (or past)
    /// the target status is left untouched, which is what makes
    /// notification redelivery a no-op. Zero or multiple matches are
    /// reported through the count without touching any row.
    fn update_by_canonical_name(
        &self,
        canonical: &CanonicalName,
        status: ObjectStatus,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>>;

    /// Persist the bucket/location linkage for a record. Set exactly once:
    /// re-linking with identical values is an idempotent no-op, re-linking
    /// with different values an error.
    fn link_bucket_location(
        &self,
        id: i64,
        bucket: &str,
        location: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

/// Current UTC time in ISO-8601 with second precision.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
