//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite library
//! is required. All async trait methods are thin wrappers around
//! synchronous rusqlite calls executed under a `Mutex`. The schema is
//! created idempotently on every startup.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::store::{now_timestamp, FileRecord, MetadataStore};
use crate::lifecycle::ObjectStatus;
use crate::namespace::{self, CanonicalName};

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
    /// Namespace-sharding modulus used to recompute object keys when
    /// matching canonical names.
    namespace_modulus: u64,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for
    /// tests).
    pub fn new(path: &str, namespace_modulus: u64) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            namespace_modulus,
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required table and indexes if they do not already exist.
    /// Idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id     TEXT NOT NULL,
                device_id     TEXT NOT NULL,
                name          TEXT NOT NULL,
                checksum_type TEXT NOT NULL DEFAULT '',
                checksum      TEXT NOT NULL DEFAULT '',
                size          INTEGER NOT NULL DEFAULT 0,
                status        TEXT NOT NULL,
                bucket        TEXT,
                location      TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_tenant_device
                ON files(tenant_id, device_id);
            CREATE INDEX IF NOT EXISTS idx_files_location_bucket
                ON files(location, bucket);
            ",
        )?;
        Ok(())
    }

    /// Map a row to a [`FileRecord`]. Column order matches [`COLUMNS`].
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let status_code: String = row.get(7)?;
        let status = ObjectStatus::from_code(&status_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("invalid status code: {status_code}").into(),
            )
        })?;
        Ok(FileRecord {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            device_id: row.get(2)?,
            name: row.get(3)?,
            checksum_type: row.get(4)?,
            checksum: row.get(5)?,
            size: row.get(6)?,
            status,
            bucket: row.get(8)?,
            location: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

/// Select-list shared by every read.
const COLUMNS: &str = "id, tenant_id, device_id, name, checksum_type, checksum, \
                       size, status, bucket, location, created_at, updated_at";

impl MetadataStore for SqliteMetadataStore {
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO files (tenant_id, device_id, name, checksum_type, checksum, \
                 size, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    tenant_id,
                    device_id,
                    name,
                    checksum_type,
                    checksum,
                    size,
                    ObjectStatus::New.code(),
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(FileRecord {
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
            })
        })
    }

    fn read_by_id(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<FileRecord>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
                    params![id],
                    Self::row_to_record,
                )
                .optional()?;
            Ok(record)
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM files \
                 WHERE tenant_id = ?1 AND device_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![tenant_id, device_id], Self::row_to_record)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let now = now_timestamp();
            let changed = conn.execute(
                "UPDATE files SET \
                 status = ?2, \
                 checksum = COALESCE(?3, checksum), \
                 size = COALESCE(?4, size), \
                 updated_at = ?5 \
                 WHERE id = ?1",
                params![id, status.code(), checksum, size, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let record = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
                    params![id],
                    Self::row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn update_by_canonical_name(
        &self,
        canonical: &CanonicalName,
        status: ObjectStatus,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let canonical = canonical.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");

            // The object key is derived, never stored: load the candidate
            // rows for this (location, bucket) and recompute each key.
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM files WHERE location = ?1 AND bucket = ?2"
            ))?;
            let rows = stmt.query_map(
                params![canonical.location, canonical.bucket],
                Self::row_to_record,
            )?;

            let mut matched: Vec<FileRecord> = Vec::new();
            for row in rows {
                let record = row?;
                let key = namespace::object_key(
                    self.namespace_modulus,
                    record.id,
                    &record.tenant_id,
                    &record.device_id,
                    &record.name,
                );
                if key == canonical.key {
                    matched.push(record);
                }
            }
            drop(stmt);

            if let [record] = &matched[..] {
                if record.status == status {
                    debug!(id = record.id, status = %status, "record already at target status");
                } else if record.status.can_transition(status) {
                    conn.execute(
                        "UPDATE files SET status = ?2, updated_at = ?3 WHERE id = ?1",
                        params![record.id, status.code(), now_timestamp()],
                    )?;
                } else {
                    debug!(
                        id = record.id,
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute(
                "UPDATE files SET bucket = ?2, location = ?3, updated_at = ?4 \
                 WHERE id = ?1 AND bucket IS NULL AND location IS NULL",
                params![id, bucket, location, now_timestamp()],
            )?;
            if changed == 1 {
                return Ok(());
            }
            // Either the record is missing or it is already linked; only an
            // identical re-link is acceptable.
            let existing: Option<(Option<String>, Option<String>)> = conn
                .query_row(
                    "SELECT bucket, location FROM files WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match existing {
                None => Err(anyhow::anyhow!("no record with id {id}")),
                Some((Some(b), Some(l))) if b == bucket && l == location => Ok(()),
                Some(_) => Err(anyhow::anyhow!(
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

    fn open_store() -> SqliteMetadataStore {
        SqliteMetadataStore::new(":memory:", 10).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_round_trip() {
        let store = open_store();
        let created = store
            .create("t1", "d1", "f.txt", "SHA256", "abc", 42)
            .await
            .unwrap();
        let read = store.read_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(read.tenant_id, "t1");
        assert_eq!(read.status, ObjectStatus::New);
        assert_eq!(read.size, 42);
        assert!(read.bucket.is_none());
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = open_store();
        assert!(store.read_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_by_id_preserves_unset_fields() {
        let store = open_store();
        let record = store
            .create("t", "d", "n", "SHA256", "orig", 7)
            .await
            .unwrap();
        let updated = store
            .update_by_id(record.id, ObjectStatus::Created, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ObjectStatus::Created);
        assert_eq!(updated.checksum, "orig");
        assert_eq!(updated.size, 7);

        let updated = store
            .update_by_id(record.id, ObjectStatus::Uploaded, Some("new".into()), Some(9))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.checksum, "new");
        assert_eq!(updated.size, 9);
    }

    #[tokio::test]
    async fn test_link_exactly_once() {
        let store = open_store();
        let record = store.create("t", "d", "n", "SHA256", "", 0).await.unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        assert!(store
            .link_bucket_location(record.id, "files", "awss3")
            .await
            .is_err());
        assert!(store.link_bucket_location(999, "b", "l").await.is_err());
    }

    #[tokio::test]
    async fn test_canonical_update_distinguishes_records() {
        let store = open_store();
        // Two records differing only in name; both linked to the same bucket.
        let a = store.create("t", "d", "a.txt", "SHA256", "", 0).await.unwrap();
        let b = store.create("t", "d", "b.txt", "SHA256", "", 0).await.unwrap();
        for record in [&a, &b] {
            store
                .link_bucket_location(record.id, "files", "minio")
                .await
                .unwrap();
        }

        let key = namespace::object_key(10, a.id, "t", "d", "a.txt");
        let canonical = CanonicalName::new("minio", "files", &key);
        let matched = store
            .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let a = store.read_by_id(a.id).await.unwrap().unwrap();
        let b = store.read_by_id(b.id).await.unwrap().unwrap();
        assert_eq!(a.status, ObjectStatus::Uploaded);
        assert_eq!(b.status, ObjectStatus::New);
    }

    #[tokio::test]
    async fn test_canonical_update_replay_idempotent() {
        let store = open_store();
        let record = store
            .create("t1", "d1", "f.txt", "SHA256", "", 0)
            .await
            .unwrap();
        store
            .link_bucket_location(record.id, "files", "minio")
            .await
            .unwrap();
        let key = namespace::object_key(10, record.id, "t1", "d1", "f.txt");
        let canonical = CanonicalName::new("minio", "files", &key);

        for _ in 0..3 {
            assert_eq!(
                store
                    .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
                    .await
                    .unwrap(),
                1
            );
        }
        let record = store.read_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ObjectStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_canonical_update_unmatched_bucket() {
        let store = open_store();
        let canonical = CanonicalName::new("minio", "nope", "0-t-d-n");
        assert_eq!(
            store
                .update_by_canonical_name(&canonical, ObjectStatus::Uploaded)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        let path_str = path.to_str().unwrap();

        let id = {
            let store = SqliteMetadataStore::new(path_str, 10).unwrap();
            store
                .create("t", "d", "n", "SHA256", "", 0)
                .await
                .unwrap()
                .id
        };
        // Reopen: schema creation must not clobber existing data.
        let store = SqliteMetadataStore::new(path_str, 10).unwrap();
        assert!(store.read_by_id(id).await.unwrap().is_some());
    }
}
