//! Object namespace allocation.
//!
//! Maps a metadata record to its canonical object key and cross-system
//! object name. Pure functions with no state or I/O: the key is never
//! persisted and is always recomputed from the record's immutable fields,
//! so the two systems cannot drift apart.

/// Separator between the components of an object key.
const KEY_SEPARATOR: &str = "-";

/// Separator between the components of a canonical object name.
const CANONICAL_SEPARATOR: &str = ":";

/// Derive the object key for a record.
///
/// The prefix is the record id modulo the configured namespace-sharding
/// modulus, spreading objects evenly over the bucket key space. The residue
/// is a distribution aid only: the id itself does not appear elsewhere in
/// the key, so records sharing (tenant, device, name) address the same
/// physical object.
///
/// Total and deterministic; empty components simply concatenate.
pub fn object_key(modulus: u64, id: i64, tenant_id: &str, device_id: &str, name: &str) -> String {
    let residue = (id as u64) % modulus.max(1);
    format!(
        "{residue}{KEY_SEPARATOR}{tenant_id}{KEY_SEPARATOR}{device_id}{KEY_SEPARATOR}{name}"
    )
}

/// Derive the canonical cross-system name of an object:
/// `{location}:{bucket}:{objectKey}`.
///
/// Storage-side notifications carry only bucket and key, not the metadata
/// record id; this name is the join key used to correlate them back to a
/// record.
pub fn canonical_object_name(location: &str, bucket: &str, key: &str) -> String {
    format!("{location}{CANONICAL_SEPARATOR}{bucket}{CANONICAL_SEPARATOR}{key}")
}

/// A canonical object name decomposed into its parts.
///
/// Location and bucket never contain `:`; the object key may, so parsing
/// splits on the first two separators only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    /// Backend kind label the record was placed on.
    pub location: String,
    /// Physical bucket name.
    pub bucket: String,
    /// Full object key within the bucket.
    pub key: String,
}

impl CanonicalName {
    pub fn new(location: &str, bucket: &str, key: &str) -> Self {
        Self {
            location: location.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Parse a `{location}:{bucket}:{key}` string.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, CANONICAL_SEPARATOR);
        let location = parts.next()?;
        let bucket = parts.next()?;
        let key = parts.next()?;
        Some(Self::new(location, bucket, key))
    }
}

impl std::fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            canonical_object_name(&self.location, &self.bucket, &self.key)
        )
    }
}

// -- Tests --------------------------------------------------------------------
