//! Storage-side notification records.
//!
//! Both MinIO and AWS emit bucket notifications in the S3 event JSON
//! shape: a `Records` array where each record names the event, the bucket,
//! and the (url-encoded) object key. Notifications carry no metadata
//! record id — correlation happens through the canonical object name.

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::lifecycle::ObjectStatus;

/// One message from the notification stream.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationMessage {
    /// The notification records in this message. Keep-alive messages have
    /// none.
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

/// A single storage-side change notification.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    /// Event type string, e.g. `s3:ObjectCreated:Put`.
    #[serde(rename = "eventName")]
    pub event_name: String,
    /// The affected bucket and object.
    pub s3: S3Entity,
}

/// The `s3` element of an event record.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

/// Bucket reference within an event record.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

/// Object reference within an event record. The key arrives url-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectEntity {
    pub key: String,
    #[serde(default)]
    pub size: i64,
}

/// A batch of records handed from a listener to the reconciliation
/// worker. The optional ack is fired only after the whole batch has been
/// durably applied, never before.
#[derive(Debug)]
pub struct NotificationBatch {
    pub records: Vec<EventRecord>,
    pub ack: Option<oneshot::Sender<()>>,
}

impl NotificationBatch {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records, ack: None }
    }
}

/// Map an event-type string to the target record status.
///
/// Fixed table: the object-created family confirms an upload, the
/// object-accessed family a download. Everything else (removals, restores,
/// replication events) carries no lifecycle meaning here and is ignored.
pub fn map_event_to_status(event_name: &str) -> Option<ObjectStatus> {
    if event_name.starts_with("s3:ObjectCreated:") {
        Some(ObjectStatus::Uploaded)
    } else if event_name.starts_with("s3:ObjectAccessed:") {
        Some(ObjectStatus::Downloaded)
    } else {
        None
    }
}

/// Decode a url-encoded object key from an event record (`+` as space,
/// `%XX` escapes).
pub fn decode_object_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(&key[i + 1..i + 3], 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minio_notification_line() {
        let line = r#"{"Records":[{"eventVersion":"2.0","eventSource":"minio:s3",
            "eventName":"s3:ObjectCreated:Put",
            "s3":{"bucket":{"name":"files"},
                  "object":{"key":"2-t1-d1-f.txt","size":5}}}]}"#;
        let message: NotificationMessage = serde_json::from_str(line).unwrap();
        assert_eq!(message.records.len(), 1);
        let record = &message.records[0];
        assert_eq!(record.event_name, "s3:ObjectCreated:Put");
        assert_eq!(record.s3.bucket.name, "files");
        assert_eq!(record.s3.object.key, "2-t1-d1-f.txt");
        assert_eq!(record.s3.object.size, 5);
    }

    #[test]
    fn test_keep_alive_message_has_no_records() {
        let message: NotificationMessage = serde_json::from_str("{}").unwrap();
        assert!(message.records.is_empty());
    }

    #[test]
    fn test_created_family_maps_to_uploaded() {
        for name in [
            "s3:ObjectCreated:Put",
            "s3:ObjectCreated:Post",
            "s3:ObjectCreated:CompleteMultipartUpload",
            "s3:ObjectCreated:Copy",
        ] {
            assert_eq!(map_event_to_status(name), Some(ObjectStatus::Uploaded));
        }
    }

    #[test]
    fn test_accessed_family_maps_to_downloaded() {
        for name in ["s3:ObjectAccessed:Get", "s3:ObjectAccessed:Head"] {
            assert_eq!(map_event_to_status(name), Some(ObjectStatus::Downloaded));
        }
    }

    #[test]
    fn test_unrelated_events_ignored() {
        assert_eq!(map_event_to_status("s3:ObjectRemoved:Delete"), None);
        assert_eq!(map_event_to_status("s3:Replication:OperationCompleted"), None);
        assert_eq!(map_event_to_status(""), None);
    }

    #[test]
    fn test_decode_object_key() {
        assert_eq!(decode_object_key("2-t1-d1-f.txt"), "2-t1-d1-f.txt");
        assert_eq!(decode_object_key("0-t-d-my+file.txt"), "0-t-d-my file.txt");
        assert_eq!(decode_object_key("0-t-d-a%3Ab"), "0-t-d-a:b");
        // Truncated escape passes through.
        assert_eq!(decode_object_key("abc%2"), "abc%2");
    }
}
