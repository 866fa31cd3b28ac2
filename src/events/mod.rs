//! Asynchronous event reconciliation.
//!
//! The object store is the source of truth for whether an upload or
//! download actually happened; metadata only finds out through bucket
//! notifications. A backend-specific [`listener`] feeds batches of
//! notification records through a bounded channel to a single
//! [`reconcile`] worker, which maps each record to a canonical object name
//! and applies an idempotent, monotonic status update. The bounded channel
//! is the backpressure mechanism: if the metadata store is slow or down,
//! the listener blocks instead of dropping notifications.

pub mod listener;
pub mod notification;
pub mod reconcile;

pub use listener::{new_event_listener, EventListener, MinioEventListener};
pub use notification::{map_event_to_status, NotificationBatch, NotificationMessage};
pub use reconcile::{run_pipeline, Reconciler};
