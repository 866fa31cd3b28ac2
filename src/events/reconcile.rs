//! Reconciliation worker.
//!
//! Consumes notification batches from the listener channel and converts
//! each record into a conditional metadata update keyed by the canonical
//! object name. All updates are idempotent and monotonic, so redelivery —
//! whether from stream reconnects or batch retries — is always safe.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::notification::{decode_object_key, map_event_to_status, EventRecord, NotificationBatch};
use crate::errors::StoreError;
use crate::metadata::store::MetadataStore;
use crate::metrics::RECONCILE_EVENTS_TOTAL;
use crate::namespace::CanonicalName;

/// Delay between retries while the metadata store is unavailable.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Outcome of reconciling one notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Exactly one record matched; the status update was applied (or was
    /// already in effect).
    Applied,
    /// No record matched the canonical name. The record may not exist yet
    /// or was already swept to Expired; logged and skipped.
    Unmatched,
    /// The event type carries no lifecycle meaning.
    Ignored,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Unmatched => "unmatched",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

/// Maps notification records onto metadata state transitions.
pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    /// Backend kind label; together with the notification's bucket and key
    /// it forms the canonical object name.
    location: String,
}

impl Reconciler {
    pub fn new(metadata: Arc<dyn MetadataStore>, location: &str) -> Self {
        Self {
            metadata,
            location: location.to_string(),
        }
    }

    /// Reconcile a single record.
    ///
    /// More than one canonical-name match is a data-integrity violation:
    /// it is surfaced as [`StoreError::ReconciliationConflict`] and never
    /// resolved by picking a record.
    pub async fn apply_record(&self, record: &EventRecord) -> Result<ReconcileOutcome, StoreError> {
        let Some(status) = map_event_to_status(&record.event_name) else {
            debug!(event = %record.event_name, "event carries no lifecycle meaning");
            return Ok(ReconcileOutcome::Ignored);
        };

        let key = decode_object_key(&record.s3.object.key);
        let canonical = CanonicalName::new(&self.location, &record.s3.bucket.name, &key);
        debug!(canonical = %canonical, target = %status, "reconciling notification");

        let matched = self
            .metadata
            .update_by_canonical_name(&canonical, status)
            .await?;

        match matched {
            1 => Ok(ReconcileOutcome::Applied),
            0 => {
                warn!(
                    canonical = %canonical,
                    event = %record.event_name,
                    "notification matched no metadata record"
                );
                Ok(ReconcileOutcome::Unmatched)
            }
            n => Err(StoreError::ReconciliationConflict {
                canonical: canonical.to_string(),
                matched: n,
            }),
        }
    }

    /// Reconcile a whole batch, continuing past unmatched records.
    ///
    /// A conflict or a metadata failure aborts the batch; retrying it is
    /// safe because already-applied records reconcile to no-ops.
    pub async fn apply_batch(&self, records: &[EventRecord]) -> Result<(), StoreError> {
        info!(count = records.len(), "processing notification batch");
        for record in records {
            let outcome = self.apply_record(record).await?;
            counter!(RECONCILE_EVENTS_TOTAL, "result" => outcome.label()).increment(1);
        }
        Ok(())
    }
}

/// Run the reconciliation worker until the channel closes or shutdown is
/// signalled.
///
/// The stop signal is honored only between batches — an in-flight batch
/// is always finished first. While the metadata store is unavailable the
/// current batch is retried with backoff and never dropped; unacked work
/// abandoned at shutdown is recovered through upstream redelivery.
pub async fn run_pipeline(
    reconciler: Reconciler,
    mut rx: mpsc::Receiver<NotificationBatch>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StoreError> {
    loop {
        let batch = tokio::select! {
            biased;
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => {
                    info!("notification channel closed, reconciliation worker exiting");
                    return Ok(());
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown signalled, reconciliation worker exiting");
                    return Ok(());
                }
                continue;
            }
        };

        loop {
            match reconciler.apply_batch(&batch.records).await {
                Ok(()) => {
                    if let Some(ack) = batch.ack {
                        // Acknowledge only after the updates are durable.
                        let _ = ack.send(());
                    }
                    break;
                }
                Err(conflict @ StoreError::ReconciliationConflict { .. }) => {
                    // Data-integrity violation: surface loudly and stop.
                    // Resuming requires operator intervention.
                    error!(error = %conflict, "reconciliation conflict, stopping pipeline");
                    return Err(conflict);
                }
                Err(e) => {
                    warn!(error = %e, "batch not applied, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                warn!(
                                    "shutting down with an unapplied batch; \
                                     upstream redelivery will reconcile it"
                                );
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}

// -- Tests --------------------------------------------------------------------
