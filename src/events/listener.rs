//! Backend-specific notification listeners.
//!
//! A listener is a long-lived subscription to storage-side change
//! notifications, one per backend instance. Only the MinIO variant is
//! notification-capable: it consumes the `ListenBucketNotification` S3
//! extension as a SigV4-signed streaming GET whose body is
//! newline-delimited JSON, one message per line. The subscription
//! reconnects with backoff when the stream drops; redelivered records are
//! harmless because reconciliation is idempotent.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::notification::{NotificationBatch, NotificationMessage};
use crate::config::ListenerSettings;
use crate::errors::StoreError;
use crate::sigv4::{
    amz_date_now, canonical_query_string, RequestSigner, EMPTY_PAYLOAD_SHA256,
};
use crate::storage::backend::BackendKind;

/// Delay before reconnecting a dropped notification stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Long-lived notification subscription contract.
pub trait EventListener: Send + Sync + std::fmt::Debug {
    /// Run the subscription until the shutdown signal flips. Batches are
    /// delivered through `tx`; a full channel blocks the listener, which
    /// is the intended backpressure.
    fn run(
        &self,
        tx: mpsc::Sender<NotificationBatch>,
        shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

/// Produce the listener for a backend kind, resolving its settings from
/// the `{KIND}_*` environment. Kinds without notification support cannot
/// feed a reconciliation pipeline.
pub fn new_event_listener(
    kind: BackendKind,
    label: &str,
) -> Result<Box<dyn EventListener>, StoreError> {
    debug!(label, "producing event listener");
    if !kind.supports_notifications() {
        return Err(StoreError::OperationUnsupported {
            operation: format!("event listening for store kind '{label}'"),
        });
    }
    Ok(Box::new(MinioEventListener::from_env(label)?))
}

/// Listener for MinIO bucket notifications.
#[derive(Debug)]
pub struct MinioEventListener {
    /// Configured kind label, reported in errors.
    label: String,
    settings: ListenerSettings,
    signer: RequestSigner,
    http: reqwest::Client,
}

impl MinioEventListener {
    /// Resolve settings from the environment and build the HTTP client.
    /// A connect timeout applies, but no overall request timeout — the
    /// stream is meant to stay open.
    pub fn from_env(label: &str) -> Result<Self, StoreError> {
        let settings = ListenerSettings::from_env(label)?;
        settings.log();

        let signer = RequestSigner::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            &settings.region,
        );
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::BackendUnavailable {
                backend: label.to_string(),
                detail: format!("building http client failed: {e}"),
            })?;

        Ok(Self {
            label: label.to_string(),
            settings,
            signer,
            http,
        })
    }

    /// The ARN of the queue the bucket is configured to notify,
    /// `arn:aws:sqs:{region}:{account}:{name}`.
    fn queue_arn(&self) -> String {
        format!(
            "arn:aws:sqs:{}:{}:{}",
            self.settings.region, self.settings.account_id, self.settings.notification_name
        )
    }

    /// Point the bucket's notification configuration at the registered
    /// queue. The queue target itself is provisioned out of band; a
    /// deployment that routes notifications elsewhere keeps working, so a
    /// failure here is reported to the caller but treated as non-fatal.
    async fn configure_notification(&self) -> Result<(), StoreError> {
        use aws_sdk_s3::types::{Event, NotificationConfiguration, QueueConfiguration};

        let client = crate::storage::generic::build_client(
            self.settings.endpoint_url(),
            self.settings.region.clone(),
            &self.settings.access_key_id,
            &self.settings.secret_access_key,
        )
        .await;

        let backend_err = |detail: String| StoreError::BackendUnavailable {
            backend: self.label.clone(),
            detail,
        };

        let queue = QueueConfiguration::builder()
            .queue_arn(self.queue_arn())
            .events(Event::from("s3:ObjectCreated:*"))
            .build()
            .map_err(|e| backend_err(format!("building queue configuration failed: {e}")))?;
        let configuration = NotificationConfiguration::builder()
            .queue_configurations(queue)
            .build();

        client
            .put_bucket_notification_configuration()
            .bucket(&self.settings.bucket)
            .notification_configuration(configuration)
            .send()
            .await
            .map_err(|e| backend_err(format!("setting bucket notification failed: {e}")))?;

        debug!(bucket = %self.settings.bucket, arn = %self.queue_arn(), "bucket notification configured");
        Ok(())
    }

    /// Open the notification stream and forward messages until it ends,
    /// errors, or shutdown is signalled.
    async fn listen_once(
        &self,
        tx: &mpsc::Sender<NotificationBatch>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), StoreError> {
        let path = format!("/{}", self.settings.bucket);
        let params = vec![
            ("prefix".to_string(), String::new()),
            ("suffix".to_string(), String::new()),
            ("events".to_string(), "s3:ObjectCreated:*".to_string()),
            ("events".to_string(), "s3:ObjectAccessed:*".to_string()),
        ];
        // The exact encoded query is part of the signature; compose it once
        // and use it for both.
        let query = canonical_query_string(&params);

        let amz_date = amz_date_now();
        let headers = vec![
            ("host".to_string(), self.settings.authority()),
            (
                "x-amz-content-sha256".to_string(),
                EMPTY_PAYLOAD_SHA256.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        let authorization = self.signer.authorization_header(
            "GET",
            &path,
            &query,
            &headers,
            EMPTY_PAYLOAD_SHA256,
            &amz_date,
        );

        let url = format!("{}{path}?{query}", self.settings.endpoint_url());
        debug!(bucket = %self.settings.bucket, "opening notification stream");

        let backend_err = |detail: String| StoreError::BackendUnavailable {
            backend: self.label.clone(),
            detail,
        };

        let response = self
            .http
            .get(&url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| backend_err(format!("notification stream connect failed: {e}")))?;

        let mut response = response
            .error_for_status()
            .map_err(|e| backend_err(format!("notification stream refused: {e}")))?;

        info!(bucket = %self.settings.bucket, "notification stream established");

        // The body is newline-delimited JSON; accumulate chunks and split
        // on line boundaries.
        let mut buffer = String::new();
        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk
                    .map_err(|e| backend_err(format!("notification stream read failed: {e}")))?,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("shutdown signalled, closing notification stream");
                        return Ok(());
                    }
                    continue;
                }
            };
            let Some(chunk) = chunk else {
                // Stream ended; the caller reconnects.
                return Ok(());
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let message: NotificationMessage = match serde_json::from_str(line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable notification line");
                        continue;
                    }
                };
                if message.records.is_empty() {
                    continue; // keep-alive
                }
                debug!(count = message.records.len(), "received notification batch");
                // A full channel blocks here: backpressure, never loss.
                if tx
                    .send(NotificationBatch::new(message.records))
                    .await
                    .is_err()
                {
                    // The reconciliation worker is gone; stop listening.
                    return Ok(());
                }
            }
        }
    }
}

impl EventListener for MinioEventListener {
    fn run(
        &self,
        tx: mpsc::Sender<NotificationBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            // Best-effort: deployments whose queue target is not yet
            // provisioned still get the live stream below.
            if let Err(e) = self.configure_notification().await {
                warn!(error = %e, "could not configure bucket notification target");
            }

            loop {
                if *shutdown.borrow() {
                    return Ok(());
                }
                if let Err(e) = self.listen_once(&tx, &mut shutdown).await {
                    warn!(error = %e, "notification stream dropped, reconnecting");
                } else if *shutdown.borrow() {
                    return Ok(());
                }

                // Back off before reconnecting, but leave promptly on
                // shutdown.
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
        })
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_requires_notification_capable_kind() {
        let err = new_event_listener(BackendKind::AwsDefault, "awss3").unwrap_err();
        assert_eq!(err.code(), "OperationUnsupported");
        let err = new_event_listener(BackendKind::GenericS3, "awss3local").unwrap_err();
        assert_eq!(err.code(), "OperationUnsupported");
    }

    #[test]
    fn test_queue_arn_composition() {
        let vars = [
            ("MINIOCFG_HOST", "minio.local"),
            ("MINIOCFG_PORT", "9000"),
            ("MINIOCFG_BUCKET_NAME", "files"),
            ("MINIOCFG_ACCESS_KEY_ID", "ak"),
            ("MINIOCFG_SECRET_ACCESS_KEY", "sk"),
            ("MINIOCFG_ACCOUNT_ID", "_"),
            ("MINIOCFG_REGION", "us-east-1"),
            ("MINIOCFG_NOTIFICATION_NAME", "filestore-events"),
            ("MINIOCFG_SECURE", "false"),
        ];
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let listener = MinioEventListener::from_env("miniocfg").unwrap();
        assert_eq!(listener.queue_arn(), "arn:aws:sqs:us-east-1:_:filestore-events");
        for (k, _) in vars {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_minio_listener_names_first_missing_setting() {
        // No MINIOTEST_* variables are set in the test environment.
        let err = new_event_listener(BackendKind::MinioNotifying, "miniotest").unwrap_err();
        match err {
            StoreError::ConfigurationIncomplete { key } => {
                assert_eq!(key, "MINIOTEST_HOST");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
