use crate::delivery::dispatcher::{Worker, WorkerError};
use crate::delivery::Envelope;
use crate::messages::ObjectCreatedNotification;
use crate::store::ObjectStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Consumes the dead-letter path and purges rejected objects from the store.
///
/// Payloads without recognizable store-location fields are logged and
/// skipped; transport failures surface so the queue redelivers the item.
pub struct InvalidObjectReaper {
    objects: Arc<dyn ObjectStore>,
}

impl InvalidObjectReaper {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait::async_trait]
impl Worker for InvalidObjectReaper {
    fn name(&self) -> &'static str {
        "invalid-object-reaper"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let notification: ObjectCreatedNotification = envelope
            .decode_json()
            .map_err(|e| WorkerError::malformed(e.to_string()))?;

        if notification.records.is_empty() {
            warn!("Dead-letter message carries no object location; skipping");
            return Err(WorkerError::malformed(
                "no object records in dead-letter payload",
            ));
        }

        for record in &notification.records {
            let location = record.location();
            self.objects.delete(&location.bucket, &location.key).await?;
            info!(
                bucket = %location.bucket,
                key = %location.key,
                "Deleted invalid object"
            );
            metrics::counter!("darkroom.reaper.deleted").increment(1);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryObjectStore;

    #[tokio::test]
    async fn test_rejected_object_is_deleted() {
        let objects = Arc::new(InMemoryObjectStore::new());
        objects.put_object("uploads", "malware.exe");
        let worker = InvalidObjectReaper::new(objects.clone());

        let envelope =
            Envelope::from_json(&ObjectCreatedNotification::single("uploads", "malware.exe"))
                .unwrap();
        worker.handle(&envelope).await.unwrap();

        assert!(!objects.contains("uploads", "malware.exe"));
    }

    #[tokio::test]
    async fn test_encoded_key_is_decoded_before_deletion() {
        let objects = Arc::new(InMemoryObjectStore::new());
        objects.put_object("uploads", "bad file.exe");
        let worker = InvalidObjectReaper::new(objects.clone());

        let envelope =
            Envelope::from_json(&ObjectCreatedNotification::single("uploads", "bad+file.exe"))
                .unwrap();
        worker.handle(&envelope).await.unwrap();

        assert!(!objects.contains("uploads", "bad file.exe"));
    }

    #[tokio::test]
    async fn test_payload_without_location_is_skipped_not_retried() {
        let objects = Arc::new(InMemoryObjectStore::new());
        let worker = InvalidObjectReaper::new(objects.clone());

        let result = worker
            .handle(&Envelope::new(b"{\"unexpected\": true}".to_vec()))
            .await;

        assert!(matches!(result, Err(WorkerError::Malformed(_))));
        assert!(objects.deletions().is_empty());
    }
}
