use crate::delivery::dispatcher::{Worker, WorkerError};
use crate::delivery::Envelope;
use crate::messages::{file_extension, ObjectCreatedNotification};
use crate::store::RecordStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Validates object-creation events and records accepted uploads.
///
/// Uploads with a disallowed file extension fail the delivery unit so the
/// queue's dead-letter machinery takes over; accepted siblings inside the
/// same notification are persisted before the unit fails.
pub struct IntakeValidator {
    records: Arc<dyn RecordStore>,
    allowed_extensions: Vec<String>,
}

impl IntakeValidator {
    pub fn new(records: Arc<dyn RecordStore>, allowed_extensions: Vec<String>) -> Self {
        Self {
            records,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|ext| ext == extension)
    }
}

#[async_trait::async_trait]
impl Worker for IntakeValidator {
    fn name(&self) -> &'static str {
        "intake-validator"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let notification: ObjectCreatedNotification = envelope
            .decode_json()
            .map_err(|e| WorkerError::malformed(e.to_string()))?;

        if notification.records.is_empty() {
            return Err(WorkerError::malformed(
                "no object records in creation notification",
            ));
        }

        let mut rejection = None;
        for record in &notification.records {
            let location = record.location();
            let extension = file_extension(&location.key);

            match extension.as_deref().filter(|ext| self.is_allowed(ext)) {
                Some(_) => {
                    // Unconditional put: reprocessing the same key just
                    // overwrites created_at, which is fine pre-review.
                    self.records.put(&location.key, Utc::now()).await?;
                    info!(id = %location.key, "Image recorded");
                    metrics::counter!("darkroom.intake.recorded").increment(1);
                }
                None => {
                    warn!(
                        key = %location.key,
                        extension = extension.as_deref().unwrap_or("<none>"),
                        "Unsupported file type"
                    );
                    rejection.get_or_insert_with(|| {
                        format!(
                            "unsupported file type: {}",
                            extension.as_deref().unwrap_or(&location.key)
                        )
                    });
                }
            }
        }

        // Failing the unit routes it to the dead-letter path, where the
        // reaper purges the rejected object.
        match rejection {
            Some(reason) => Err(WorkerError::rejected(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryRecordStore;

    fn validator(records: Arc<InMemoryRecordStore>) -> IntakeValidator {
        IntakeValidator::new(
            records,
            vec!["jpeg".to_string(), "jpg".to_string(), "png".to_string()],
        )
    }

    fn event(key: &str) -> Envelope {
        Envelope::from_json(&ObjectCreatedNotification::single("uploads", key)).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_upload_creates_record() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        worker.handle(&event("photo.JPG")).await.unwrap();

        let record = records.get("photo.JPG").unwrap();
        assert!(record.created_at.is_some());
        assert_eq!(record.status, None);
    }

    #[tokio::test]
    async fn test_encoded_key_is_decoded_before_recording() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        worker.handle(&event("summer+trip%2F1.jpeg")).await.unwrap();

        assert!(records.get("summer trip/1.jpeg").is_some());
    }

    #[tokio::test]
    async fn test_disallowed_extension_is_rejected_without_record() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        let result = worker.handle(&event("malware.exe")).await;
        assert!(matches!(result, Err(WorkerError::Rejected(_))));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_key_without_extension_is_rejected() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        let result = worker.handle(&event("README")).await;
        assert!(matches!(result, Err(WorkerError::Rejected(_))));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_valid_siblings_are_persisted_before_the_unit_fails() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        let mut notification = ObjectCreatedNotification::single("uploads", "good.png");
        notification
            .records
            .extend(ObjectCreatedNotification::single("uploads", "bad.exe").records);
        notification
            .records
            .extend(ObjectCreatedNotification::single("uploads", "also-good.jpeg").records);

        let result = worker
            .handle(&Envelope::from_json(&notification).unwrap())
            .await;

        assert!(matches!(result, Err(WorkerError::Rejected(_))));
        assert!(records.get("good.png").is_some());
        assert!(records.get("also-good.jpeg").is_some());
        assert!(records.get("bad.exe").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_malformed() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records);

        let result = worker.handle(&Envelope::new(b"not json".to_vec())).await;
        assert!(matches!(result, Err(WorkerError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = validator(records.clone());

        worker.handle(&event("photo.jpeg")).await.unwrap();
        worker.handle(&event("photo.jpeg")).await.unwrap();

        assert_eq!(records.len(), 1);
        assert!(records.get("photo.jpeg").unwrap().created_at.is_some());
    }
}
