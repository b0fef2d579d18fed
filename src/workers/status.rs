use crate::delivery::dispatcher::{Worker, WorkerError};
use crate::delivery::topic::Topic;
use crate::delivery::Envelope;
use crate::messages::{NotificationMessage, StatusMessage};
use crate::store::{RecordStore, RecordUpdate};
use std::sync::Arc;
use tracing::info;

/// Applies moderation status updates and publishes the derived notification.
///
/// The record update and the notification publish are not transactional: if
/// the publish fails the status change is durable and the whole handler is
/// redelivered, reapplying the same deterministic update and republishing
/// the same notification.
pub struct StatusTransitionWorker {
    records: Arc<dyn RecordStore>,
    notify_topic: Arc<Topic>,
}

impl StatusTransitionWorker {
    pub fn new(records: Arc<dyn RecordStore>, notify_topic: Arc<Topic>) -> Self {
        Self {
            records,
            notify_topic,
        }
    }
}

#[async_trait::async_trait]
impl Worker for StatusTransitionWorker {
    fn name(&self) -> &'static str {
        "status-transition"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let message: StatusMessage = envelope
            .decode_json()
            .map_err(|e| WorkerError::malformed(e.to_string()))?;

        let id = message
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WorkerError::malformed("status message without id"))?;
        let date = message
            .date
            .filter(|date| !date.is_empty())
            .ok_or_else(|| WorkerError::malformed("status message without date"))?;
        let update = message
            .update
            .ok_or_else(|| WorkerError::malformed("status message without update"))?;
        let status = update
            .status
            .ok_or_else(|| WorkerError::malformed("status message without status"))?;
        let reason = update
            .reason
            .filter(|reason| !reason.is_empty())
            .ok_or_else(|| WorkerError::malformed("status message without reason"))?;

        // One multi-field update, never three separate writes, so a
        // partially applied status is never visible.
        self.records
            .update_fields(
                &id,
                RecordUpdate::Review {
                    status,
                    reason: reason.clone(),
                    reviewed_at: date,
                },
            )
            .await?;

        info!(id = %id, status = %status, "Status updated");
        metrics::counter!("darkroom.status.updated").increment(1);

        let notification = NotificationMessage {
            id: id.clone(),
            status,
            reason,
        };
        self.notify_topic
            .publish(Envelope::from_json(&notification).map_err(WorkerError::transient)?)
            .await
            .map_err(WorkerError::transient)?;

        Ok(())
    }
}
