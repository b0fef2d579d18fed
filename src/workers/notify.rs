use crate::delivery::dispatcher::{Worker, WorkerError};
use crate::delivery::Envelope;
use crate::email::EmailTransport;
use crate::messages::NotificationMessage;
use std::sync::Arc;
use tracing::info;

/// Emails the photographer about a review result.
///
/// No local persistence; failures surface for redelivery, so a duplicate
/// delivery may cause a duplicate email (accepted at-least-once guarantee).
pub struct NotificationWorker {
    transport: Arc<dyn EmailTransport>,
    from_address: String,
    to_address: String,
}

impl NotificationWorker {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        from_address: String,
        to_address: String,
    ) -> Self {
        Self {
            transport,
            from_address,
            to_address,
        }
    }
}

/// Deterministic subject for a review result
pub fn email_subject(notification: &NotificationMessage) -> String {
    format!("Review Result: {}", notification.status)
}

/// Deterministic HTML body for a review result
pub fn email_body(notification: &NotificationMessage) -> String {
    format!(
        "<h2>Your image has been reviewed:</h2>\n\
         <p><strong>Image ID:</strong> {}</p>\n\
         <p><strong>Status:</strong> {}</p>\n\
         <p><strong>Reason:</strong> {}</p>",
        notification.id, notification.status, notification.reason
    )
}

#[async_trait::async_trait]
impl Worker for NotificationWorker {
    fn name(&self) -> &'static str {
        "notify-photographer"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let notification: NotificationMessage = envelope
            .decode_json()
            .map_err(|e| WorkerError::malformed(e.to_string()))?;

        let subject = email_subject(&notification);
        let body = email_body(&notification);

        self.transport
            .send(&self.from_address, &self.to_address, &subject, &body)
            .await?;

        info!(id = %notification.id, status = %notification.status, "Photographer notified");
        metrics::counter!("darkroom.emails.sent").increment(1);
        Ok(())
    }
}
