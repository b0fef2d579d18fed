//! Point-to-point queue with visibility-timeout redelivery.
//!
//! A receive makes messages invisible to other receivers for the configured
//! visibility window; messages not acknowledged within the window become
//! visible again — that redelivery is the sole retry mechanism. Messages
//! whose delivery-attempt count exceeds the configured budget are moved to
//! the designated dead-letter queue instead of being redelivered further.

use crate::delivery::{DeliveryError, DeliverySink, Envelope};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Redelivery policy for a queue
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// How long a received message stays invisible before it is redelivered
    pub visibility_timeout: Duration,
    /// Maximum delivery attempts before the message is dead-lettered
    pub max_receive_count: u32,
    /// Base delay before an explicitly failed message becomes visible again;
    /// doubles with every delivery attempt
    pub redelivery_backoff: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 3,
            redelivery_backoff: Duration::from_millis(500),
        }
    }
}

/// A message handed out by [`Queue::receive`].
///
/// The receipt ties the message to one delivery; acknowledging with a stale
/// receipt (after the visibility window elapsed) is rejected.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub envelope: Envelope,
    pub receipt: Uuid,
}

struct Inflight {
    envelope: Envelope,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    delayed: Vec<(Instant, Envelope)>,
    inflight: HashMap<Uuid, Inflight>,
}

/// In-process point-to-point queue with at-least-once delivery
pub struct Queue {
    name: String,
    policy: QueuePolicy,
    dead_letter: Option<Arc<Queue>>,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

impl Queue {
    /// Create a new queue with the given redelivery policy
    pub fn new(name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            dead_letter: None,
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
        }
    }

    /// Designate the dead-letter queue for exhausted and rejected messages
    pub fn with_dead_letter(mut self, queue: Arc<Queue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make a message available for delivery
    pub fn enqueue(&self, envelope: Envelope) {
        {
            let mut state = self.state.lock().unwrap();
            state.ready.push_back(envelope);
        }
        self.arrivals.notify_one();
    }

    /// Number of messages currently visible
    pub fn visible_len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.len() + state.delayed.len()
    }

    /// Number of messages currently held by receivers
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().unwrap().inflight.len()
    }

    /// Receive up to `max_messages`, waiting at most `wait` for the first one.
    ///
    /// Returned messages stay invisible for the visibility window; each one
    /// must be settled with [`ack`](Self::ack), [`nack`](Self::nack) or
    /// [`dead_letter`](Self::dead_letter) before the window elapses, or it
    /// becomes visible again with its attempt count intact.
    pub async fn receive(&self, max_messages: usize, wait: Duration) -> Vec<ReceivedMessage> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before inspecting state so an enqueue racing
            // with the check still wakes this receiver.
            let notified = self.arrivals.notified();

            let (batch, next_wake) = self.poll_ready(max_messages);
            if !batch.is_empty() {
                return batch;
            }

            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }

            let sleep_until = next_wake.map_or(deadline, |wake| wake.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(sleep_until) => {}
            }
        }
    }

    /// Permanently remove a delivered message
    pub fn ack(&self, receipt: Uuid) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        state
            .inflight
            .remove(&receipt)
            .map(|_| ())
            .ok_or(DeliveryError::UnknownReceipt(receipt))
    }

    /// Report a failed delivery; the message becomes visible again after a
    /// backoff, or moves to the dead-letter queue once its attempt budget is
    /// exhausted.
    pub fn nack(&self, receipt: Uuid) -> Result<(), DeliveryError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state
                .inflight
                .remove(&receipt)
                .ok_or(DeliveryError::UnknownReceipt(receipt))?
        };

        let envelope = entry.envelope;
        if envelope.receive_count >= self.policy.max_receive_count {
            self.overflow(envelope);
        } else {
            let delay = self.backoff_for(envelope.receive_count);
            {
                let mut state = self.state.lock().unwrap();
                state.delayed.push((Instant::now() + delay, envelope));
            }
            self.arrivals.notify_one();
        }

        Ok(())
    }

    /// Move a delivered message straight to the dead-letter queue.
    ///
    /// Used for terminal failures where further redelivery cannot help.
    pub fn dead_letter(&self, receipt: Uuid) -> Result<(), DeliveryError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state
                .inflight
                .remove(&receipt)
                .ok_or(DeliveryError::UnknownReceipt(receipt))?
        };

        match self.dead_letter.as_ref() {
            Some(dlq) => {
                self.move_to_dead_letter(dlq, entry.envelope);
                Ok(())
            }
            None => {
                warn!(
                    queue = %self.name,
                    message_id = %entry.envelope.message_id,
                    "Dropping terminal message; no dead-letter queue configured"
                );
                Err(DeliveryError::NoDeadLetterQueue(self.name.clone()))
            }
        }
    }

    /// Pop ready messages, reclaiming expired deliveries and due redeliveries
    /// first. Returns the batch and the next instant at which internal state
    /// changes on its own.
    fn poll_ready(&self, max_messages: usize) -> (Vec<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut overflowed = Vec::new();

        let mut state = self.state.lock().unwrap();

        // Reclaim deliveries whose visibility window elapsed.
        let expired: Vec<Uuid> = state
            .inflight
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(receipt, _)| *receipt)
            .collect();
        for receipt in expired {
            let Some(entry) = state.inflight.remove(&receipt) else {
                continue;
            };
            debug!(
                queue = %self.name,
                message_id = %entry.envelope.message_id,
                receive_count = entry.envelope.receive_count,
                "Visibility window elapsed; message visible again"
            );
            if entry.envelope.receive_count >= self.policy.max_receive_count {
                overflowed.push(entry.envelope);
            } else {
                state.ready.push_back(entry.envelope);
            }
        }

        // Promote redeliveries whose backoff elapsed.
        let delayed = std::mem::take(&mut state.delayed);
        let mut still_delayed = Vec::new();
        for (due, envelope) in delayed {
            if due <= now {
                state.ready.push_back(envelope);
            } else {
                still_delayed.push((due, envelope));
            }
        }
        state.delayed = still_delayed;

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut envelope) = state.ready.pop_front() else {
                break;
            };
            envelope.receive_count += 1;
            let receipt = Uuid::new_v4();
            state.inflight.insert(
                receipt,
                Inflight {
                    envelope: envelope.clone(),
                    expires_at: now + self.policy.visibility_timeout,
                },
            );
            batch.push(ReceivedMessage { envelope, receipt });
        }

        let next_wake = state
            .inflight
            .values()
            .map(|entry| entry.expires_at)
            .chain(state.delayed.iter().map(|(due, _)| *due))
            .min();

        drop(state);

        for envelope in overflowed {
            self.overflow(envelope);
        }

        (batch, next_wake)
    }

    /// Route a message that exhausted its attempt budget
    fn overflow(&self, envelope: Envelope) {
        match self.dead_letter.as_ref() {
            Some(dlq) => self.move_to_dead_letter(dlq, envelope),
            None => {
                warn!(
                    queue = %self.name,
                    message_id = %envelope.message_id,
                    receive_count = envelope.receive_count,
                    "Dropping exhausted message; no dead-letter queue configured"
                );
                metrics::counter!("darkroom.queue.dropped", "queue" => self.name.clone())
                    .increment(1);
            }
        }
    }

    fn move_to_dead_letter(&self, dlq: &Arc<Queue>, mut envelope: Envelope) {
        debug!(
            queue = %self.name,
            dead_letter_queue = %dlq.name,
            message_id = %envelope.message_id,
            "Moving message to dead-letter queue"
        );
        // The dead-letter consumer gets its own attempt budget.
        envelope.receive_count = 0;
        dlq.enqueue(envelope);
        metrics::counter!("darkroom.queue.dead_lettered", "queue" => self.name.clone())
            .increment(1);
    }

    fn backoff_for(&self, receive_count: u32) -> Duration {
        let exponent = receive_count.saturating_sub(1).min(10);
        self.policy
            .redelivery_backoff
            .saturating_mul(1u32 << exponent)
    }
}

#[async_trait::async_trait]
impl DeliverySink for Queue {
    async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.enqueue(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> QueuePolicy {
        QueuePolicy {
            visibility_timeout: Duration::from_secs(5),
            max_receive_count: 2,
            redelivery_backoff: Duration::from_millis(100),
        }
    }

    fn payload(n: u8) -> Envelope {
        Envelope::new(vec![n])
    }

    #[tokio::test]
    async fn test_enqueue_receive_ack() {
        let queue = Queue::new("test", test_policy());
        queue.enqueue(payload(1));

        let batch = queue.receive(10, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].envelope.receive_count, 1);
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(batch[0].receipt).unwrap();
        assert_eq!(queue.in_flight_len(), 0);

        let batch = queue.receive(10, Duration::from_millis(10)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_ack_with_stale_receipt_fails() {
        let queue = Queue::new("test", test_policy());
        queue.enqueue(payload(1));

        let batch = queue.receive(1, Duration::from_millis(10)).await;
        queue.ack(batch[0].receipt).unwrap();

        assert!(matches!(
            queue.ack(batch[0].receipt),
            Err(DeliveryError::UnknownReceipt(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_redelivers() {
        let queue = Queue::new("test", test_policy());
        queue.enqueue(payload(1));

        let first = queue.receive(1, Duration::from_millis(10)).await;
        assert_eq!(first.len(), 1);

        // Unacknowledged: nothing visible inside the window...
        let empty = queue.receive(1, Duration::from_secs(1)).await;
        assert!(empty.is_empty());

        // ...but the message comes back once the window elapses.
        let second = queue.receive(1, Duration::from_secs(10)).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].envelope.receive_count, 2);
        assert_ne!(second[0].receipt, first[0].receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_redelivers_after_backoff() {
        let queue = Queue::new("test", test_policy());
        queue.enqueue(payload(1));

        let first = queue.receive(1, Duration::from_millis(10)).await;
        queue.nack(first[0].receipt).unwrap();
        assert_eq!(queue.visible_len(), 1);

        let second = queue.receive(1, Duration::from_secs(2)).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].envelope.receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_message_moves_to_dead_letter() {
        let dlq = Arc::new(Queue::new("test.dlq", test_policy()));
        let queue = Queue::new("test", test_policy()).with_dead_letter(dlq.clone());
        queue.enqueue(payload(1));

        // max_receive_count = 2: two failed attempts exhaust the budget.
        for _ in 0..2 {
            let batch = queue.receive(1, Duration::from_secs(2)).await;
            assert_eq!(batch.len(), 1);
            queue.nack(batch[0].receipt).unwrap();
        }

        let batch = queue.receive(1, Duration::from_secs(2)).await;
        assert!(batch.is_empty(), "exhausted message must not be redelivered");

        let dead = dlq.receive(1, Duration::from_millis(10)).await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.payload, vec![1]);
        // The dead-letter consumer starts with a fresh attempt budget.
        assert_eq!(dead[0].envelope.receive_count, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_moves_message_immediately() {
        let dlq = Arc::new(Queue::new("test.dlq", test_policy()));
        let queue = Queue::new("test", test_policy()).with_dead_letter(dlq.clone());
        queue.enqueue(payload(7));

        let batch = queue.receive(1, Duration::from_millis(10)).await;
        queue.dead_letter(batch[0].receipt).unwrap();

        assert_eq!(queue.in_flight_len(), 0);
        let dead = dlq.receive(1, Duration::from_millis(10)).await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.payload, vec![7]);
    }

    #[tokio::test]
    async fn test_dead_letter_without_dlq_is_an_error() {
        let queue = Queue::new("test", test_policy());
        queue.enqueue(payload(1));

        let batch = queue.receive(1, Duration::from_millis(10)).await;
        assert!(matches!(
            queue.dead_letter(batch[0].receipt),
            Err(DeliveryError::NoDeadLetterQueue(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_receive_caps_at_max_messages() {
        let queue = Queue::new("test", test_policy());
        for n in 0..5 {
            queue.enqueue(payload(n));
        }

        let batch = queue.receive(3, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.in_flight_len(), 3);
        assert_eq!(queue.visible_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_on_late_enqueue() {
        let queue = Arc::new(Queue::new("test", test_policy()));

        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(1, Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(payload(9));

        let batch = receiver.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].envelope.payload, vec![9]);
    }
}
