//! Delivery primitives for the review pipeline.
//!
//! Two primitives carry every message in the system: a point-to-point
//! [`queue::Queue`] with at-least-once delivery, visibility-timeout
//! redelivery and dead-letter overflow, and a publish/subscribe
//! [`topic::Topic`] that fans out to subscribers behind attribute filters
//! evaluated before delivery. The [`dispatcher::Dispatcher`] drives a worker
//! off a queue and maps handler outcomes onto the redelivery machinery.
//!
//! Delivery is at-least-once: messages can arrive duplicated and out of
//! order, and every worker built on these primitives must be idempotent.

pub mod dispatcher;
pub mod queue;
pub mod topic;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur inside the delivery primitives
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to serialize payload: {0}")]
    Serialization(String),

    #[error("failed to deserialize payload: {0}")]
    Deserialization(String),

    #[error("unknown or expired receipt {0}")]
    UnknownReceipt(Uuid),

    #[error("no dead-letter queue configured for queue {0}")]
    NoDeadLetterQueue(String),

    #[error("delivery to subscriber {subscriber} failed: {message}")]
    SubscriberDelivery { subscriber: String, message: String },
}

/// Routing envelope carried by every in-flight message.
///
/// Attributes are provider metadata used for filter evaluation; they are
/// inspectable without deserializing the payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique message id
    pub message_id: Uuid,
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Named string attributes for filter evaluation
    pub attributes: HashMap<String, String>,
    /// Number of times this message has been handed to a receiver
    pub receive_count: u32,
    /// When the message was first enqueued/published
    pub enqueued_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope around raw payload bytes
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            payload,
            attributes: HashMap::new(),
            receive_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Create an envelope with a JSON payload
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, DeliveryError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
        Ok(Self::new(payload))
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Deserialize the payload as JSON
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, DeliveryError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| DeliveryError::Deserialization(e.to_string()))
    }
}

/// A destination a topic can deliver matched messages to.
///
/// Queues are the usual target; tests and direct-invocation subscribers can
/// implement this on anything that accepts an envelope.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_attributes() {
        let envelope = Envelope::new(vec![1, 2, 3])
            .with_attribute("metadata_type", "Caption")
            .with_attribute("user_type", "Photographer");

        assert_eq!(envelope.attribute("metadata_type"), Some("Caption"));
        assert_eq!(envelope.attribute("missing"), None);
        assert_eq!(envelope.receive_count, 0);
    }

    #[test]
    fn test_envelope_json_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            id: String,
        }

        let envelope = Envelope::from_json(&Payload {
            id: "photo.jpeg".to_string(),
        })
        .unwrap();

        let decoded: Payload = envelope.decode_json().unwrap();
        assert_eq!(decoded.id, "photo.jpeg");
    }

    #[test]
    fn test_decode_json_reports_malformed_payload() {
        let envelope = Envelope::new(b"not json".to_vec());
        let result: Result<serde_json::Value, _> = envelope.decode_json();
        assert!(matches!(result, Err(DeliveryError::Deserialization(_))));
    }
}
