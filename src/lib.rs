//! Darkroom - event-driven image review pipeline
//!
//! This library coordinates a multi-stage review workflow for uploaded
//! images through asynchronous message passing between independent workers:
//!
//! - Intake validation of object-creation events (file-type policy)
//! - Reaping of rejected uploads from the object store
//! - Attribute-filtered metadata enrichment (Caption/Date/Name)
//! - Moderation status transitions with derived notification events
//! - Email notification of review results
//!
//! Workers never call each other directly; all coordination happens through
//! the delivery primitives in [`delivery`] (an at-least-once queue with
//! visibility-timeout redelivery and dead-letter overflow, and a
//! publish/subscribe topic with broker-side attribute filtering) and the
//! record store.
//!
//! # Example
//!
//! ```rust,no_run
//! use darkroom::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let records = Arc::new(InMemoryRecordStore::new());
//!     let objects = Arc::new(InMemoryObjectStore::new());
//!     let transport = Arc::new(InMemoryTransport::new());
//!
//!     let topology = ReviewTopology::build(&config, records, objects, transport);
//!     let handles = topology.spawn();
//!
//!     // Feed an object-creation event into the intake queue.
//!     let event = ObjectCreatedNotification::single("uploads", "sunset.jpeg");
//!     topology.intake_queue.enqueue(Envelope::from_json(&event)?);
//!
//!     topology.shutdown();
//!     futures::future::join_all(handles).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod email;
pub mod messages;
pub mod store;
pub mod topology;
pub mod workers;

// Re-export main types
pub use config::Config;
pub use delivery::dispatcher::{Dispatcher, DispatcherConfig, Worker, WorkerError};
pub use delivery::queue::{Queue, QueuePolicy, ReceivedMessage};
pub use delivery::topic::{AttributeRule, FilterPolicy, Topic};
pub use delivery::{DeliveryError, DeliverySink, Envelope};
pub use email::{EmailTransport, InMemoryTransport};
pub use messages::{
    MetadataField, MetadataMessage, NotificationMessage, ObjectCreatedNotification, ReviewStatus,
    StatusMessage,
};
pub use store::memory::{InMemoryObjectStore, InMemoryRecordStore};
pub use store::{ImageRecord, ObjectStore, RecordStore, RecordUpdate};
pub use topology::ReviewTopology;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::delivery::dispatcher::{Dispatcher, Worker, WorkerError};
    pub use crate::delivery::queue::Queue;
    pub use crate::delivery::topic::{AttributeRule, FilterPolicy, Topic};
    pub use crate::delivery::{DeliverySink, Envelope};
    pub use crate::email::{EmailTransport, InMemoryTransport};
    pub use crate::messages::{
        MetadataField, NotificationMessage, ObjectCreatedNotification, ReviewStatus,
    };
    pub use crate::store::memory::{InMemoryObjectStore, InMemoryRecordStore};
    pub use crate::store::{ObjectStore, RecordStore, RecordUpdate};
    pub use crate::topology::ReviewTopology;
}
