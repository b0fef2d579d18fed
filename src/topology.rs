//! Static wiring of queues, topics, filter policies and workers.
//!
//! The topology is fixed at startup: object-creation events flow through the
//! intake queue into the validator, rejected units fall through the
//! dead-letter queue to the reaper, the metadata topic routes typed messages
//! behind an attribute filter, and status updates fan out through the notify
//! topic to the email worker. Nothing here is created dynamically at
//! runtime.

use crate::config::Config;
use crate::delivery::dispatcher::{Dispatcher, DispatcherConfig, Worker};
use crate::delivery::queue::{Queue, QueuePolicy};
use crate::delivery::topic::{AttributeRule, FilterPolicy, Topic};
use crate::email::EmailTransport;
use crate::messages::{MetadataField, METADATA_TYPE_ATTRIBUTE, USER_TYPE_ATTRIBUTE};
use crate::store::{ObjectStore, RecordStore};
use crate::workers::{
    IntakeValidator, InvalidObjectReaper, MetadataApplier, NotificationWorker,
    StatusTransitionWorker,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// The fully wired review pipeline.
///
/// The public queues and topics are the seams upstream systems feed:
/// object-creation events go into `intake_queue`, metadata and moderation
/// messages are published to `metadata_topic` and `status_topic`.
pub struct ReviewTopology {
    pub intake_queue: Arc<Queue>,
    pub intake_dead_letter_queue: Arc<Queue>,
    pub metadata_topic: Arc<Topic>,
    pub status_topic: Arc<Topic>,
    pub notify_topic: Arc<Topic>,
    dispatchers: Vec<Arc<Dispatcher>>,
}

impl ReviewTopology {
    /// Build the topology with the given collaborators.
    ///
    /// Collaborator handles are constructed once at startup and injected
    /// explicitly; their lifecycle is the process lifetime.
    pub fn build(
        config: &Config,
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        let policy = QueuePolicy {
            visibility_timeout: config.visibility_timeout(),
            max_receive_count: config.delivery.max_receive_count,
            redelivery_backoff: config.redelivery_backoff(),
        };
        let dispatcher_config = DispatcherConfig {
            batch_size: config.delivery.batch_size,
            wait_time: config.wait_time(),
            handler_timeout: config.handler_timeout(),
        };

        // Intake queue with its dead-letter overflow.
        let intake_dead_letter_queue = Arc::new(Queue::new(
            &config.topology.intake_dead_letter_queue,
            policy.clone(),
        ));
        let intake_queue = Arc::new(
            Queue::new(&config.topology.intake_queue, policy.clone())
                .with_dead_letter(intake_dead_letter_queue.clone()),
        );

        // Subscriber queues behind the topics.
        let metadata_queue = Arc::new(Queue::new(
            format!("{}.applier", config.topology.metadata_topic),
            policy.clone(),
        ));
        let status_queue = Arc::new(Queue::new(
            format!("{}.transition", config.topology.status_topic),
            policy.clone(),
        ));
        let notify_queue = Arc::new(Queue::new(
            format!("{}.email", config.topology.notify_topic),
            policy,
        ));

        // Metadata routing: only the three routable field types, and only
        // from photographers when the role attribute is present.
        let metadata_filter = FilterPolicy::match_all()
            .attribute(
                METADATA_TYPE_ATTRIBUTE,
                AttributeRule::any_of(MetadataField::ATTRIBUTE_VALUES),
            )
            .attribute(
                USER_TYPE_ATTRIBUTE,
                AttributeRule::any_of(["Photographer"]).or_missing(),
            );

        let metadata_topic = Arc::new(Topic::new(&config.topology.metadata_topic).subscribe(
            "metadata-applier",
            metadata_filter,
            metadata_queue.clone(),
        ));
        let status_topic = Arc::new(Topic::new(&config.topology.status_topic).subscribe(
            "status-transition",
            FilterPolicy::match_all(),
            status_queue.clone(),
        ));
        let notify_topic = Arc::new(Topic::new(&config.topology.notify_topic).subscribe(
            "notify-photographer",
            FilterPolicy::match_all(),
            notify_queue.clone(),
        ));

        let validator: Arc<dyn Worker> = Arc::new(IntakeValidator::new(
            records.clone(),
            config.intake.allowed_extensions.clone(),
        ));
        let reaper: Arc<dyn Worker> = Arc::new(InvalidObjectReaper::new(objects));
        let applier: Arc<dyn Worker> = Arc::new(MetadataApplier::new(records.clone()));
        let status_worker: Arc<dyn Worker> = Arc::new(StatusTransitionWorker::new(
            records,
            notify_topic.clone(),
        ));
        let notifier: Arc<dyn Worker> = Arc::new(NotificationWorker::new(
            transport,
            config.email.from_address.clone(),
            config.email.to_address.clone(),
        ));

        let dispatchers = vec![
            Arc::new(Dispatcher::new(
                intake_queue.clone(),
                validator,
                dispatcher_config.clone(),
            )),
            Arc::new(Dispatcher::new(
                intake_dead_letter_queue.clone(),
                reaper,
                dispatcher_config.clone(),
            )),
            Arc::new(Dispatcher::new(
                metadata_queue,
                applier,
                dispatcher_config.clone(),
            )),
            Arc::new(Dispatcher::new(
                status_queue,
                status_worker,
                dispatcher_config.clone(),
            )),
            Arc::new(Dispatcher::new(notify_queue, notifier, dispatcher_config)),
        ];

        info!(
            intake_queue = %config.topology.intake_queue,
            metadata_topic = %config.topology.metadata_topic,
            status_topic = %config.topology.status_topic,
            "Review topology wired"
        );

        Self {
            intake_queue,
            intake_dead_letter_queue,
            metadata_topic,
            status_topic,
            notify_topic,
            dispatchers,
        }
    }

    /// Spawn every dispatcher loop
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.dispatchers
            .iter()
            .map(|dispatcher| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.run().await })
            })
            .collect()
    }

    /// Signal every dispatcher to stop
    pub fn shutdown(&self) {
        for dispatcher in &self.dispatchers {
            dispatcher.shutdown();
        }
    }
}
