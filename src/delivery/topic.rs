//! Publish/subscribe topic with broker-side attribute filtering.
//!
//! A publish fans the message out to every subscriber whose filter policy
//! matches the envelope attributes. Filtering happens here, before delivery;
//! non-matching subscribers never see the message. Topics and their
//! subscriptions are statically defined at startup.

use crate::delivery::{DeliveryError, DeliverySink, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// How an attribute value is matched
#[derive(Debug, Clone)]
pub enum ValueMatch {
    /// Exact-value allowlist
    AnyOf(Vec<String>),
    /// Exact-value denylist
    NoneOf(Vec<String>),
    /// Prefix-match list
    PrefixOf(Vec<String>),
}

/// A single attribute constraint inside a filter policy
#[derive(Debug, Clone)]
pub struct AttributeRule {
    matcher: ValueMatch,
    allow_missing: bool,
}

impl AttributeRule {
    /// Require the attribute to be present and equal to one of `values`
    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: ValueMatch::AnyOf(values.into_iter().map(Into::into).collect()),
            allow_missing: false,
        }
    }

    /// Reject the listed values; an absent attribute passes
    pub fn none_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: ValueMatch::NoneOf(values.into_iter().map(Into::into).collect()),
            allow_missing: true,
        }
    }

    /// Require the attribute to be present and start with one of `prefixes`
    pub fn prefix_of<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: ValueMatch::PrefixOf(prefixes.into_iter().map(Into::into).collect()),
            allow_missing: false,
        }
    }

    /// Let the rule pass when the attribute is absent (the constraint only
    /// applies to messages that carry the attribute)
    pub fn or_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }

    fn matches(&self, value: Option<&str>) -> bool {
        match value {
            None => self.allow_missing,
            Some(value) => match &self.matcher {
                ValueMatch::AnyOf(values) => values.iter().any(|v| v == value),
                ValueMatch::NoneOf(values) => !values.iter().any(|v| v == value),
                ValueMatch::PrefixOf(prefixes) => {
                    prefixes.iter().any(|p| value.starts_with(p.as_str()))
                }
            },
        }
    }
}

/// Conjunction of attribute rules evaluated against envelope attributes
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    rules: Vec<(String, AttributeRule)>,
}

impl FilterPolicy {
    /// A policy with no constraints; every message matches
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Add a constraint on a named attribute
    pub fn attribute(mut self, name: impl Into<String>, rule: AttributeRule) -> Self {
        self.rules.push((name.into(), rule));
        self
    }

    /// Evaluate the policy against a message's attributes
    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        self.rules
            .iter()
            .all(|(name, rule)| rule.matches(attributes.get(name).map(|s| s.as_str())))
    }
}

struct Subscription {
    name: String,
    filter: FilterPolicy,
    target: Arc<dyn DeliverySink>,
}

/// Fan-out topic with per-subscriber filter policies
pub struct Topic {
    name: String,
    subscriptions: Vec<Subscription>,
}

impl Topic {
    /// Create a new topic
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Bind a subscriber behind a filter policy
    pub fn subscribe(
        mut self,
        name: impl Into<String>,
        filter: FilterPolicy,
        target: Arc<dyn DeliverySink>,
    ) -> Self {
        self.subscriptions.push(Subscription {
            name: name.into(),
            filter,
            target,
        });
        self
    }

    /// Topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fan the message out to every subscriber whose filter matches.
    ///
    /// Returns the number of subscribers the message was delivered to. If a
    /// delivery fails the remaining subscribers are still attempted and the
    /// first failure is returned.
    pub async fn publish(&self, envelope: Envelope) -> Result<usize, DeliveryError> {
        let mut delivered = 0;
        let mut first_error = None;

        for subscription in &self.subscriptions {
            if !subscription.filter.matches(&envelope.attributes) {
                debug!(
                    topic = %self.name,
                    subscriber = %subscription.name,
                    message_id = %envelope.message_id,
                    "Message filtered out before delivery"
                );
                metrics::counter!("darkroom.topic.filtered", "topic" => self.name.clone())
                    .increment(1);
                continue;
            }

            match subscription.target.deliver(envelope.clone()).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("darkroom.topic.delivered", "topic" => self.name.clone())
                        .increment(1);
                }
                Err(e) => {
                    error!(
                        topic = %self.name,
                        subscriber = %subscription.name,
                        error = %e,
                        "Failed to deliver to subscriber"
                    );
                    first_error.get_or_insert(DeliveryError::SubscriberDelivery {
                        subscriber: subscription.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }
}
