//! Subscription types: records, handles and registration options.

use crate::execution::ExecutionTag;
use crate::types::{EntityId, Sensor, SensorEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked on delivery. Runs on a delivery worker, never on the
/// publisher's thread.
pub type EventListener = Arc<dyn Fn(&SensorEvent) + Send + Sync>;

/// Predicate deciding whether a matched event is delivered.
pub type EventFilter = Arc<dyn Fn(&SensorEvent) -> bool + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle returned by `subscribe`.
///
/// Carries the id of the manager that issued it so a handle cannot be used
/// against another manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    manager: u64,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, manager: u64) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Id of the issuing manager.
    pub fn manager_id(&self) -> u64 {
        self.manager
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.manager)
    }
}

/// The logical owner of a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscriber {
    /// A managed entity (policy, enricher, parent, ...).
    Entity(EntityId),
    /// A named component such as a UI feed.
    Named(String),
    /// Any other owner, identified by an opaque number.
    Object(u64),
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Entity(id) => write!(f, "entity:{}", id),
            Subscriber::Named(name) => write!(f, "{}", name),
            Subscriber::Object(n) => write!(f, "object:{}", n),
        }
    }
}

impl From<EntityId> for Subscriber {
    fn from(id: EntityId) -> Self {
        Subscriber::Entity(id)
    }
}

/// Derive the ordering tag for a subscription with no caller-supplied tag.
///
/// Subscriptions share a derived tag only when they share a subscriber;
/// anonymous subscriptions get a tag of their own.
pub(crate) fn derived_tag(subscriber: Option<&Subscriber>, id: SubscriptionId) -> ExecutionTag {
    let tag = match subscriber {
        Some(Subscriber::Entity(entity)) => format!("subscription-delivery-entity-{}", entity),
        Some(Subscriber::Named(name)) => format!("subscription-delivery-string[{}]", name),
        Some(Subscriber::Object(n)) => format!("subscription-delivery-object[{}]", n),
        None => format!("subscription-delivery-subscription[{}]", id),
    };
    ExecutionTag(tag)
}

/// Options for a new subscription.
///
/// `producer` and `sensor` left as `None` are wildcards. A listener is
/// mandatory.
#[derive(Clone, Default)]
pub struct SubscriptionConfig {
    /// Only events from this entity (None = any producer).
    pub producer: Option<EntityId>,

    /// Only events on this sensor (None = any sensor).
    pub sensor: Option<Sensor>,

    /// Owner of the subscription; also keys the default ordering tag.
    pub subscriber: Option<Subscriber>,

    pub listener: Option<EventListener>,

    /// Deliver only events for which this returns true.
    pub filter: Option<EventFilter>,

    /// Caller-supplied ordering tag. Never torn down automatically.
    pub execution_tag: Option<ExecutionTag>,

    /// Extra caller metadata kept on the subscription.
    pub flags: HashMap<String, serde_json::Value>,
}

impl SubscriptionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(mut self, producer: EntityId) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn sensor(mut self, sensor: Sensor) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn subscriber(mut self, subscriber: impl Into<Subscriber>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    pub fn listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&SensorEvent) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&SensorEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn execution_tag(mut self, tag: ExecutionTag) -> Self {
        self.execution_tag = Some(tag);
        self
    }

    pub fn flag(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.flags.insert(key.into(), value);
        self
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("producer", &self.producer)
            .field("sensor", &self.sensor)
            .field("subscriber", &self.subscriber)
            .field("listener", &self.listener.is_some())
            .field("filter", &self.filter.is_some())
            .field("execution_tag", &self.execution_tag)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A registered interest in events. Immutable once created.
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) producer: Option<EntityId>,
    pub(crate) sensor: Option<Sensor>,
    pub(crate) subscriber: Option<Subscriber>,
    pub(crate) listener: EventListener,
    pub(crate) filter: Option<EventFilter>,
    pub(crate) tag: ExecutionTag,
    pub(crate) tag_supplied: bool,
    pub(crate) flags: HashMap<String, serde_json::Value>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn producer(&self) -> Option<&EntityId> {
        self.producer.as_ref()
    }

    pub fn sensor(&self) -> Option<&Sensor> {
        self.sensor.as_ref()
    }

    pub fn subscriber(&self) -> Option<&Subscriber> {
        self.subscriber.as_ref()
    }

    pub fn execution_tag(&self) -> &ExecutionTag {
        &self.tag
    }

    /// Whether the ordering tag was supplied by the caller.
    pub fn tag_supplied(&self) -> bool {
        self.tag_supplied
    }

    pub fn flags(&self) -> &HashMap<String, serde_json::Value> {
        &self.flags
    }

    /// Check the optional filter.
    pub(crate) fn accepts(&self, event: &SensorEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("producer", &self.producer)
            .field("sensor", &self.sensor)
            .field("subscriber", &self.subscriber)
            .field("tag", &self.tag)
            .field("tag_supplied", &self.tag_supplied)
            .finish()
    }
}

/// Live subscription and delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCounts {
    pub live_subscriptions: usize,
    /// One per `publish` call.
    pub total_published: u64,
    /// One per listener submission.
    pub total_delivered: u64,
}
