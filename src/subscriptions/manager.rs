//! Subscription manager: the public face of the registry and dispatcher.

use crate::error::{Result, SubscriptionError};
use crate::execution::{BasicExecutionManager, ExecutionConfig, ExecutionManager, ExecutionTag};
use crate::types::{EntityId, Sensor, SensorEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::dispatcher::Dispatcher;
use super::index::SubscriptionIndex;
use super::matcher::Matcher;
use super::types::{
    derived_tag, Subscriber, Subscription, SubscriptionConfig, SubscriptionCounts,
    SubscriptionHandle, SubscriptionId,
};

/// Source of process-unique manager ids, used to validate handles.
static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Live use of one ordering tag.
struct TagUsage {
    subscriptions: usize,
    /// Some subscription supplied this tag explicitly; never torn down.
    supplied: bool,
}

/// Registers subscriptions and publishes sensor events to them.
///
/// Publishing matches and filters on the caller's thread and submits one
/// delivery per surviving subscription to the execution manager under the
/// subscription's ordering tag. Listeners never run on the publisher's thread.
pub struct SubscriptionManager {
    id: u64,
    index: SubscriptionIndex,
    dispatcher: Dispatcher,
    /// Tag reference counts. The lock also serializes subscribe/unsubscribe,
    /// so registering a lane and tearing it down cannot interleave.
    tags: Mutex<HashMap<ExecutionTag, TagUsage>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a manager delivering through `executor`.
    pub fn new(executor: Arc<dyn ExecutionManager>) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::SeqCst),
            index: SubscriptionIndex::new(),
            dispatcher: Dispatcher::new(executor),
            tags: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a manager backed by its own [`BasicExecutionManager`].
    pub fn with_config(config: ExecutionConfig) -> Result<Self> {
        let executor = BasicExecutionManager::new(config)?;
        Ok(Self::new(Arc::new(executor)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionManager> {
        self.dispatcher.executor()
    }

    /// Register a subscription.
    ///
    /// Fails with [`SubscriptionError::InvalidSubscription`] when no listener
    /// is given; producer and sensor may each be wildcards.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        let SubscriptionConfig {
            producer,
            sensor,
            subscriber,
            listener,
            filter,
            execution_tag,
            flags,
        } = config;

        let listener = listener.ok_or_else(|| {
            SubscriptionError::InvalidSubscription("a listener is required".to_string())
        })?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tag, tag_supplied) = match execution_tag {
            Some(tag) => (tag, true),
            None => (derived_tag(subscriber.as_ref(), id), false),
        };

        let sub = Arc::new(Subscription {
            id,
            producer,
            sensor,
            subscriber,
            listener,
            filter,
            tag,
            tag_supplied,
            flags,
        });

        let mut tags = self.tags.lock();

        // The lane must exist before the subscription becomes matchable.
        let introduced = !tags.contains_key(&sub.tag);
        if introduced {
            self.executor().set_serial_scheduling_for_tag(&sub.tag);
        }

        if let Err(e) = self.index.insert(Arc::clone(&sub)) {
            if introduced && !tag_supplied {
                self.executor().clear_scheduling_for_tag(&sub.tag);
            }
            return Err(e);
        }

        let usage = tags.entry(sub.tag.clone()).or_insert(TagUsage {
            subscriptions: 0,
            supplied: false,
        });
        usage.subscriptions += 1;
        usage.supplied |= tag_supplied;

        debug!(
            subscription = %sub.id,
            subscriber = ?sub.subscriber,
            producer = ?sub.producer,
            sensor = ?sub.sensor,
            tag = %sub.tag,
            manager = %self,
            "created subscription"
        );

        Ok(SubscriptionHandle::new(id, self.id))
    }

    /// Remove a subscription.
    ///
    /// Returns `Ok(false)` if it was already removed. Deliveries already
    /// submitted still run. Fails with [`SubscriptionError::InvalidHandle`]
    /// for a handle issued by another manager.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        if handle.manager_id() != self.id {
            return Err(SubscriptionError::InvalidHandle(*handle));
        }
        Ok(self.remove(handle.id()))
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut tags = self.tags.lock();
        let Some(sub) = self.index.remove(id) else {
            return false;
        };

        let released = match tags.get_mut(&sub.tag) {
            Some(usage) => {
                usage.subscriptions = usage.subscriptions.saturating_sub(1);
                (usage.subscriptions == 0).then_some(usage.supplied)
            }
            None => None,
        };
        if let Some(supplied) = released {
            tags.remove(&sub.tag);
            if !supplied {
                self.executor().clear_scheduling_for_tag(&sub.tag);
            }
        }

        debug!(
            subscription = %id,
            subscriber = ?sub.subscriber,
            tag = %sub.tag,
            lane_released = released.is_some(),
            manager = %self,
            "removed subscription"
        );
        true
    }

    /// Remove every subscription owned by `subscriber` (`None` = anonymous
    /// subscriptions). Returns how many were removed.
    pub fn unsubscribe_all(&self, subscriber: Option<&Subscriber>) -> usize {
        let mut removed = 0;
        for sub in self.index.lookup_by_subscriber(subscriber) {
            if self.remove(sub.id) {
                removed += 1;
            }
        }
        removed
    }

    /// Deliver `event` to every matching subscription.
    ///
    /// Returns once deliveries are submitted; it never waits for listeners.
    /// Fails with [`SubscriptionError::DispatchUnavailable`] if the execution
    /// manager rejects work.
    pub fn publish(&self, event: SensorEvent) -> Result<()> {
        self.dispatcher.publish(&self.index, event)
    }

    pub fn subscriptions_for_subscriber(
        &self,
        subscriber: Option<&Subscriber>,
    ) -> Vec<SubscriptionHandle> {
        self.handles(self.index.lookup_by_subscriber(subscriber))
    }

    /// Subscriptions that an event from `producer` on `sensor` would reach,
    /// wildcard registrations included.
    pub fn subscriptions_for_producer_and_sensor(
        &self,
        producer: Option<&EntityId>,
        sensor: Option<&Sensor>,
    ) -> Vec<SubscriptionHandle> {
        self.handles(Matcher::new(&self.index).matches_producer_and_sensor(producer, sensor))
    }

    /// Look up a live subscription.
    pub fn subscription(&self, handle: &SubscriptionHandle) -> Option<Arc<Subscription>> {
        if handle.manager_id() != self.id {
            return None;
        }
        self.index.get(handle.id())
    }

    pub fn subscription_count(&self) -> usize {
        self.index.len()
    }

    pub fn counts(&self) -> SubscriptionCounts {
        SubscriptionCounts {
            live_subscriptions: self.index.len(),
            total_published: self.dispatcher.total_published(),
            total_delivered: self.dispatcher.total_delivered(),
        }
    }

    fn handles(&self, subs: Vec<Arc<Subscription>>) -> Vec<SubscriptionHandle> {
        subs.iter()
            .map(|sub| SubscriptionHandle::new(sub.id, self.id))
            .collect()
    }
}

impl fmt::Display for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionManager({})", self.id)
    }
}
