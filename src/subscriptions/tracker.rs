//! Subscriber-scoped view of a shared subscription manager.

use crate::error::Result;
use crate::types::{EntityId, Sensor, SensorEvent};
use parking_lot::Mutex;
use std::sync::Arc;

use super::manager::SubscriptionManager;
use super::types::{Subscriber, SubscriptionConfig, SubscriptionHandle};

/// Tracks the subscriptions made on behalf of one subscriber so they can be
/// torn down together, e.g. when an entity stops being managed.
pub struct SubscriptionTracker {
    manager: Arc<SubscriptionManager>,
    subscriber: Subscriber,
    /// Handles made through this tracker, with the producer each targets.
    /// Entries removed behind the tracker's back are pruned lazily.
    handles: Mutex<Vec<(Option<EntityId>, SubscriptionHandle)>>,
}

impl SubscriptionTracker {
    pub fn new(manager: Arc<SubscriptionManager>, subscriber: Subscriber) -> Self {
        Self {
            manager,
            subscriber,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Subscribe with this tracker's subscriber filled in.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        let producer = config.producer.clone();
        let handle = self
            .manager
            .subscribe(config.subscriber(self.subscriber.clone()))?;
        let mut handles = self.handles.lock();
        self.prune(&mut handles);
        handles.push((producer, handle));
        Ok(handle)
    }

    /// Shorthand for a listener on `producer`/`sensor` (None = wildcard).
    pub fn subscribe_to<F>(
        &self,
        producer: Option<EntityId>,
        sensor: Option<Sensor>,
        listener: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(&SensorEvent) + Send + Sync + 'static,
    {
        let config = SubscriptionConfig {
            producer,
            sensor,
            ..Default::default()
        };
        self.subscribe(config.listener(listener))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        self.handles.lock().retain(|(_, h)| h != handle);
        self.manager.unsubscribe(handle)
    }

    /// Remove every tracked subscription on `producer`.
    pub fn unsubscribe_producer(&self, producer: &EntityId) -> Result<usize> {
        let matching: Vec<SubscriptionHandle> = {
            let mut handles = self.handles.lock();
            let (matching, kept): (Vec<_>, Vec<_>) = handles
                .drain(..)
                .partition(|(p, _)| p.as_ref() == Some(producer));
            *handles = kept;
            matching.into_iter().map(|(_, h)| h).collect()
        };
        self.remove_all(matching)
    }

    /// Remove every tracked subscription.
    pub fn unsubscribe_all(&self) -> Result<usize> {
        let handles: Vec<SubscriptionHandle> =
            self.handles.lock().drain(..).map(|(_, h)| h).collect();
        self.remove_all(handles)
    }

    /// Handles of tracked subscriptions that are still live, in
    /// subscription order.
    pub fn handles(&self) -> Vec<SubscriptionHandle> {
        let mut handles = self.handles.lock();
        self.prune(&mut handles);
        handles.iter().map(|(_, h)| *h).collect()
    }

    /// Drop entries unsubscribed directly through the manager.
    fn prune(&self, handles: &mut Vec<(Option<EntityId>, SubscriptionHandle)>) {
        handles.retain(|(_, h)| self.manager.subscription(h).is_some());
    }

    fn remove_all(&self, handles: Vec<SubscriptionHandle>) -> Result<usize> {
        let mut removed = 0;
        for handle in handles {
            if self.manager.unsubscribe(&handle)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
