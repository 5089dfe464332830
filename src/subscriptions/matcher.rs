//! Wildcard matching of events against the subscription index.

use crate::types::{EntityId, Sensor, SensorEvent};
use std::sync::Arc;

use super::index::{SubscriptionIndex, SubscriptionToken};
use super::types::Subscription;

/// The four token shapes that can match a (producer, sensor) pair: exact,
/// any producer, any sensor and fully wildcard.
pub fn candidate_tokens(producer: Option<&EntityId>, sensor: Option<&Sensor>) -> [SubscriptionToken; 4] {
    [
        SubscriptionToken::new(producer, sensor),
        SubscriptionToken::new(None, sensor),
        SubscriptionToken::new(producer, None),
        SubscriptionToken::new(None, None),
    ]
}

/// Resolves which subscriptions an event should reach.
pub struct Matcher<'a> {
    index: &'a SubscriptionIndex,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a SubscriptionIndex) -> Self {
        Self { index }
    }

    /// Subscriptions matching an event's source and sensor.
    pub fn matches(&self, event: &SensorEvent) -> Vec<Arc<Subscription>> {
        self.matches_producer_and_sensor(Some(event.source()), Some(event.sensor()))
    }

    /// Union of the four token lookups. Passing `None` collapses the
    /// corresponding shapes onto the wildcard ones.
    pub fn matches_producer_and_sensor(
        &self,
        producer: Option<&EntityId>,
        sensor: Option<&Sensor>,
    ) -> Vec<Arc<Subscription>> {
        self.index.lookup_tokens(&candidate_tokens(producer, sensor))
    }
}
