//! Subscription registry and event dispatch.
//!
//! Subscriptions are registered against a producer and a sensor, either of
//! which may be left as a wildcard. Publishing an event:
//! - matches the exact, any-producer, any-sensor and fully wildcard
//!   registrations
//! - applies each subscription's optional filter
//! - submits one delivery per surviving subscription to the execution
//!   manager, tagged with the subscription's ordering tag
//!
//! Deliveries sharing a tag are serialized, so a subscriber sees events in
//! the order they were published. Different tags are delivered concurrently.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::with_config(ExecutionConfig::default())?;
//!
//! let handle = manager.subscribe(
//!     SubscriptionConfig::new()
//!         .sensor(Sensor::attribute("service.up"))
//!         .subscriber(EntityId::new("restart-policy"))
//!         .listener(|event| println!("{} is up: {}", event.source, event.value)),
//! )?;
//!
//! manager.publish(SensorEvent::new(
//!     EntityId::new("web-1"),
//!     Sensor::attribute("service.up"),
//!     json!(true),
//! ))?;
//!
//! manager.unsubscribe(&handle)?;
//! ```

mod dispatcher;
mod index;
mod manager;
mod matcher;
mod tracker;
mod types;

pub use dispatcher::Dispatcher;
pub use index::{SubscriptionIndex, SubscriptionToken};
pub use manager::SubscriptionManager;
pub use matcher::{candidate_tokens, Matcher};
pub use tracker::SubscriptionTracker;
pub use types::{
    EventFilter, EventListener, Subscriber, Subscription, SubscriptionConfig, SubscriptionCounts,
    SubscriptionHandle, SubscriptionId,
};
