//! # Sensorbus
//!
//! Event-notification core for managed entities: entities emit typed sensor
//! events, and policies, enrichers and feeds subscribe to them.
//!
//! ## Core Concepts
//!
//! - **Sensor events**: a state change from one entity on one named sensor
//! - **Subscriptions**: a listener registered for a producer and sensor, either
//!   of which may be a wildcard, with an optional filter
//! - **Ordering tags**: deliveries sharing a tag run one at a time, in publish
//!   order; by default every subscriber gets its own tag
//! - **Execution manager**: the worker pool that runs listeners off the
//!   publisher's thread
//!
//! ## Example
//!
//! ```ignore
//! use sensorbus::{EntityId, ExecutionConfig, Sensor, SensorEvent, SubscriptionConfig, SubscriptionManager};
//!
//! let manager = SubscriptionManager::with_config(ExecutionConfig::default())?;
//!
//! // Any producer, one sensor
//! manager.subscribe(
//!     SubscriptionConfig::new()
//!         .sensor(Sensor::attribute("service.status"))
//!         .listener(|event| println!("{:?}", event)),
//! )?;
//!
//! manager.publish(SensorEvent::new(
//!     EntityId::new("web-1"),
//!     Sensor::attribute("service.status"),
//!     json!("running"),
//! ))?;
//! ```

pub mod error;
pub mod execution;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, SubscriptionError};
pub use execution::{BasicExecutionManager, ExecutionConfig, ExecutionManager, ExecutionTag, Task};
pub use subscriptions::{
    EventFilter, EventListener, Subscriber, Subscription, SubscriptionConfig, SubscriptionCounts,
    SubscriptionHandle, SubscriptionId, SubscriptionManager, SubscriptionTracker,
};
pub use types::*;
