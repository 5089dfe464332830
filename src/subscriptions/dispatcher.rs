//! Event dispatch: filter matched subscriptions and hand deliveries to the
//! execution manager under each subscription's ordering tag.

use crate::error::Result;
use crate::execution::ExecutionManager;
use crate::types::SensorEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::index::SubscriptionIndex;
use super::matcher::Matcher;

/// Submits deliveries and keeps the published/delivered counters.
pub struct Dispatcher {
    executor: Arc<dyn ExecutionManager>,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn ExecutionManager>) -> Self {
        Self {
            executor,
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionManager> {
        &self.executor
    }

    /// Match, filter and submit on the caller's thread; listeners run later
    /// on the executor.
    ///
    /// Submissions for one call complete before the call returns, so two
    /// sequential publishes reach every shared tag in publish order. On a
    /// submission failure the remaining deliveries of this event are dropped
    /// and the error is returned.
    pub fn publish(&self, index: &SubscriptionIndex, event: SensorEvent) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);

        let subs = Matcher::new(index).matches(&event);
        trace!(
            source = %event.source,
            sensor = %event.sensor,
            matched = subs.len(),
            "publishing event"
        );
        if subs.is_empty() {
            return Ok(());
        }

        let event = Arc::new(event);
        for sub in subs {
            if !sub.accepts(&event) {
                continue;
            }
            let listener = Arc::clone(&sub.listener);
            let delivery = Arc::clone(&event);
            self.executor
                .submit(&sub.tag, Box::new(move || listener(&*delivery)))?;
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn total_published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn total_delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubscriptionError;
    use crate::execution::{ExecutionTag, Task};
    use crate::subscriptions::types::{EventFilter, Subscription, SubscriptionId};
    use crate::types::{EntityId, Sensor};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    /// Runs tasks inline and records the tag of each submission.
    #[derive(Default)]
    struct InlineExecutor {
        tags: Mutex<Vec<String>>,
        reject: bool,
    }

    impl ExecutionManager for InlineExecutor {
        fn submit(&self, tag: &ExecutionTag, task: Task) -> Result<()> {
            if self.reject {
                return Err(SubscriptionError::DispatchUnavailable("closed".into()));
            }
            self.tags.lock().push(tag.to_string());
            task();
            Ok(())
        }

        fn set_serial_scheduling_for_tag(&self, _tag: &ExecutionTag) {}

        fn clear_scheduling_for_tag(&self, _tag: &ExecutionTag) {}
    }

    fn register(
        index: &SubscriptionIndex,
        id: u64,
        tag: &str,
        seen: Arc<Mutex<Vec<(u64, i64)>>>,
        filter: Option<fn(&SensorEvent) -> bool>,
    ) {
        index
            .insert(Arc::new(Subscription {
                id: SubscriptionId(id),
                producer: None,
                sensor: Some(Sensor::attribute("load")),
                subscriber: None,
                listener: Arc::new(move |e: &SensorEvent| {
                    seen.lock().push((id, e.value.as_i64().unwrap_or_default()))
                }),
                filter: filter.map(|f| Arc::new(f) as EventFilter),
                tag: ExecutionTag::new(tag),
                tag_supplied: true,
                flags: HashMap::new(),
            }))
            .unwrap();
    }

    fn load(value: i64) -> SensorEvent {
        SensorEvent::new(EntityId::new("web"), Sensor::attribute("load"), json!(value))
    }

    #[test]
    fn test_counts_and_tags() {
        let executor = Arc::new(InlineExecutor::default());
        let dispatcher = Dispatcher::new(executor.clone());
        let index = SubscriptionIndex::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        register(&index, 1, "a", seen.clone(), None);
        register(&index, 2, "b", seen.clone(), None);

        dispatcher.publish(&index, load(5)).unwrap();
        dispatcher.publish(&index, load(6)).unwrap();

        assert_eq!(dispatcher.total_published(), 2);
        assert_eq!(dispatcher.total_delivered(), 4);
        assert_eq!(*executor.tags.lock(), vec!["a", "b", "a", "b"]);
        assert_eq!(*seen.lock(), vec![(1, 5), (2, 5), (1, 6), (2, 6)]);
    }

    #[test]
    fn test_filter_skips_delivery_and_count() {
        let executor = Arc::new(InlineExecutor::default());
        let dispatcher = Dispatcher::new(executor);
        let index = SubscriptionIndex::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        register(
            &index,
            1,
            "a",
            seen.clone(),
            Some(|e: &SensorEvent| e.value.as_i64().unwrap_or_default() > 10),
        );

        dispatcher.publish(&index, load(5)).unwrap();
        dispatcher.publish(&index, load(50)).unwrap();

        assert_eq!(dispatcher.total_published(), 2);
        assert_eq!(dispatcher.total_delivered(), 1);
        assert_eq!(*seen.lock(), vec![(1, 50)]);
    }

    #[test]
    fn test_unmatched_publish_still_counts() {
        let dispatcher = Dispatcher::new(Arc::new(InlineExecutor::default()));
        let index = SubscriptionIndex::new();
        dispatcher.publish(&index, load(1)).unwrap();
        assert_eq!(dispatcher.total_published(), 1);
        assert_eq!(dispatcher.total_delivered(), 0);
    }

    #[test]
    fn test_rejected_submission_propagates() {
        let executor = Arc::new(InlineExecutor {
            reject: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(executor);
        let index = SubscriptionIndex::new();
        register(&index, 1, "a", Arc::new(Mutex::new(Vec::new())), None);

        let result = dispatcher.publish(&index, load(1));
        assert!(matches!(
            result,
            Err(SubscriptionError::DispatchUnavailable(_))
        ));
        assert_eq!(dispatcher.total_delivered(), 0);
    }
}
