//! # Bus Events
//!
//! The bus is generic over the event type; an event only has to name its topic.

use std::fmt::Debug;

/// An event that can travel over an [`EventBus`](crate::EventBus).
pub trait BusEvent: Clone + Send + 'static {
    /// Topic type used for filtering.
    type Topic: Copy + Eq + Debug + Send + Sync + 'static;

    /// The topic this event is published under.
    fn topic(&self) -> Self::Topic;
}

/// Filter for subscribing to specific topics.
#[derive(Debug, Clone)]
pub struct EventFilter<T> {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<T>,
}

impl<T> Default for EventFilter<T> {
    fn default() -> Self {
        Self { topics: Vec::new() }
    }
}

impl<T: Copy + Eq> EventFilter<T> {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<T>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches<E: BusEvent<Topic = T>>(&self, event: &E) -> bool {
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Topic {
        Tip,
        Touch,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum TestEvent {
        Tip(u64),
        Touch(&'static str),
    }

    impl BusEvent for TestEvent {
        type Topic = Topic;

        fn topic(&self) -> Topic {
            match self {
                TestEvent::Tip(_) => Topic::Tip,
                TestEvent::Touch(_) => Topic::Touch,
            }
        }
    }

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::<Topic>::all();
        assert!(filter.matches(&TestEvent::Tip(1)));
        assert!(filter.matches(&TestEvent::Touch("addr")));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topics(vec![Topic::Touch]);
        assert!(filter.matches(&TestEvent::Touch("addr")));
        assert!(!filter.matches(&TestEvent::Tip(7)));
    }
}
