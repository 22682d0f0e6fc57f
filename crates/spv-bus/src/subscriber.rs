//! # Event Subscriber
//!
//! Defines the subscription side of the event bus.

use crate::events::{BusEvent, EventFilter};
use crate::publisher::Registry;
use std::pin::Pin;
use std::sync::{RwLock, Weak};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Every handle to the event bus was dropped.
    #[error("Event bus closed")]
    Closed,
}

/// A subscription handle for receiving events.
///
/// Holds its own FIFO queue. When dropped, the queue is removed from the bus.
pub struct Subscription<E: BusEvent> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<E>,
    filter: EventFilter<E::Topic>,
    registry: Weak<RwLock<Registry<E>>>,
}

impl<E: BusEvent> Subscription<E> {
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<E>,
        filter: EventFilter<E::Topic>,
        registry: std::sync::Arc<RwLock<Registry<E>>>,
    ) -> Self {
        Self {
            id,
            receiver,
            filter,
            registry: std::sync::Arc::downgrade(&registry),
        }
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the bus is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Try to receive the next event without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was queued
    /// - `Ok(None)` - The queue is empty
    /// - `Err(BusError::Closed)` - The bus is gone and the queue is drained
    pub fn try_recv(&mut self) -> Result<Option<E>, BusError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Closed),
        }
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter<E::Topic> {
        &self.filter
    }
}

impl<E: BusEvent> Drop for Subscription<E> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Ok(mut registry) = registry.write() {
            registry.queues.remove(&self.id);
        }
        debug!(subscription = self.id, "Subscription dropped");
    }
}

/// A stream wrapper for subscriptions.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct EventStream<E: BusEvent> {
    subscription: Subscription<E>,
}

impl<E: BusEvent> EventStream<E> {
    /// Create a new event stream from a subscription.
    #[must_use]
    pub fn new(subscription: Subscription<E>) -> Self {
        Self { subscription }
    }

    /// Get the filter for this stream.
    #[must_use]
    pub fn filter(&self) -> &EventFilter<E::Topic> {
        self.subscription.filter()
    }
}

// Holds no self-references; the receiver is moved freely.
impl<E: BusEvent> Unpin for EventStream<E> {}

impl<E: BusEvent> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().subscription.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::{TestEvent, Topic};
    use crate::publisher::{EventBus, EventPublisher};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscription_recv_in_order() {
        let bus = EventBus::<TestEvent>::new();
        let mut sub = bus.subscribe(EventFilter::all());

        for height in 0..5 {
            bus.publish(TestEvent::Tip(height));
        }

        for height in 0..5 {
            let received = timeout(Duration::from_millis(100), sub.recv())
                .await
                .expect("timeout")
                .expect("event");
            assert_eq!(received, TestEvent::Tip(height));
        }
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let bus = EventBus::<TestEvent>::new();
        let mut sub = bus.subscribe(EventFilter::topics(vec![Topic::Touch]));

        bus.publish(TestEvent::Tip(1));
        bus.publish(TestEvent::Touch("n1YYm9uXWTsjd6xwSEiys7aezJovh6xKbj"));

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, TestEvent::Touch("n1YYm9uXWTsjd6xwSEiys7aezJovh6xKbj"));
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let bus = EventBus::<TestEvent>::new();

        {
            let _sub1 = bus.subscribe(EventFilter::all());
            let _sub2 = bus.subscribe(EventFilter::all());
            assert_eq!(bus.subscriber_count(), 2);
        }

        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(TestEvent::Tip(1)), 0);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::<TestEvent>::new();
        let mut sub = bus.subscribe(EventFilter::all());

        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_closed_after_bus_dropped() {
        let bus = EventBus::<TestEvent>::new();
        let mut sub = bus.subscribe(EventFilter::all());
        bus.publish(TestEvent::Tip(3));
        drop(bus);

        assert_eq!(sub.try_recv(), Ok(Some(TestEvent::Tip(3))));
        assert_eq!(sub.try_recv(), Err(BusError::Closed));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_event_stream() {
        let bus = EventBus::<TestEvent>::new();
        let mut stream = bus.event_stream(EventFilter::topics(vec![Topic::Tip]));
        assert_eq!(EventStream::filter(&stream).topics, vec![Topic::Tip]);

        bus.publish(TestEvent::Tip(1));
        bus.publish(TestEvent::Tip(2));

        let first = timeout(Duration::from_millis(100), stream.next()).await.expect("timeout");
        let second = timeout(Duration::from_millis(100), stream.next()).await.expect("timeout");
        assert_eq!(first, Some(TestEvent::Tip(1)));
        assert_eq!(second, Some(TestEvent::Tip(2)));
    }

    fn assert_unpin<T: Unpin>() {}

    #[test]
    fn test_event_stream_is_unpin_for_any_event() {
        assert_unpin::<EventStream<TestEvent>>();
    }
}
