//! # Event Publisher
//!
//! Defines the publishing side of the event bus.

use crate::events::{BusEvent, EventFilter};
use crate::subscriber::{EventStream, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Trait for publishing events to the bus.
pub trait EventPublisher<E: BusEvent>: Send + Sync {
    /// Publish an event to the bus.
    ///
    /// Returns the number of subscribers whose queue received the event.
    fn publish(&self, event: E) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// One subscriber's queue plus the filter deciding what goes into it.
pub(crate) struct Queue<E: BusEvent> {
    pub(crate) filter: EventFilter<E::Topic>,
    pub(crate) sender: mpsc::UnboundedSender<E>,
}

/// Queues indexed by subscription id.
pub(crate) struct Registry<E: BusEvent> {
    next_id: u64,
    pub(crate) queues: HashMap<u64, Queue<E>>,
}

pub(crate) type SharedRegistry<E> = Arc<RwLock<Registry<E>>>;

/// In-memory event bus with one ordered queue per subscriber.
///
/// Cloning the bus yields another handle to the same set of subscribers.
pub struct EventBus<E: BusEvent> {
    registry: SharedRegistry<E>,
    events_published: Arc<AtomicU64>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            events_published: self.events_published.clone(),
        }
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Create a new bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                queues: HashMap::new(),
            })),
            events_published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Events published after this call are queued for the returned handle.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter<E::Topic>) -> Subscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = match self.registry.write() {
            Ok(mut registry) => {
                let id = registry.next_id;
                registry.next_id += 1;
                registry.queues.insert(
                    id,
                    Queue {
                        filter: filter.clone(),
                        sender,
                    },
                );
                id
            }
            // A poisoned registry can't deliver anything; the receiver closes immediately.
            Err(_) => u64::MAX,
        };

        debug!(subscription = id, topics = ?filter.topics, "New subscription created");

        Subscription::new(id, receiver, filter, self.registry.clone())
    }

    /// Get a stream of events matching a filter.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter<E::Topic>) -> EventStream<E> {
        EventStream::new(self.subscribe(filter))
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.read().map(|r| r.queues.len()).unwrap_or(0)
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventPublisher<E> for EventBus<E> {
    fn publish(&self, event: E) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let Ok(registry) = self.registry.read() else {
            return 0;
        };

        let mut delivered = 0;
        for queue in registry.queues.values() {
            if queue.filter.matches(&event) && queue.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(topic = ?topic, receivers = delivered, "Event published");
        delivered
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
