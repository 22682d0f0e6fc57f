//! # SPV Bus - Ordered Event Fan-out
//!
//! Publish/subscribe channels used by the light client to deliver
//! connector and blockchain notifications.
//!
//! ## Delivery Model
//!
//! ```text
//!                        ┌──────────────┐
//!   publish(event) ────▶ │   EventBus   │ ──▶ queue #1 ──▶ Subscription
//!                        │  (filters)   │ ──▶ queue #2 ──▶ Subscription
//!                        └──────────────┘ ──▶ queue #n ──▶ EventStream
//! ```
//!
//! - Every subscriber owns an unbounded FIFO queue: events arrive in publish order.
//! - Filtering happens at publish time, a subscriber never sees events it did not ask for.
//! - Dropping a `Subscription` removes its queue from the bus (unsubscribe).

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{BusEvent, EventFilter};
pub use publisher::{EventBus, EventPublisher};
pub use subscriber::{BusError, EventStream, Subscription};
