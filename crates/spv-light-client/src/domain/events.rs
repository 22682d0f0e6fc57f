//! # Ledger Events
//!
//! Notifications published by connectors and blockchains over the event bus.

use super::hash::TxId;
use super::value_objects::{ChainTip, ReadyState};
use spv_bus::BusEvent;

/// Event topics, used to filter subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventTopic {
    /// Connector lifecycle transitions.
    ReadyState,
    /// Raw tip notifications from the backend.
    Tip,
    /// Tips accepted by a blockchain.
    NewBlock,
    /// Subscribed address seen in a transaction.
    TouchAddress,
}

/// Events flowing from backend to caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    /// `newReadyState`: the connector entered a new lifecycle state.
    NewReadyState(ReadyState),
    /// The backend announced a tip (connector level, unverified).
    Tip(ChainTip),
    /// `newBlock`/`newHeight`: the blockchain accepted a new tip.
    NewBlock(ChainTip),
    /// `touchAddress`: a transaction touching a subscribed address was observed.
    TouchAddress {
        /// The subscribed address.
        address: String,
        /// The transaction touching it.
        tx_id: TxId,
    },
}

impl BusEvent for LedgerEvent {
    type Topic = EventTopic;

    fn topic(&self) -> EventTopic {
        match self {
            LedgerEvent::NewReadyState(_) => EventTopic::ReadyState,
            LedgerEvent::Tip(_) => EventTopic::Tip,
            LedgerEvent::NewBlock(_) => EventTopic::NewBlock,
            LedgerEvent::TouchAddress { .. } => EventTopic::TouchAddress,
        }
    }
}

/// Filter over ledger event topics.
pub type LedgerEventFilter = spv_bus::EventFilter<EventTopic>;

/// Subscription to ledger events.
pub type LedgerSubscription = spv_bus::Subscription<LedgerEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Hash256;

    #[test]
    fn test_event_topics() {
        assert_eq!(
            LedgerEvent::NewReadyState(ReadyState::Open).topic(),
            EventTopic::ReadyState
        );
        assert_eq!(LedgerEvent::NewBlock(ChainTip::unknown()).topic(), EventTopic::NewBlock);
        let touch = LedgerEvent::TouchAddress {
            address: "n1YYm9uXWTsjd6xwSEiys7aezJovh6xKbj".into(),
            tx_id: Hash256::ZERO,
        };
        assert_eq!(touch.topic(), EventTopic::TouchAddress);
    }
}
