//! Unbound Connector Adapter
//!
//! A connector with no backend. Every data operation fails immediately with
//! `NotImplemented` through the `Connector` trait defaults.

use crate::domain::{
    LedgerEvent, LedgerEventFilter, LedgerSubscription, ReadyState, SpvError,
};
use crate::ports::Connector;
use async_trait::async_trait;
use spv_bus::EventBus;

/// Connector placeholder for wiring code that has not chosen a backend yet.
#[derive(Default)]
pub struct UnboundConnector {
    bus: EventBus<LedgerEvent>,
}

impl UnboundConnector {
    /// Create an unbound connector.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for UnboundConnector {
    fn ready_state(&self) -> ReadyState {
        ReadyState::Closed
    }

    async fn connect(&self) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("connect"))
    }

    async fn disconnect(&self) -> Result<(), SpvError> {
        Ok(())
    }

    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.bus.subscribe(filter)
    }
}
