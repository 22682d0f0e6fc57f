//! # Naive Blockchain
//!
//! Tracks the tip and serves queries straight from the connector, without
//! cross-checking anything.

use super::follower::{confirm_tip, require_live, spawn_follower, TipSink, TipTracker};
use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, ChainTip, Coin, HeightOrId,
    LedgerEventFilter, LedgerSubscription, SpvError, TxId, TxLocation,
};
use crate::ports::{Blockchain, Connector};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct NaiveCore {
    connector: Arc<dyn Connector>,
    tracker: TipTracker,
}

#[async_trait]
impl TipSink for NaiveCore {
    async fn accept_tip(&self, tip: ChainTip) {
        if tip.is_unknown() {
            return;
        }
        let floor = self.tracker.latest().height;
        match confirm_tip(self.connector.as_ref(), floor, tip).await {
            Some(tip) if !tip.is_unknown() => {
                self.tracker.replace(tip);
            }
            _ => {}
        }
    }
}

/// Blockchain view that trusts its connector.
pub struct NaiveBlockchain {
    connector: Arc<dyn Connector>,
    core: Arc<NaiveCore>,
    follower: JoinHandle<()>,
}

impl NaiveBlockchain {
    /// Follow `connector`, which must be connecting or open.
    pub fn new(connector: Arc<dyn Connector>) -> Result<Self, SpvError> {
        require_live(connector.as_ref())?;

        let core = Arc::new(NaiveCore {
            connector: Arc::clone(&connector),
            tracker: TipTracker::new(),
        });
        let follower = spawn_follower(
            Arc::clone(&connector),
            Arc::clone(&core),
            core.tracker.bus().clone(),
        );
        Ok(Self {
            connector,
            core,
            follower,
        })
    }
}

impl Drop for NaiveBlockchain {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

#[async_trait]
impl Blockchain for NaiveBlockchain {
    fn latest(&self) -> ChainTip {
        self.core.tracker.latest()
    }

    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.core.tracker.subscribe(filter)
    }

    fn is_verifying(&self) -> bool {
        false
    }

    async fn get_header(&self, key: HeightOrId) -> Result<BlockHeader, SpvError> {
        Ok(self.connector.get_header(key).await?.header)
    }

    async fn get_tx(&self, tx_id: &TxId) -> Result<Vec<u8>, SpvError> {
        self.connector.get_tx(tx_id).await
    }

    async fn get_tx_block_id(&self, tx_id: &TxId) -> Result<TxLocation, SpvError> {
        self.connector.get_tx_block_id(tx_id).await
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<TxId, SpvError> {
        self.connector.send_tx(raw_hex).await
    }

    async fn addresses_query(
        &self,
        addresses: &[String],
        options: AddressesQueryOptions,
    ) -> Result<AddressesQueryResult, SpvError> {
        self.connector.addresses_query(addresses, options).await
    }

    async fn get_unspent(&self, address: &str) -> Result<Vec<Coin>, SpvError> {
        self.connector.get_unspent(address).await
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), SpvError> {
        self.connector.subscribe_address(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::UnboundConnector;

    #[test]
    fn test_requires_live_connector() {
        let connector: Arc<dyn Connector> = Arc::new(UnboundConnector::new());
        assert!(matches!(
            NaiveBlockchain::new(connector),
            Err(SpvError::Connection(_))
        ));
    }
}
