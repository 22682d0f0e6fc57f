//! # Inbound Ports
//!
//! API trait defining what a blockchain view can do for its callers.

use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, ChainTip, Coin, HeightOrId,
    HistoryEntry, LedgerEventFilter, LedgerSubscription, SpvError, TxId, TxLocation,
};
use async_trait::async_trait;

/// Blockchain API - inbound port.
///
/// Implemented by [`NaiveBlockchain`](crate::application::NaiveBlockchain),
/// which trusts its connector, and by
/// [`VerifyingBlockchain`](crate::application::VerifyingBlockchain), which
/// checks every header against local storage.
#[async_trait]
pub trait Blockchain: Send + Sync {
    /// Latest accepted tip. Starts at [`ChainTip::unknown`].
    fn latest(&self) -> ChainTip;

    /// Subscribe to `NewBlock` / `TouchAddress` events.
    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription;

    /// Whether headers are verified against storage.
    fn is_verifying(&self) -> bool;

    /// Header by height or id.
    async fn get_header(&self, key: HeightOrId) -> Result<BlockHeader, SpvError>;

    /// Raw transaction bytes. The bytes always hash to `tx_id`.
    async fn get_tx(&self, tx_id: &TxId) -> Result<Vec<u8>, SpvError>;

    /// Where a transaction lives.
    async fn get_tx_block_id(&self, tx_id: &TxId) -> Result<TxLocation, SpvError>;

    /// Broadcast a raw transaction (hex).
    async fn send_tx(&self, raw_hex: &str) -> Result<TxId, SpvError>;

    /// Batched address history.
    async fn addresses_query(
        &self,
        addresses: &[String],
        options: AddressesQueryOptions,
    ) -> Result<AddressesQueryResult, SpvError>;

    /// Unfiltered history of a single address.
    async fn get_history(&self, address: &str) -> Result<Vec<HistoryEntry>, SpvError> {
        let addresses = [address.to_string()];
        let result = self
            .addresses_query(&addresses, AddressesQueryOptions::default())
            .await?;
        Ok(result.transactions)
    }

    /// Unspent outputs of an address.
    async fn get_unspent(&self, address: &str) -> Result<Vec<Coin>, SpvError>;

    /// Watch an address; touches arrive as `TouchAddress` events.
    async fn subscribe_address(&self, address: &str) -> Result<(), SpvError>;
}
