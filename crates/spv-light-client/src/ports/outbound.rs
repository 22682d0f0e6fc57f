//! # Outbound Ports
//!
//! Contracts the light client depends on: a network [`Connector`] and a
//! header [`Storage`]. Both are injected and never owned by a blockchain.
//!
//! Every data operation has a default body failing with
//! [`SpvError::NotImplemented`], so a partially implemented backend fails
//! loudly instead of hanging.

use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, ChainTip, Coin, Hash256,
    HeightOrId, LedgerEventFilter, LedgerSubscription, LocatedHeader, ReadyState, SpvError,
    TxId, TxLocation,
};
use async_trait::async_trait;

/// Network session to a ledger backend - outbound port.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// Open the session. No-op while connecting/open, fails while closing.
    async fn connect(&self) -> Result<(), SpvError>;

    /// Tear the session down; always ends in `Closed`.
    async fn disconnect(&self) -> Result<(), SpvError>;

    /// Subscribe to `NewReadyState`, `Tip` and `TouchAddress` events.
    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription;

    /// Can this connector serve header ranges for chunk re-derivation?
    fn support_verification_methods(&self) -> bool {
        false
    }

    /// Current backend tip.
    async fn get_tip(&self) -> Result<ChainTip, SpvError> {
        Err(SpvError::NotImplemented("get_tip"))
    }

    /// Header by height or id.
    async fn get_header(&self, _key: HeightOrId) -> Result<LocatedHeader, SpvError> {
        Err(SpvError::NotImplemented("get_header"))
    }

    /// Up to `count` consecutive headers starting at `start`.
    async fn get_headers(&self, _start: u32, _count: u32) -> Result<Vec<BlockHeader>, SpvError> {
        Err(SpvError::NotImplemented("get_headers"))
    }

    /// Raw transaction bytes.
    async fn get_tx(&self, _tx_id: &TxId) -> Result<Vec<u8>, SpvError> {
        Err(SpvError::NotImplemented("get_tx"))
    }

    /// Block (or mempool) containing a transaction.
    async fn get_tx_block_id(&self, _tx_id: &TxId) -> Result<TxLocation, SpvError> {
        Err(SpvError::NotImplemented("get_tx_block_id"))
    }

    /// Broadcast a raw transaction.
    async fn send_tx(&self, _raw_hex: &str) -> Result<TxId, SpvError> {
        Err(SpvError::NotImplemented("send_tx"))
    }

    /// Batched history lookup.
    async fn addresses_query(
        &self,
        _addresses: &[String],
        _options: AddressesQueryOptions,
    ) -> Result<AddressesQueryResult, SpvError> {
        Err(SpvError::NotImplemented("addresses_query"))
    }

    /// Unspent outputs of an address.
    async fn get_unspent(&self, _address: &str) -> Result<Vec<Coin>, SpvError> {
        Err(SpvError::NotImplemented("get_unspent"))
    }

    /// Register for `TouchAddress` events. Idempotent.
    async fn subscribe_address(&self, _address: &str) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("subscribe_address"))
    }
}

/// Header persistence - outbound port.
///
/// Full mode keeps every header (indexes are heights). Compact mode keeps
/// chunk commitments plus the headers of the open chunk (indexes are
/// offsets into that chunk).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Was this storage created in compact mode?
    fn is_compact(&self) -> bool;

    /// Fail with `Mode` unless in compact mode.
    fn check_compact_mode_available(&self) -> Result<(), SpvError> {
        if self.is_compact() {
            Ok(())
        } else {
            Err(SpvError::Mode("compact mode is not enabled".to_string()))
        }
    }

    /// Id of the last accepted tip.
    async fn get_last_hash(&self) -> Result<Option<Hash256>, SpvError> {
        Err(SpvError::NotImplemented("get_last_hash"))
    }

    /// Record the id of the last accepted tip.
    async fn set_last_hash(&self, _hash: Hash256) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("set_last_hash"))
    }

    /// Number of committed chunks.
    async fn get_chunk_hashes_count(&self) -> Result<u32, SpvError> {
        Err(SpvError::NotImplemented("get_chunk_hashes_count"))
    }

    /// Commitment of chunk `index`.
    async fn get_chunk_hash(&self, _index: u32) -> Result<Hash256, SpvError> {
        Err(SpvError::NotImplemented("get_chunk_hash"))
    }

    /// Append commitments.
    async fn put_chunk_hashes(&self, _hashes: &[Hash256]) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("put_chunk_hashes"))
    }

    /// Append one commitment.
    async fn put_chunk_hash(&self, hash: Hash256) -> Result<(), SpvError> {
        self.put_chunk_hashes(&[hash]).await
    }

    /// Keep the first `limit` commitments.
    async fn truncate_chunk_hashes(&self, _limit: u32) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("truncate_chunk_hashes"))
    }

    /// Number of stored raw headers.
    async fn get_headers_count(&self) -> Result<u32, SpvError> {
        Err(SpvError::NotImplemented("get_headers_count"))
    }

    /// Raw header at `index`.
    async fn get_header(&self, _index: u32) -> Result<BlockHeader, SpvError> {
        Err(SpvError::NotImplemented("get_header"))
    }

    /// Append raw headers.
    async fn put_headers(&self, _headers: &[BlockHeader]) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("put_headers"))
    }

    /// Keep the first `limit` raw headers.
    async fn truncate_headers(&self, _limit: u32) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("truncate_headers"))
    }

    /// Drop everything.
    async fn clear(&self) -> Result<(), SpvError> {
        Err(SpvError::NotImplemented("clear"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FullOnly;

    #[async_trait]
    impl Storage for FullOnly {
        fn is_compact(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_abstract_storage_fails_loudly() {
        let storage = FullOnly;
        assert_eq!(
            storage.get_chunk_hashes_count().await,
            Err(SpvError::NotImplemented("get_chunk_hashes_count"))
        );
        assert_eq!(
            storage.put_chunk_hash(Hash256::ZERO).await,
            Err(SpvError::NotImplemented("put_chunk_hashes"))
        );
        assert_eq!(storage.clear().await, Err(SpvError::NotImplemented("clear")));
    }

    #[test]
    fn test_check_compact_mode_available() {
        assert!(matches!(
            FullOnly.check_compact_mode_available(),
            Err(SpvError::Mode(_))
        ));
    }
}
