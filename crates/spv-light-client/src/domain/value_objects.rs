//! # Domain Value Objects
//!
//! Immutable value types exchanged between the blockchain, the connector and callers.

use super::hash::{BlockId, Hash256, TxId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current chain tip information.
///
/// `height == -1` with a zero id is the "unknown" sentinel every blockchain starts at.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChainTip {
    /// Tip block id.
    pub block_id: BlockId,
    /// Tip block height.
    pub height: i64,
}

impl ChainTip {
    /// Create a new chain tip.
    pub fn new(block_id: BlockId, height: u32) -> Self {
        Self {
            block_id,
            height: i64::from(height),
        }
    }

    /// The uninitialized sentinel.
    pub const fn unknown() -> Self {
        Self {
            block_id: Hash256::ZERO,
            height: -1,
        }
    }

    /// Is this the sentinel?
    pub fn is_unknown(&self) -> bool {
        self.height < 0
    }

    /// Height as an unsigned value, `None` for the sentinel.
    pub fn known_height(&self) -> Option<u32> {
        u32::try_from(self.height).ok()
    }
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Header lookup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeightOrId {
    /// Look up by block height.
    Height(u32),
    /// Look up by block id.
    Id(BlockId),
}

impl fmt::Display for HeightOrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeightOrId::Height(height) => write!(f, "{height}"),
            HeightOrId::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<u32> for HeightOrId {
    fn from(height: u32) -> Self {
        HeightOrId::Height(height)
    }
}

impl From<BlockId> for HeightOrId {
    fn from(id: BlockId) -> Self {
        HeightOrId::Id(id)
    }
}

/// Where a transaction currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "data", rename_all = "lowercase")]
pub enum TxLocation {
    /// Confirmed in a block.
    Blocks {
        /// Id of the containing block.
        #[serde(rename = "blockId")]
        block_id: BlockId,
        /// Height of the containing block.
        height: u32,
    },
    /// Waiting in the mempool.
    Mempool,
}

/// Confirmed vs unconfirmed, used to filter address queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxSource {
    /// Confirmed transactions only.
    Blocks,
    /// Mempool transactions only.
    Mempool,
}

/// Address history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transaction id.
    pub tx_id: TxId,
    /// Confirmation height, absent for mempool transactions.
    pub height: Option<u32>,
}

/// Unspent output owned by an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Transaction id.
    pub tx_id: TxId,
    /// Output index.
    pub out_index: u32,
    /// Value in base units.
    pub value: u64,
    /// Confirmation height, absent for mempool outputs.
    pub height: Option<u32>,
}

/// Filters for [`addresses_query`](crate::ports::Connector::addresses_query).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressesQueryOptions {
    /// Restrict to confirmed or mempool transactions.
    pub source: Option<TxSource>,
    /// Lowest confirmation height (inclusive).
    pub from: Option<u32>,
    /// Highest confirmation height (inclusive).
    pub to: Option<u32>,
}

impl AddressesQueryOptions {
    /// Does `entry` pass these filters?
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        match (self.source, entry.height) {
            (Some(TxSource::Blocks), None) | (Some(TxSource::Mempool), Some(_)) => return false,
            _ => {}
        }
        let Some(height) = entry.height else {
            return true;
        };
        self.from.map_or(true, |from| height >= from) && self.to.map_or(true, |to| height <= to)
    }
}

/// Result of a batched address lookup.
///
/// `latest` lets callers detect that the batch is stale relative to the tip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressesQueryResult {
    /// Matching transactions.
    pub transactions: Vec<HistoryEntry>,
    /// Backend tip the batch was computed against.
    pub latest: ChainTip,
}

/// Connector session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadyState {
    /// Opening a link to the backend.
    Connecting,
    /// Link established, requests flow.
    Open,
    /// Teardown in progress.
    Closing,
    /// No link; `connect()` starts over.
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Outcome of bringing local headers up to a new tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncResult {
    /// Headers fetched and accepted.
    pub headers_synced: u64,
    /// Tip after the sync.
    pub tip: ChainTip,
    /// Height of the last common block when a reorganization was applied.
    pub fork_height: Option<i64>,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_tip_sentinel() {
        let tip = ChainTip::default();
        assert_eq!(tip.height, -1);
        assert_eq!(tip.block_id.to_hex(), "0".repeat(64));
        assert!(tip.is_unknown());
        assert_eq!(tip.known_height(), None);
    }

    #[test]
    fn test_height_or_id_display() {
        assert_eq!(HeightOrId::from(300000).to_string(), "300000");
        let id = Hash256::sha256d(b"block");
        assert_eq!(HeightOrId::from(id).to_string(), id.to_hex());
    }

    #[test]
    fn test_tx_location_json_shape() {
        let confirmed = TxLocation::Blocks {
            block_id: Hash256::ZERO,
            height: 159233,
        };
        let json = serde_json::to_value(confirmed).unwrap();
        assert_eq!(json["source"], "blocks");
        assert_eq!(json["data"]["height"], 159233);
        assert_eq!(json["data"]["blockId"], "0".repeat(64));

        let json = serde_json::to_value(TxLocation::Mempool).unwrap();
        assert_eq!(json, serde_json::json!({ "source": "mempool" }));
    }

    #[test]
    fn test_query_options_filters() {
        let confirmed = HistoryEntry {
            tx_id: Hash256::ZERO,
            height: Some(159233),
        };
        let unconfirmed = HistoryEntry {
            tx_id: Hash256::ZERO,
            height: None,
        };

        let blocks_only = AddressesQueryOptions {
            source: Some(TxSource::Blocks),
            ..Default::default()
        };
        assert!(blocks_only.matches(&confirmed));
        assert!(!blocks_only.matches(&unconfirmed));

        let range = AddressesQueryOptions {
            from: Some(160000),
            ..Default::default()
        };
        assert!(!range.matches(&confirmed));
        assert!(range.matches(&unconfirmed));
    }

    #[test]
    fn test_ready_state_display() {
        assert_eq!(ReadyState::Closed.to_string(), "CLOSED");
        assert_eq!(ReadyState::Connecting.to_string(), "CONNECTING");
    }
}
