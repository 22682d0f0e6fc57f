//! # SPV Light Client
//!
//! Light (SPV-style) client core: a locally verifiable view of chain state
//! (tip, block headers, transaction and address lookups) on top of a
//! pluggable backend connector.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Follow a ledger without downloading it:
//! - Block headers (80 bytes each) instead of full blocks
//! - Compact mode: one commitment hash per 2016-header chunk plus the open chunk
//! - Headers re-derived and checked against commitments on demand
//!
//! ## Trust Model
//!
//! | Variant | Headers | Used when |
//! |---------|---------|-----------|
//! | `NaiveBlockchain` | trusted as served | no storage, or connector without header ranges |
//! | `VerifyingBlockchain` | checked against storage | storage supplied and connector capable |
//!
//! ## Module Structure
//!
//! ```text
//! spv-light-client/
//! ├── domain/          # Hashes, headers, chunks, value objects, events, errors
//! ├── ports/           # Blockchain API (inbound) + Connector/Storage/Transport (outbound)
//! ├── adapters/        # Session connector, unbound connector, in-memory storage/backend
//! ├── application/     # Naive + verifying blockchains, open_blockchain
//! ├── config.rs        # LightClientConfig, ConnectorConfig
//! └── telemetry.rs     # tracing subscriber setup
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

// Re-exports
pub use adapters::{
    build_chain, MemoryLedger, MemoryStorage, MemoryTransport, ResponseMode, SessionConnector,
    UnboundConnector,
};
pub use application::{open_blockchain, NaiveBlockchain, VerifyingBlockchain};
pub use config::{ConnectorConfig, LightClientConfig};
pub use domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, BlockId, ChainTip, Coin,
    EventTopic, Hash256, HeightOrId, HistoryEntry, KnownChunkHashes, LedgerEvent,
    LedgerEventFilter, LedgerSubscription, LocatedHeader, ReadyState, SpvError, SyncResult,
    TxId, TxLocation, TxSource, CHUNK_SIZE, HEADER_SIZE,
};
pub use ports::{Blockchain, Connector, Storage, Transport, TransportLink};
pub use telemetry::{init_tracing, TelemetryConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
