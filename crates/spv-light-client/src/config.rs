//! # Light Client Configuration
//!
//! Configuration for the connector session and the blockchain views.

use crate::domain::{Hash256, KnownChunkHashes, SpvError, CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connector session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// First reconnect delay in milliseconds; doubles on every failed attempt.
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,

    /// Consecutive failed opens before the session gives up (0 = never).
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl ConnectorConfig {
    /// Create a config for testing (short timeouts, quick retries).
    pub fn for_testing() -> Self {
        Self {
            request_timeout_ms: 2_000,
            reconnect_base_delay_ms: 10,
            reconnect_max_delay_ms: 100,
            max_reconnect_attempts: 3,
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at the configured maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.reconnect_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Has the session used up its reconnect attempts?
    pub fn attempts_exhausted(&self, failures: u32) -> bool {
        self.max_reconnect_attempts != 0 && failures >= self.max_reconnect_attempts
    }
}

/// Light client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightClientConfig {
    /// Network name, selects the built-in known chunk table.
    pub network: String,

    /// Keep chunk commitments instead of every header.
    pub compact_mode: bool,

    /// Verified chunks kept in memory.
    pub chunk_cache_size: usize,

    /// Maximum headers fetched in one request during sync.
    pub header_batch_size: u32,

    /// Chunk commitments trusted up front. Falls back to the built-in table
    /// for `network` when absent.
    pub known_chunk_hashes: Option<Vec<Hash256>>,

    /// Session settings.
    pub connector: ConnectorConfig,
}

impl Default for LightClientConfig {
    fn default() -> Self {
        Self {
            network: "mainnet".to_string(),
            compact_mode: true,
            chunk_cache_size: 16,
            header_batch_size: CHUNK_SIZE,
            known_chunk_hashes: None,
            connector: ConnectorConfig::default(),
        }
    }
}

impl LightClientConfig {
    /// Create a config for testing (smaller values).
    pub fn for_testing() -> Self {
        Self {
            network: "regtest".to_string(),
            compact_mode: true,
            chunk_cache_size: 4,
            header_batch_size: 500,
            known_chunk_hashes: None,
            connector: ConnectorConfig::for_testing(),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SpvError> {
        serde_json::from_str(json).map_err(|e| SpvError::InvalidData(format!("config: {e}")))
    }

    /// The known chunk table to seed compact storage from.
    pub fn known_chunks(&self) -> KnownChunkHashes {
        match &self.known_chunk_hashes {
            Some(hashes) => KnownChunkHashes::new(hashes.clone()),
            None => KnownChunkHashes::builtin(&self.network).clone(),
        }
    }
}
