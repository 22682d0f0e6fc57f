//! # Well-Known Chunk Hashes
//!
//! Commitments for fixed historical prefixes of a ledger. Compact storage is
//! seeded from this table before any network round-trip. The table is
//! read-only once loaded.
//!
//! The built-in table is embedded from `known_chunks.json` and parsed once.

use super::errors::SpvError;
use super::hash::Hash256;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

/// Built-in tables indexed by network name.
static BUILTIN: LazyLock<HashMap<String, KnownChunkHashes>> = LazyLock::new(|| {
    let file: KnownChunksFile = match serde_json::from_str(include_str!("known_chunks.json")) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "[spv] Embedded chunk table is malformed, ignoring it");
            return HashMap::new();
        }
    };

    file.networks
        .into_iter()
        .filter_map(|(network, hashes)| match KnownChunkHashes::from_hex(&hashes) {
            Ok(table) => Some((network, table)),
            Err(e) => {
                warn!(network = %network, error = %e, "[spv] Skipping malformed chunk table");
                None
            }
        })
        .collect()
});

static EMPTY: LazyLock<KnownChunkHashes> = LazyLock::new(KnownChunkHashes::default);

#[derive(Debug, Deserialize)]
struct KnownChunksFile {
    networks: HashMap<String, Vec<String>>,
}

/// Ordered chunk commitments, index `i` covering heights `[i * CHUNK_SIZE, (i + 1) * CHUNK_SIZE)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownChunkHashes {
    hashes: Vec<Hash256>,
}

impl KnownChunkHashes {
    /// Build a table from commitments.
    pub fn new(hashes: Vec<Hash256>) -> Self {
        Self { hashes }
    }

    /// Build a table from display-hex commitments.
    pub fn from_hex<S: AsRef<str>>(hashes: &[S]) -> Result<Self, SpvError> {
        let hashes = hashes
            .iter()
            .map(|h| Hash256::from_hex(h.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hashes })
    }

    /// Built-in table for `network`, empty when none is shipped.
    pub fn builtin(network: &str) -> &'static KnownChunkHashes {
        BUILTIN.get(network).unwrap_or(&EMPTY)
    }

    /// Commitment for chunk `index`.
    pub fn get(&self, index: u32) -> Option<&Hash256> {
        self.hashes.get(index as usize)
    }

    /// Number of known chunks.
    pub fn len(&self) -> u32 {
        self.hashes.len() as u32
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// All commitments in order.
    pub fn as_slice(&self) -> &[Hash256] {
        &self.hashes
    }
}
