//! # Block Headers
//!
//! The 80-byte header an SPV client keeps instead of full blocks.

use super::errors::SpvError;
use super::hash::{BlockId, Hash256};
use serde::{Deserialize, Serialize};

/// Size of a serialized header in bytes.
pub const HEADER_SIZE: usize = 80;

/// Block header.
///
/// Identity is the SHA-256d of the serialized form and is never stored
/// alongside the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Id of the parent block.
    pub prev_block_id: BlockId,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp.
    pub timestamp: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize to the 80-byte little-endian form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_block_id.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Parse the 80-byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SpvError> {
        if bytes.len() != HEADER_SIZE {
            return Err(SpvError::InvalidData(format!(
                "header must be {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&bytes[36..68]);

        Ok(Self {
            version: i32::from_le_bytes(word(0)),
            prev_block_id: Hash256::from_bytes(prev),
            merkle_root: Hash256::from_bytes(merkle),
            timestamp: u32::from_le_bytes(word(68)),
            bits: u32::from_le_bytes(word(72)),
            nonce: u32::from_le_bytes(word(76)),
        })
    }

    /// Parse the hex encoding of the 80-byte form.
    pub fn from_hex(s: &str) -> Result<Self, SpvError> {
        let bytes = hex::decode(s).map_err(|e| SpvError::InvalidData(format!("header hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Hex encoding of the 80-byte form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Block id: SHA-256d of the serialized header.
    pub fn id(&self) -> BlockId {
        Hash256::sha256d(&self.to_bytes())
    }
}

/// A header together with the height the backend reported for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedHeader {
    /// Block height.
    pub height: u32,
    /// The header.
    pub header: BlockHeader,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Testnet header at height 300000.
    pub(crate) fn header_300000() -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_block_id: Hash256::from_hex(
                "00000000dfe970844d1bf983d0745f709368b5c66224837a17ed633f0dabd300",
            )
            .unwrap(),
            merkle_root: Hash256::from_hex(
                "ca7c7b64204eaa4b0a1632a7d326d4d8255bfd0fa1f5d66f8def8fa72e5b2f32",
            )
            .unwrap(),
            timestamp: 1412899877,
            bits: 453050367,
            nonce: 733842077,
        }
    }

    #[test]
    fn test_header_300000_id() {
        assert_eq!(
            header_300000().id().to_hex(),
            "000000000000226f7618566e70a2b5e020e29579b46743f05348427239bf41a1"
        );
    }

    #[test]
    fn test_header_300000_serialization() {
        let header = header_300000();
        assert_eq!(
            header.to_hex(),
            "0200000000d3ab0d3f63ed177a832462c6b56893705f74d083f91b4d8470e9df00000000\
             322f5b2ea78fef8d6fd6f5a10ffd5b25d8d426d3a732160a4baa4e20647b7cca\
             25243754ffff001b9d8abd2b"
        );
        assert_eq!(BlockHeader::from_hex(&header.to_hex()).unwrap(), header);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let result = BlockHeader::from_bytes(&[0u8; 79]);
        assert!(matches!(result, Err(SpvError::InvalidData(_))));
    }
}
