//! # Chunk Commitments
//!
//! Compact mode replaces every run of [`CHUNK_SIZE`] consecutive headers by a
//! single commitment hash. Any header in a committed chunk can be re-derived
//! by fetching the chunk again and recomputing the commitment.

use super::errors::SpvError;
use super::hash::{BlockId, Hash256};
use super::header::{BlockHeader, HEADER_SIZE};

/// Number of headers per chunk (one difficulty retarget interval).
pub const CHUNK_SIZE: u32 = 2016;

/// Index of the chunk containing `height`.
pub fn chunk_index(height: u32) -> u32 {
    height / CHUNK_SIZE
}

/// Height of the first header in chunk `index`.
pub fn chunk_start(index: u32) -> u32 {
    index * CHUNK_SIZE
}

/// Commitment over a chunk: SHA-256d of the concatenated serialized headers.
pub fn compute_chunk_hash(headers: &[BlockHeader]) -> Hash256 {
    let mut buf = Vec::with_capacity(headers.len() * HEADER_SIZE);
    for header in headers {
        buf.extend_from_slice(&header.to_bytes());
    }
    Hash256::sha256d(&buf)
}

/// Check that `headers` form a chain starting on top of `expected_prev`.
///
/// Returns the id of the last header (or `expected_prev` for an empty batch).
pub fn validate_linkage(
    headers: &[BlockHeader],
    expected_prev: BlockId,
    first_height: u32,
) -> Result<BlockId, SpvError> {
    let mut prev = expected_prev;
    for (offset, header) in headers.iter().enumerate() {
        if header.prev_block_id != prev {
            return Err(SpvError::Verification(format!(
                "broken chain at height {}: expected parent {}, got {}",
                first_height as usize + offset,
                prev,
                header.prev_block_id
            )));
        }
        prev = header.id();
    }
    Ok(prev)
}

/// Check a complete chunk against its stored commitment.
pub fn verify_chunk(
    index: u32,
    headers: &[BlockHeader],
    commitment: &Hash256,
) -> Result<(), SpvError> {
    if headers.len() != CHUNK_SIZE as usize {
        return Err(SpvError::Verification(format!(
            "chunk {} has {} headers, expected {}",
            index,
            headers.len(),
            CHUNK_SIZE
        )));
    }

    let computed = compute_chunk_hash(headers);
    if computed != *commitment {
        return Err(SpvError::Verification(format!(
            "chunk {} commitment mismatch: stored {}, derived {}",
            index, commitment, computed
        )));
    }
    Ok(())
}
