//! In-Memory Storage Adapter
//!
//! Implements the `Storage` port for tests and short-lived clients. Both
//! stores live behind one lock, so every call (truncations included) is a
//! single atomic step.

use crate::domain::{BlockHeader, Hash256, SpvError, CHUNK_SIZE};
use crate::ports::Storage;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct StorageState {
    last_hash: Option<Hash256>,
    chunk_hashes: Vec<Hash256>,
    headers: Vec<BlockHeader>,
}

/// In-memory header storage, full or compact.
pub struct MemoryStorage {
    compact: bool,
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    /// Storage that keeps every header; indexes are heights.
    pub fn full() -> Self {
        Self::new(false)
    }

    /// Storage that keeps chunk commitments plus the open chunk's headers.
    pub fn compact() -> Self {
        Self::new(true)
    }

    /// Storage in the given mode.
    pub fn new(compact: bool) -> Self {
        Self {
            compact,
            state: Mutex::new(StorageState::default()),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn is_compact(&self) -> bool {
        self.compact
    }

    async fn get_last_hash(&self) -> Result<Option<Hash256>, SpvError> {
        Ok(self.state.lock().last_hash)
    }

    async fn set_last_hash(&self, hash: Hash256) -> Result<(), SpvError> {
        self.state.lock().last_hash = Some(hash);
        Ok(())
    }

    async fn get_chunk_hashes_count(&self) -> Result<u32, SpvError> {
        Ok(self.state.lock().chunk_hashes.len() as u32)
    }

    async fn get_chunk_hash(&self, index: u32) -> Result<Hash256, SpvError> {
        self.state
            .lock()
            .chunk_hashes
            .get(index as usize)
            .copied()
            .ok_or_else(|| SpvError::Storage(format!("no chunk hash at index {index}")))
    }

    async fn put_chunk_hashes(&self, hashes: &[Hash256]) -> Result<(), SpvError> {
        self.state.lock().chunk_hashes.extend_from_slice(hashes);
        Ok(())
    }

    async fn truncate_chunk_hashes(&self, limit: u32) -> Result<(), SpvError> {
        let mut state = self.state.lock();
        if limit as usize >= state.chunk_hashes.len() {
            return Ok(());
        }
        state.chunk_hashes.truncate(limit as usize);
        if self.compact {
            // Open-chunk headers extend the chunk that was just dropped.
            state.headers.clear();
        }
        debug!(limit, compact = self.compact, "[spv] chunk hashes truncated");
        Ok(())
    }

    async fn get_headers_count(&self) -> Result<u32, SpvError> {
        Ok(self.state.lock().headers.len() as u32)
    }

    async fn get_header(&self, index: u32) -> Result<BlockHeader, SpvError> {
        self.state
            .lock()
            .headers
            .get(index as usize)
            .copied()
            .ok_or_else(|| SpvError::Storage(format!("no header at index {index}")))
    }

    async fn put_headers(&self, headers: &[BlockHeader]) -> Result<(), SpvError> {
        let mut state = self.state.lock();
        if self.compact && state.headers.len() + headers.len() > CHUNK_SIZE as usize {
            return Err(SpvError::Mode(format!(
                "open chunk holds {} headers, cannot add {} more",
                state.headers.len(),
                headers.len()
            )));
        }
        state.headers.extend_from_slice(headers);
        Ok(())
    }

    async fn truncate_headers(&self, limit: u32) -> Result<(), SpvError> {
        let mut state = self.state.lock();
        if limit as usize >= state.headers.len() {
            return Ok(());
        }
        state.headers.truncate(limit as usize);
        if !self.compact {
            // Drop commitments for chunks that are no longer complete.
            let complete = (limit / CHUNK_SIZE) as usize;
            state.chunk_hashes.truncate(complete);
        }
        debug!(limit, compact = self.compact, "[spv] headers truncated");
        Ok(())
    }

    async fn clear(&self) -> Result<(), SpvError> {
        *self.state.lock() = StorageState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chunk::tests::make_chain;
    use crate::domain::compute_chunk_hash;

    #[tokio::test]
    async fn test_full_mode_round_trip() {
        let storage = MemoryStorage::full();
        let chain = make_chain(10, 0);
        storage.put_headers(&chain).await.unwrap();

        assert!(!storage.is_compact());
        assert!(storage.check_compact_mode_available().is_err());
        assert_eq!(storage.get_headers_count().await.unwrap(), 10);
        assert_eq!(storage.get_header(7).await.unwrap(), chain[7]);
        assert!(matches!(
            storage.get_header(10).await,
            Err(SpvError::Storage(msg)) if msg.contains("10")
        ));
    }

    #[tokio::test]
    async fn test_full_mode_truncate_drops_covering_commitments() {
        let storage = MemoryStorage::full();
        let chain = make_chain(CHUNK_SIZE * 2 + 5, 0);
        storage.put_headers(&chain).await.unwrap();
        storage
            .put_chunk_hashes(&[
                compute_chunk_hash(&chain[..CHUNK_SIZE as usize]),
                compute_chunk_hash(&chain[CHUNK_SIZE as usize..2 * CHUNK_SIZE as usize]),
            ])
            .await
            .unwrap();

        storage.truncate_headers(CHUNK_SIZE + 3).await.unwrap();
        assert_eq!(storage.get_headers_count().await.unwrap(), CHUNK_SIZE + 3);
        assert_eq!(storage.get_chunk_hashes_count().await.unwrap(), 1);

        // limit >= count is a no-op
        storage.truncate_headers(u32::MAX).await.unwrap();
        assert_eq!(storage.get_headers_count().await.unwrap(), CHUNK_SIZE + 3);
    }

    #[tokio::test]
    async fn test_compact_mode_open_chunk_overflow() {
        let storage = MemoryStorage::compact();
        assert!(storage.check_compact_mode_available().is_ok());

        let chain = make_chain(CHUNK_SIZE, 0);
        storage.put_headers(&chain[..100]).await.unwrap();
        storage.put_headers(&chain[100..]).await.unwrap();
        assert_eq!(storage.get_headers_count().await.unwrap(), CHUNK_SIZE);

        let extra = make_chain(1, 9);
        assert!(matches!(
            storage.put_headers(&extra).await,
            Err(SpvError::Mode(_))
        ));
        assert_eq!(storage.get_headers_count().await.unwrap(), CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_compact_truncate_chunk_hashes_drops_open_chunk() {
        let storage = MemoryStorage::compact();
        let hashes = [Hash256::sha256d(b"a"), Hash256::sha256d(b"b")];
        storage.put_chunk_hashes(&hashes).await.unwrap();
        storage.put_headers(&make_chain(3, 0)).await.unwrap();

        // No-op: nothing discarded, open chunk kept.
        storage.truncate_chunk_hashes(2).await.unwrap();
        assert_eq!(storage.get_headers_count().await.unwrap(), 3);

        storage.truncate_chunk_hashes(1).await.unwrap();
        assert_eq!(storage.get_chunk_hashes_count().await.unwrap(), 1);
        assert_eq!(storage.get_chunk_hash(0).await.unwrap(), hashes[0]);
        assert_eq!(storage.get_headers_count().await.unwrap(), 0);
        assert!(storage.get_chunk_hash(1).await.is_err());
    }

    #[tokio::test]
    async fn test_last_hash_and_clear() {
        let storage = MemoryStorage::compact();
        assert_eq!(storage.get_last_hash().await.unwrap(), None);

        let hash = Hash256::sha256d(b"tip");
        storage.set_last_hash(hash).await.unwrap();
        storage.put_chunk_hash(hash).await.unwrap();
        assert_eq!(storage.get_last_hash().await.unwrap(), Some(hash));

        storage.clear().await.unwrap();
        assert_eq!(storage.get_last_hash().await.unwrap(), None);
        assert_eq!(storage.get_chunk_hashes_count().await.unwrap(), 0);
    }
}
