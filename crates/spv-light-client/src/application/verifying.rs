//! # Verifying Blockchain
//!
//! Keeps headers (or chunk commitments) in `Storage` and accepts nothing from
//! the connector that does not match them.
//!
//! ## Sync
//!
//! On every connector tip the blockchain, holding the storage write lock:
//!
//! 1. seeds compact storage from the known chunk table,
//! 2. finds the longest stored prefix the backend still agrees with (raw
//!    headers first, then whole chunks by re-deriving their commitments),
//! 3. truncates storage past that point,
//! 4. fetches headers forward in batches, checking `prev_block_id` linkage,
//!    committing every chunk that fills up,
//! 5. records the last hash and replaces the tip, announcing it once.
//!
//! ## Header lookups
//!
//! | Height                  | Accepted when                                   |
//! |-------------------------|-------------------------------------------------|
//! | inside a committed chunk| equal to the header of the re-verified chunk    |
//! | inside the open chunk   | equal to the stored raw header                  |
//! | tip + 1                 | `prev_block_id` is the last stored hash         |
//! | anything else           | never                                           |

use super::follower::{confirm_tip, require_live, spawn_follower, TipSink, TipTracker};
use crate::config::LightClientConfig;
use crate::domain::{
    chunk_index, chunk_start, compute_chunk_hash, validate_linkage, verify_chunk,
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, BlockId, ChainTip, Coin, Hash256,
    HeightOrId, KnownChunkHashes, LedgerEventFilter, LedgerSubscription, LocatedHeader, SpvError,
    SyncResult, TxId, TxLocation, CHUNK_SIZE,
};
use crate::ports::{Blockchain, Connector, Storage};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type VerifiedChunk = Arc<Vec<BlockHeader>>;

/// What storage currently holds.
#[derive(Clone, Copy, Debug)]
struct Layout {
    compact: bool,
    /// Committed chunk hashes.
    chunks: u32,
    /// Raw headers (all of them in full mode, the open chunk in compact mode).
    headers: u32,
}

impl Layout {
    /// Headers covered by storage, committed ones included.
    fn count(&self) -> u32 {
        if self.compact {
            self.chunks * CHUNK_SIZE + self.headers
        } else {
            self.headers
        }
    }

    /// Height of the first raw header.
    fn raw_start(&self) -> u32 {
        if self.compact {
            self.chunks * CHUNK_SIZE
        } else {
            0
        }
    }
}

struct VerifyingCore {
    connector: Arc<dyn Connector>,
    storage: Arc<dyn Storage>,
    /// Storage writes take it exclusively, verifying reads shared.
    storage_lock: RwLock<()>,
    known: KnownChunkHashes,
    chunk_cache: Mutex<LruCache<u32, (Hash256, VerifiedChunk)>>,
    batch_size: u32,
    tracker: TipTracker,
}

#[async_trait]
impl TipSink for VerifyingCore {
    async fn accept_tip(&self, tip: ChainTip) {
        let latest = self.tracker.latest();
        if tip.is_unknown() || tip == latest {
            return;
        }
        // Storage may run ahead of the tracked tip after a failed sync.
        let stored = match self.layout().await {
            Ok(layout) => i64::from(layout.count()) - 1,
            Err(e) => {
                warn!(error = %e, "[spv] storage unavailable, tip ignored");
                return;
            }
        };
        let Some(tip) = confirm_tip(self.connector.as_ref(), latest.height.max(stored), tip).await
        else {
            return;
        };
        if tip.is_unknown() || tip == self.tracker.latest() {
            return;
        }
        match self.sync_to(tip).await {
            Ok(result) => debug!(
                synced = result.headers_synced,
                height = result.tip.height,
                duration_ms = result.duration_ms,
                "[spv] headers synced"
            ),
            Err(e) => warn!(height = tip.height, error = %e, "[spv] tip rejected"),
        }
    }
}

impl VerifyingCore {
    async fn layout(&self) -> Result<Layout, SpvError> {
        let compact = self.storage.is_compact();
        let chunks = if compact {
            self.storage.get_chunk_hashes_count().await?
        } else {
            0
        };
        Ok(Layout {
            compact,
            chunks,
            headers: self.storage.get_headers_count().await?,
        })
    }

    /// Raw stored header at `height`; caller guarantees it is in raw range.
    async fn raw_header(&self, layout: &Layout, height: u32) -> Result<BlockHeader, SpvError> {
        self.storage.get_header(height - layout.raw_start()).await
    }

    /// Fetch chunk `index`, check it against the stored commitment and cache it.
    async fn verified_chunk(&self, index: u32) -> Result<VerifiedChunk, SpvError> {
        let commitment = self.storage.get_chunk_hash(index).await?;
        if let Some((cached_for, chunk)) = self.chunk_cache.lock().get(&index) {
            if *cached_for == commitment {
                return Ok(Arc::clone(chunk));
            }
        }

        let headers = self
            .connector
            .get_headers(chunk_start(index), CHUNK_SIZE)
            .await?;
        verify_chunk(index, &headers, &commitment)?;

        let chunk = Arc::new(headers);
        self.chunk_cache
            .lock()
            .put(index, (commitment, Arc::clone(&chunk)));
        Ok(chunk)
    }

    fn forget_chunks_from(&self, first: u32) {
        let mut cache = self.chunk_cache.lock();
        let stale: Vec<u32> = cache
            .iter()
            .map(|(index, _)| *index)
            .filter(|index| *index >= first)
            .collect();
        for index in stale {
            cache.pop(&index);
        }
    }

    /// Id of the header at `count - 1`, i.e. the parent of height `count`.
    async fn tail_id(&self, layout: &Layout, count: u32) -> Result<BlockId, SpvError> {
        if count == 0 {
            return Ok(Hash256::ZERO);
        }
        let height = count - 1;
        if height >= layout.raw_start() {
            return Ok(self.raw_header(layout, height).await?.id());
        }
        let chunk = self.verified_chunk(chunk_index(height)).await?;
        chunk
            .get((height % CHUNK_SIZE) as usize)
            .map(BlockHeader::id)
            .ok_or_else(|| SpvError::Storage(format!("chunk missing height {height}")))
    }

    /// Append known chunk hashes to compact storage where it has none yet.
    async fn seed_known_chunks(&self, layout: &mut Layout) -> Result<(), SpvError> {
        if !layout.compact || self.known.is_empty() {
            return Ok(());
        }
        for (index, known) in self.known.as_slice().iter().enumerate() {
            let index = index as u32;
            if index < layout.chunks {
                if self.storage.get_chunk_hash(index).await? != *known {
                    debug!(index, "[spv] stored chunk differs from known table, seeding stops");
                    return Ok(());
                }
                continue;
            }
            if layout.headers > 0 {
                return Ok(());
            }
            self.storage.put_chunk_hash(*known).await?;
            layout.chunks += 1;
        }
        Ok(())
    }

    /// Length of the stored prefix that the backend still agrees with.
    async fn common_prefix(&self, layout: &Layout, target: u32) -> Result<u32, SpvError> {
        let mut keep = layout.count().min(target.saturating_add(1));
        let raw_start = layout.raw_start();

        // Newest header alone first: the common case is a plain extension.
        let mut step = 1;
        while keep > raw_start {
            let lo = keep - step.min(keep - raw_start);
            let remote = self.connector.get_headers(lo, keep - lo).await?;
            for height in (lo..keep).rev() {
                let local = self.raw_header(layout, height).await?;
                if remote.get((height - lo) as usize) == Some(&local) {
                    return Ok(height + 1);
                }
            }
            keep = lo;
            step = self.batch_size;
        }

        for index in (0..keep / CHUNK_SIZE).rev() {
            let commitment = self.storage.get_chunk_hash(index).await?;
            let remote = self
                .connector
                .get_headers(chunk_start(index), CHUNK_SIZE)
                .await?;
            if remote.len() == CHUNK_SIZE as usize && compute_chunk_hash(&remote) == commitment {
                return Ok(chunk_start(index + 1));
            }
        }
        Ok(0)
    }

    /// Drop everything stored at or above height `keep`.
    async fn truncate_to(&self, layout: &Layout, keep: u32) -> Result<u32, SpvError> {
        if keep >= layout.count() {
            return Ok(keep);
        }
        let keep = if layout.compact {
            let chunks = keep / CHUNK_SIZE;
            if chunks < layout.chunks {
                self.storage.truncate_chunk_hashes(chunks).await?;
                chunk_start(chunks)
            } else {
                self.storage.truncate_headers(keep - layout.raw_start()).await?;
                keep
            }
        } else {
            self.storage.truncate_headers(keep).await?;
            keep
        };
        self.forget_chunks_from(keep / CHUNK_SIZE);
        Ok(keep)
    }

    async fn sync_to(&self, tip: ChainTip) -> Result<SyncResult, SpvError> {
        let started = Instant::now();
        let Some(target) = tip.known_height() else {
            return Err(SpvError::InvalidData("cannot sync to the unknown tip".to_string()));
        };

        let _write = self.storage_lock.write().await;

        let mut layout = self.layout().await?;
        self.seed_known_chunks(&mut layout).await?;
        let stored = layout.count();

        let keep = self.common_prefix(&layout, target).await?;
        let keep = self.truncate_to(&layout, keep).await?;
        let fork_height = (keep < stored).then(|| i64::from(keep) - 1);
        if let Some(fork) = fork_height {
            info!(fork_height = fork, dropped = stored - keep, "[spv] storage rolled back");
        }
        let layout = self.layout().await?;

        let mut prev = self.tail_id(&layout, keep).await?;
        if fork_height.is_some() {
            self.storage.set_last_hash(prev).await?;
        }
        // Headers of the chunk being filled, needed to commit it.
        let mut open = Vec::with_capacity(CHUNK_SIZE as usize);
        for height in chunk_start(chunk_index(keep))..keep {
            let header = if height >= layout.raw_start() {
                self.raw_header(&layout, height).await?
            } else {
                self.verified_chunk(chunk_index(height)).await?[(height % CHUNK_SIZE) as usize]
            };
            open.push(header);
        }

        let mut next = keep;
        while next <= target {
            let room = CHUNK_SIZE - next % CHUNK_SIZE;
            let want = self.batch_size.min(room).min(target - next + 1);
            let headers = self.connector.get_headers(next, want).await?;
            if headers.is_empty() {
                return Err(SpvError::HeaderNotFound(next.to_string()));
            }
            if headers.len() > want as usize {
                return Err(SpvError::InvalidData(format!(
                    "asked for {want} headers at {next}, got {}",
                    headers.len()
                )));
            }
            prev = validate_linkage(&headers, prev, next)?;
            self.storage.put_headers(&headers).await?;
            // `last_hash` names the last stored header at every step.
            self.storage.set_last_hash(prev).await?;
            open.extend_from_slice(&headers);
            next += headers.len() as u32;

            if next % CHUNK_SIZE == 0 {
                let index = chunk_index(next - 1);
                let commitment = compute_chunk_hash(&open);
                self.storage.put_chunk_hash(commitment).await?;
                if layout.compact {
                    self.storage.truncate_headers(0).await?;
                }
                let chunk = Arc::new(std::mem::take(&mut open));
                self.chunk_cache.lock().put(index, (commitment, chunk));
                debug!(index, commitment = %commitment, "[spv] chunk committed");
            }
        }

        if next == keep {
            self.storage.set_last_hash(prev).await?;
        }

        let accepted = ChainTip::new(prev, next - 1);
        self.tracker.replace(accepted);
        Ok(SyncResult {
            headers_synced: u64::from(next - keep),
            tip: accepted,
            fork_height,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Check a connector header against storage.
    async fn verify_located(&self, located: &LocatedHeader) -> Result<(), SpvError> {
        let _read = self.storage_lock.read().await;
        let layout = self.layout().await?;
        let LocatedHeader { height, header } = *located;
        let count = layout.count();

        let expected = if height < layout.raw_start() {
            let chunk = self.verified_chunk(chunk_index(height)).await?;
            chunk[(height % CHUNK_SIZE) as usize]
        } else if height < count {
            self.raw_header(&layout, height).await?
        } else if height == count {
            let parent = match self.storage.get_last_hash().await? {
                Some(hash) if count > 0 => hash,
                _ => self.tail_id(&layout, count).await?,
            };
            if header.prev_block_id == parent {
                return Ok(());
            }
            return Err(SpvError::Verification(format!(
                "header {} at height {height} does not extend tracked tip {parent}",
                header.id()
            )));
        } else {
            return Err(SpvError::Verification(format!(
                "height {height} is beyond the tracked chain ({count} headers)"
            )));
        };

        if expected != header {
            return Err(SpvError::Verification(format!(
                "header at height {height} is {}, stored chain has {}",
                header.id(),
                expected.id()
            )));
        }
        Ok(())
    }
}

/// Blockchain view that verifies every header against storage.
pub struct VerifyingBlockchain {
    core: Arc<VerifyingCore>,
    follower: JoinHandle<()>,
}

impl VerifyingBlockchain {
    /// Follow `connector` (connecting or open), keeping headers in `storage`.
    pub fn new(
        connector: Arc<dyn Connector>,
        storage: Arc<dyn Storage>,
        config: &LightClientConfig,
    ) -> Result<Self, SpvError> {
        require_live(connector.as_ref())?;
        if !connector.support_verification_methods() {
            return Err(SpvError::NotImplemented("support_verification_methods"));
        }

        let cache_size = NonZeroUsize::new(config.chunk_cache_size).unwrap_or(NonZeroUsize::MIN);
        let core = Arc::new(VerifyingCore {
            connector: Arc::clone(&connector),
            storage,
            storage_lock: RwLock::new(()),
            known: config.known_chunks(),
            chunk_cache: Mutex::new(LruCache::new(cache_size)),
            batch_size: config.header_batch_size.max(1),
            tracker: TipTracker::new(),
        });
        let follower = spawn_follower(connector, Arc::clone(&core), core.tracker.bus().clone());
        Ok(Self { core, follower })
    }

    /// Bring storage up to the backend's current tip now.
    pub async fn sync(&self) -> Result<SyncResult, SpvError> {
        let tip = self.core.connector.get_tip().await?;
        self.core.sync_to(tip).await
    }
}

impl Drop for VerifyingBlockchain {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

#[async_trait]
impl Blockchain for VerifyingBlockchain {
    fn latest(&self) -> ChainTip {
        self.core.tracker.latest()
    }

    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.core.tracker.subscribe(filter)
    }

    fn is_verifying(&self) -> bool {
        true
    }

    async fn get_header(&self, key: HeightOrId) -> Result<BlockHeader, SpvError> {
        let located = self.core.connector.get_header(key).await?;
        match key {
            HeightOrId::Height(height) if located.height != height => {
                return Err(SpvError::Verification(format!(
                    "asked for height {height}, backend answered height {}",
                    located.height
                )));
            }
            HeightOrId::Id(id) if located.header.id() != id => {
                return Err(SpvError::Verification(format!(
                    "asked for block {id}, backend header hashes to {}",
                    located.header.id()
                )));
            }
            _ => {}
        }
        self.core.verify_located(&located).await?;
        Ok(located.header)
    }

    async fn get_tx(&self, tx_id: &TxId) -> Result<Vec<u8>, SpvError> {
        let raw = self.core.connector.get_tx(tx_id).await?;
        let computed = Hash256::sha256d(&raw);
        if computed != *tx_id {
            return Err(SpvError::Verification(format!(
                "transaction {tx_id} bytes hash to {computed}"
            )));
        }
        Ok(raw)
    }

    async fn get_tx_block_id(&self, tx_id: &TxId) -> Result<TxLocation, SpvError> {
        let location = self.core.connector.get_tx_block_id(tx_id).await?;
        if let TxLocation::Blocks { block_id, height } = location {
            let tracked = self.latest().known_height().is_some_and(|tip| height <= tip);
            if tracked {
                let header = self.get_header(HeightOrId::Height(height)).await?;
                if header.id() != block_id {
                    return Err(SpvError::Verification(format!(
                        "transaction {tx_id} claimed in {block_id}, chain has {} at height {height}",
                        header.id()
                    )));
                }
            }
        }
        Ok(location)
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<TxId, SpvError> {
        self.core.connector.send_tx(raw_hex).await
    }

    async fn addresses_query(
        &self,
        addresses: &[String],
        options: AddressesQueryOptions,
    ) -> Result<AddressesQueryResult, SpvError> {
        self.core.connector.addresses_query(addresses, options).await
    }

    async fn get_unspent(&self, address: &str) -> Result<Vec<Coin>, SpvError> {
        self.core.connector.get_unspent(address).await
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), SpvError> {
        self.core.connector.subscribe_address(address).await
    }
}
