//! In-Memory Backend Adapter
//!
//! A ledger held in memory plus a `Transport` that serves it over frame
//! channels. Used by the contract tests and by callers that want a local
//! stand-in for a remote server.
//!
//! The transport has knobs to fail opens, drop live links and hold or
//! reorder responses, so session behavior under failure can be exercised
//! deterministically.

use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, BlockId, ChainTip, Coin, Hash256,
    HeightOrId, HistoryEntry, LocatedHeader, SpvError, TxId, TxLocation,
};
use crate::ports::{
    Call, ClientFrame, Notification, RemoteError, Reply, ServerFrame, Transport, TransportLink,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Frame channel capacity per direction.
const LINK_CAPACITY: usize = 1024;

/// Deterministic chain of linked headers on top of `prev`, starting at
/// height `from`. Different `salt` values produce competing branches.
pub fn build_chain(prev: BlockId, from: u32, count: u32, salt: u32) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count as usize);
    let mut prev = prev;
    for height in from..from.saturating_add(count) {
        let mut seed = height.to_le_bytes().to_vec();
        seed.extend_from_slice(&salt.to_le_bytes());
        let header = BlockHeader {
            version: 2,
            prev_block_id: prev,
            merkle_root: Hash256::sha256d(&seed),
            timestamp: 1_296_688_602u32.wrapping_add(height.wrapping_mul(600)),
            bits: 0x207f_ffff,
            nonce: salt,
        };
        prev = header.id();
        headers.push(header);
    }
    headers
}

struct TxRecord {
    raw: Vec<u8>,
    height: Option<u32>,
}

#[derive(Default)]
struct LedgerState {
    headers: BTreeMap<u32, BlockHeader>,
    heights: HashMap<BlockId, u32>,
    txs: HashMap<TxId, TxRecord>,
    history: HashMap<String, Vec<HistoryEntry>>,
    unspent: HashMap<String, Vec<Coin>>,
    broadcast_rejection: Option<String>,
    tip_subscription_failure: Option<String>,
}

impl LedgerState {
    fn tip(&self) -> ChainTip {
        match self.headers.iter().next_back() {
            Some((height, header)) => ChainTip::new(header.id(), *height),
            None => ChainTip::unknown(),
        }
    }

    fn insert_header(&mut self, height: u32, header: BlockHeader) {
        if let Some(old) = self.headers.insert(height, header) {
            self.heights.remove(&old.id());
        }
        self.heights.insert(header.id(), height);
    }

    fn truncate_above(&mut self, height: u32) {
        let Some(first_dropped) = height.checked_add(1) else {
            return;
        };
        let dropped = self.headers.split_off(&first_dropped);
        for header in dropped.values() {
            self.heights.remove(&header.id());
        }
    }
}

struct LinkEntry {
    frames: mpsc::Sender<ServerFrame>,
    tip: bool,
    addresses: HashSet<String>,
    _kill: oneshot::Sender<()>,
}

struct LedgerInner {
    state: RwLock<LedgerState>,
    links: Mutex<HashMap<u64, LinkEntry>>,
}

/// Shared in-memory ledger. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryLedger {
    inner: Arc<LedgerInner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                state: RwLock::new(LedgerState::default()),
                links: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Ledger holding `headers` at heights `0..`.
    pub fn with_chain(headers: &[BlockHeader]) -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.inner.state.write();
            for (height, header) in headers.iter().enumerate() {
                state.insert_header(height as u32, *header);
            }
        }
        ledger
    }

    /// Current tip, or the sentinel for an empty ledger.
    pub fn tip(&self) -> ChainTip {
        self.inner.state.read().tip()
    }

    /// Header stored at `height`.
    pub fn header_at(&self, height: u32) -> Option<BlockHeader> {
        self.inner.state.read().headers.get(&height).copied()
    }

    /// Headers at heights `start..start + count`, stopping at the first gap.
    pub fn headers_from(&self, start: u32, count: u32) -> Vec<BlockHeader> {
        let state = self.inner.state.read();
        (start..start.saturating_add(count))
            .map_while(|height| state.headers.get(&height).copied())
            .collect()
    }

    /// Place a header at an arbitrary height without linking checks.
    pub fn insert_header(&self, height: u32, header: BlockHeader) {
        self.inner.state.write().insert_header(height, header);
    }

    /// Append headers on top of the tip and announce the new tip.
    pub fn extend(&self, headers: &[BlockHeader]) -> ChainTip {
        let tip = {
            let mut state = self.inner.state.write();
            let mut next = state.tip().known_height().map_or(0, |h| h + 1);
            for header in headers {
                state.insert_header(next, *header);
                next += 1;
            }
            state.tip()
        };
        self.announce_tip(tip);
        tip
    }

    /// Append `count` generated headers on top of the tip.
    pub fn mine(&self, count: u32, salt: u32) -> ChainTip {
        let tip = self.tip();
        let from = tip.known_height().map_or(0, |h| h + 1);
        self.extend(&build_chain(tip.block_id, from, count, salt))
    }

    /// Replace everything above `fork_height` with `headers` and announce the
    /// new tip once.
    pub fn reorg(&self, fork_height: u32, headers: &[BlockHeader]) -> ChainTip {
        let tip = {
            let mut state = self.inner.state.write();
            state.truncate_above(fork_height);
            for (offset, header) in headers.iter().enumerate() {
                state.insert_header(fork_height + 1 + offset as u32, *header);
            }
            state.tip()
        };
        debug!(fork_height, height = tip.height, "[spv] memory ledger reorganized");
        self.announce_tip(tip);
        tip
    }

    /// Store a raw transaction; its id is the SHA-256d of `raw`.
    pub fn add_tx(&self, raw: Vec<u8>, height: Option<u32>) -> TxId {
        let tx_id = Hash256::sha256d(&raw);
        self.insert_tx(tx_id, raw, height);
        tx_id
    }

    /// Store raw bytes under an explicit id, even one they do not hash to.
    pub fn insert_tx(&self, tx_id: TxId, raw: Vec<u8>, height: Option<u32>) {
        self.inner
            .state
            .write()
            .txs
            .insert(tx_id, TxRecord { raw, height });
    }

    /// Record that `tx_id` touched `address`, notifying subscribed links.
    pub fn touch(&self, address: &str, tx_id: TxId, height: Option<u32>) {
        self.inner
            .state
            .write()
            .history
            .entry(address.to_string())
            .or_default()
            .push(HistoryEntry { tx_id, height });

        let notification = ServerFrame::Notification(Notification::TouchAddress {
            address: address.to_string(),
            tx_id,
        });
        let links = self.inner.links.lock();
        for link in links.values().filter(|link| link.addresses.contains(address)) {
            if link.frames.try_send(notification.clone()).is_err() {
                debug!(address, "[spv] touch notification not delivered");
            }
        }
    }

    /// Register an unspent output for `address`.
    pub fn add_coin(&self, address: &str, coin: Coin) {
        self.inner
            .state
            .write()
            .unspent
            .entry(address.to_string())
            .or_default()
            .push(coin);
    }

    /// Make every later broadcast fail with `reason`.
    pub fn reject_broadcasts(&self, reason: &str) {
        self.inner.state.write().broadcast_rejection = Some(reason.to_string());
    }

    /// Fail every tip subscription with `reason`.
    pub fn fail_tip_subscriptions(&self, reason: &str) {
        self.inner.state.write().tip_subscription_failure = Some(reason.to_string());
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.inner.links.lock().len()
    }

    /// Addresses a live link has subscribed to, across all links.
    pub fn subscribed_addresses(&self) -> HashSet<String> {
        self.inner
            .links
            .lock()
            .values()
            .flat_map(|link| link.addresses.iter().cloned())
            .collect()
    }

    fn announce_tip(&self, tip: ChainTip) {
        let notification = ServerFrame::Notification(Notification::Tip { tip });
        let links = self.inner.links.lock();
        for link in links.values().filter(|link| link.tip) {
            if link.frames.try_send(notification.clone()).is_err() {
                debug!(height = tip.height, "[spv] tip notification not delivered");
            }
        }
    }

    fn register_link(&self, id: u64, frames: mpsc::Sender<ServerFrame>, kill: oneshot::Sender<()>) {
        self.inner.links.lock().insert(
            id,
            LinkEntry {
                frames,
                tip: false,
                addresses: HashSet::new(),
                _kill: kill,
            },
        );
    }

    fn remove_link(&self, id: u64) {
        self.inner.links.lock().remove(&id);
    }

    fn drop_links(&self) -> usize {
        let dropped: Vec<LinkEntry> = self.inner.links.lock().drain().map(|(_, link)| link).collect();
        dropped.len()
    }

    fn handle(&self, link: u64, call: Call) -> Result<Reply, RemoteError> {
        match call {
            Call::GetTip => Ok(Reply::Tip(self.tip())),
            Call::SubscribeTip => {
                if let Some(reason) = self.inner.state.read().tip_subscription_failure.clone() {
                    return Err(RemoteError::Internal(reason));
                }
                if let Some(entry) = self.inner.links.lock().get_mut(&link) {
                    entry.tip = true;
                }
                Ok(Reply::Tip(self.tip()))
            }
            Call::GetHeader(key) => {
                let state = self.inner.state.read();
                let height = match key {
                    HeightOrId::Height(height) => Some(height),
                    HeightOrId::Id(id) => state.heights.get(&id).copied(),
                };
                height
                    .and_then(|height| {
                        state
                            .headers
                            .get(&height)
                            .map(|header| LocatedHeader { height, header: *header })
                    })
                    .map(Reply::Header)
                    .ok_or_else(|| RemoteError::HeaderNotFound(key.to_string()))
            }
            Call::GetHeaders { start, count } => Ok(Reply::Headers(self.headers_from(start, count))),
            Call::GetTx(tx_id) => {
                let state = self.inner.state.read();
                state
                    .txs
                    .get(&tx_id)
                    .map(|record| Reply::Tx(hex::encode(&record.raw)))
                    .ok_or_else(|| RemoteError::TxNotFound(tx_id.to_hex()))
            }
            Call::GetTxBlockId(tx_id) => {
                let state = self.inner.state.read();
                let record = state
                    .txs
                    .get(&tx_id)
                    .ok_or_else(|| RemoteError::TxNotFound(tx_id.to_hex()))?;
                let location = match record.height {
                    None => TxLocation::Mempool,
                    Some(height) => {
                        let header = state.headers.get(&height).ok_or_else(|| {
                            RemoteError::Internal(format!("no block at height {height}"))
                        })?;
                        TxLocation::Blocks {
                            block_id: header.id(),
                            height,
                        }
                    }
                };
                Ok(Reply::TxLocation(location))
            }
            Call::SendTx(raw_hex) => {
                if let Some(reason) = self.inner.state.read().broadcast_rejection.clone() {
                    return Err(RemoteError::Rejected(reason));
                }
                let raw = hex::decode(&raw_hex)
                    .map_err(|e| RemoteError::Rejected(format!("malformed transaction: {e}")))?;
                Ok(Reply::TxId(self.add_tx(raw, None)))
            }
            Call::AddressesQuery { addresses, options } => {
                Ok(Reply::Addresses(self.query(&addresses, options)))
            }
            Call::GetUnspent(address) => {
                let state = self.inner.state.read();
                Ok(Reply::Coins(
                    state.unspent.get(&address).cloned().unwrap_or_default(),
                ))
            }
            Call::SubscribeAddress(address) => {
                if let Some(entry) = self.inner.links.lock().get_mut(&link) {
                    entry.addresses.insert(address);
                }
                Ok(Reply::Subscribed)
            }
        }
    }

    fn query(&self, addresses: &[String], options: AddressesQueryOptions) -> AddressesQueryResult {
        let state = self.inner.state.read();
        let transactions = addresses
            .iter()
            .filter_map(|address| state.history.get(address))
            .flatten()
            .filter(|entry| options.matches(entry))
            .copied()
            .collect();
        AddressesQueryResult {
            transactions,
            latest: state.tip(),
        }
    }
}

/// How a link answers requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    /// Answer each request as it arrives.
    Immediate,
    /// Buffer this many requests, then answer them newest first.
    Reversed(usize),
    /// Never answer.
    Hold,
}

/// `Transport` serving a [`MemoryLedger`].
pub struct MemoryTransport {
    ledger: MemoryLedger,
    endpoint: String,
    header_ranges: bool,
    failing_opens: AtomicU32,
    opens: AtomicU32,
    next_link: AtomicU64,
    mode: Mutex<ResponseMode>,
}

impl MemoryTransport {
    /// Transport over `ledger`.
    pub fn new(ledger: MemoryLedger) -> Self {
        Self {
            ledger,
            endpoint: "memory://ledger".to_string(),
            header_ranges: true,
            failing_opens: AtomicU32::new(0),
            opens: AtomicU32::new(0),
            next_link: AtomicU64::new(1),
            mode: Mutex::new(ResponseMode::Immediate),
        }
    }

    /// Advertise no header range support (no verification methods).
    pub fn without_header_ranges(mut self) -> Self {
        self.header_ranges = false;
        self
    }

    /// The served ledger.
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    /// Fail the next `count` opens.
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Open attempts so far, failed ones included.
    pub fn open_attempts(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Response mode for links opened from now on.
    pub fn set_response_mode(&self, mode: ResponseMode) {
        *self.mode.lock() = mode;
    }

    /// Close every live link from the server side.
    pub fn drop_links(&self) -> usize {
        let dropped = self.ledger.drop_links();
        debug!(dropped, "[spv] memory transport dropped links");
        dropped
    }
}

async fn serve_link(
    ledger: MemoryLedger,
    link: u64,
    mode: ResponseMode,
    mut requests: mpsc::Receiver<ClientFrame>,
    responses: mpsc::Sender<ServerFrame>,
    mut kill: oneshot::Receiver<()>,
) {
    let mut held = Vec::new();
    loop {
        let frame = tokio::select! {
            frame = requests.recv() => frame,
            _ = &mut kill => break,
        };
        let Some(ClientFrame::Request { id, call }) = frame else {
            break;
        };
        trace!(link, id, method = call.method(), "[spv] memory backend request");
        let response = ServerFrame::Response {
            id,
            result: ledger.handle(link, call),
        };

        let ready = match mode {
            ResponseMode::Immediate => vec![response],
            ResponseMode::Hold => {
                held.push(response);
                continue;
            }
            ResponseMode::Reversed(window) => {
                held.push(response);
                if held.len() < window {
                    continue;
                }
                held.drain(..).rev().collect()
            }
        };
        for response in ready {
            if responses.send(response).await.is_err() {
                ledger.remove_link(link);
                return;
            }
        }
    }
    ledger.remove_link(link);
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<TransportLink, SpvError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SpvError::Connection(format!("{} refused", self.endpoint)));
        }

        let link = self.next_link.fetch_add(1, Ordering::SeqCst);
        let (request_tx, request_rx) = mpsc::channel(LINK_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(LINK_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.ledger.register_link(link, response_tx.clone(), kill_tx);

        let mode = *self.mode.lock();
        tokio::spawn(serve_link(
            self.ledger.clone(),
            link,
            mode,
            request_rx,
            response_tx,
            kill_rx,
        ));
        debug!(link, "[spv] memory link opened");

        Ok(TransportLink {
            outbound: request_tx,
            inbound: response_rx,
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn supports_header_ranges(&self) -> bool {
        self.header_ranges
    }
}
