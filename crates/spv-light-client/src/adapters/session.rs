//! Session Connector Adapter
//!
//! Implements the `Connector` port on top of a `Transport`. One driver task
//! per session opens links, pumps inbound frames and reconnects with
//! exponential backoff. Requests are correlated with responses by id, so any
//! number of them can be in flight and replies may arrive in any order.

use crate::config::ConnectorConfig;
use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, ChainTip, Coin, HeightOrId,
    LedgerEvent, LedgerEventFilter, LedgerSubscription, LocatedHeader, ReadyState, SpvError,
    TxId, TxLocation,
};
use crate::ports::{
    Call, ClientFrame, Connector, Notification, Reply, ServerFrame, Transport, TransportLink,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use spv_bus::{EventBus, EventPublisher};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PendingReply = oneshot::Sender<Result<Reply, SpvError>>;

/// Connector backed by a reconnecting session over a [`Transport`].
pub struct SessionConnector {
    session: Arc<Session>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the connector handle, its driver task and the
/// resubscription tasks.
struct Session {
    transport: Arc<dyn Transport>,
    config: ConnectorConfig,
    state: watch::Sender<ReadyState>,
    /// Serializes state transitions so events are published in order.
    transition_lock: Mutex<()>,
    bus: EventBus<LedgerEvent>,
    outgoing: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    pending: DashMap<u64, PendingReply>,
    next_id: AtomicU64,
    /// Id of the outstanding tip subscription, 0 when none.
    tip_request: AtomicU64,
    addresses: Mutex<BTreeSet<String>>,
    shutdown: watch::Sender<bool>,
}

impl SessionConnector {
    /// Create a closed connector; call [`Connector::connect`] to open it.
    pub fn new(transport: Arc<dyn Transport>, config: ConnectorConfig) -> Self {
        let (state, _) = watch::channel(ReadyState::Closed);
        let (shutdown, _) = watch::channel(false);
        Self {
            session: Arc::new(Session {
                transport,
                config,
                state,
                transition_lock: Mutex::new(()),
                bus: EventBus::new(),
                outgoing: Mutex::new(None),
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                tip_request: AtomicU64::new(0),
                addresses: Mutex::new(BTreeSet::new()),
                shutdown,
            }),
            driver: Mutex::new(None),
        }
    }

    /// Requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.session.pending.len()
    }

    /// Addresses re-registered with the backend after every reconnect.
    pub fn subscribed_addresses(&self) -> Vec<String> {
        self.session.addresses.lock().iter().cloned().collect()
    }

    async fn wait_for(&self, target: ReadyState) {
        let mut state = self.session.state.subscribe();
        while *state.borrow_and_update() != target {
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for SessionConnector {
    fn drop(&mut self) {
        self.session.shutdown.send_replace(true);
    }
}

fn transition_allowed(from: ReadyState, to: ReadyState) -> bool {
    use ReadyState::*;
    matches!(
        (from, to),
        (Closed, Connecting)
            | (Connecting, Open)
            | (Open, Connecting)
            | (Connecting | Open, Closing)
            | (Connecting | Open | Closing, Closed)
    )
}

fn unexpected(call: &'static str, reply: Reply) -> SpvError {
    SpvError::InvalidData(format!("unexpected reply to {call}: {reply:?}"))
}

impl Session {
    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Move to `to` if the lifecycle allows it, publishing the new state.
    fn transition(&self, to: ReadyState) -> bool {
        let _guard = self.transition_lock.lock();
        let from = self.ready_state();
        if from == to || !transition_allowed(from, to) {
            return false;
        }
        self.state.send_replace(to);
        debug!(from = %from, to = %to, "[spv] session state changed");
        self.bus.publish(LedgerEvent::NewReadyState(to));
        true
    }

    /// Forget the current link and reject everything still waiting on it.
    fn drop_link(&self) {
        // Take the sender before draining: a request either registered in
        // time to be drained or finds no sender.
        self.outgoing.lock().take();

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut rejected = 0usize;
        for id in ids {
            if let Some((_, reply)) = self.pending.remove(&id) {
                let _ = reply.send(Err(SpvError::ConnectionLost));
                rejected += 1;
            }
        }
        if rejected > 0 {
            debug!(rejected, "[spv] rejected in-flight requests");
        }
    }

    async fn wait_open(&self) -> Result<(), SpvError> {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ReadyState::Open => return Ok(()),
                ReadyState::Connecting => {}
                ReadyState::Closing | ReadyState::Closed => {
                    return Err(SpvError::Connection(format!("session is {current}")));
                }
            }
            if state.changed().await.is_err() {
                return Err(SpvError::ConnectionLost);
            }
        }
    }

    /// Issue one request and wait for its response.
    async fn call(&self, call: Call) -> Result<Reply, SpvError> {
        let method = call.method();
        let timeout = self.config.request_timeout();

        tokio::time::timeout(timeout, self.wait_open())
            .await
            .map_err(|_| {
                SpvError::Connection(format!("{method}: session not open after {timeout:?}"))
            })??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(id, reply_tx);
        if matches!(call, Call::SubscribeTip) {
            self.tip_request.store(id, Ordering::SeqCst);
        }

        let sender = self.outgoing.lock().clone();
        let Some(sender) = sender else {
            self.pending.remove(&id);
            return Err(SpvError::ConnectionLost);
        };
        if sender.send(ClientFrame::Request { id, call }).await.is_err() {
            self.pending.remove(&id);
            return Err(SpvError::ConnectionLost);
        }
        debug!(id, method, "[spv] request sent");

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SpvError::ConnectionLost),
            Err(_) => {
                self.pending.remove(&id);
                warn!(id, method, "[spv] request timed out");
                Err(SpvError::Connection(format!(
                    "{method} timed out after {timeout:?}"
                )))
            }
        }
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Response { id, result } => {
                // The subscription reply is a tip like any notification and
                // is published in link order.
                if let Ok(Reply::Tip(tip)) = &result {
                    let subscribed = self
                        .tip_request
                        .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok();
                    if subscribed {
                        self.bus.publish(LedgerEvent::Tip(*tip));
                    }
                }
                match self.pending.remove(&id) {
                    Some((_, reply)) => {
                        if reply.send(result.map_err(SpvError::from)).is_err() {
                            debug!(id, "[spv] requester gone before response");
                        }
                    }
                    None => warn!(id, "[spv] response for unknown request id dropped"),
                }
            }
            ServerFrame::Notification(Notification::Tip { tip }) => {
                debug!(height = tip.height, block = %tip.block_id, "[spv] tip notification");
                self.bus.publish(LedgerEvent::Tip(tip));
            }
            ServerFrame::Notification(Notification::TouchAddress { address, tx_id }) => {
                debug!(address = %address, tx = %tx_id, "[spv] address touched");
                self.bus.publish(LedgerEvent::TouchAddress { address, tx_id });
            }
        }
    }

    /// Register the tip subscription and every watched address with a
    /// freshly opened link.
    async fn resubscribe(self: Arc<Self>) {
        match self.call(Call::SubscribeTip).await {
            Ok(Reply::Tip(_)) => {}
            Ok(other) => warn!(reply = ?other, "[spv] unexpected reply to subscribe_tip"),
            // The next open registers everything again.
            Err(SpvError::ConnectionLost) => return,
            Err(e) => warn!(error = %e, "[spv] tip subscription failed"),
        }

        let addresses: Vec<String> = self.addresses.lock().iter().cloned().collect();
        for address in addresses {
            if let Err(e) = self.call(Call::SubscribeAddress(address.clone())).await {
                warn!(address = %address, error = %e, "[spv] address resubscription failed");
            }
        }
    }

    /// Pump one link until it drops (`true`) or shutdown is requested (`false`).
    async fn serve(self: &Arc<Self>, link: TransportLink, shutdown: &mut watch::Receiver<bool>) -> bool {
        let TransportLink { outbound, mut inbound } = link;
        *self.outgoing.lock() = Some(outbound);

        if !self.transition(ReadyState::Open) {
            return false;
        }
        info!(endpoint = %self.transport.endpoint(), "[spv] session open");
        tokio::spawn(Arc::clone(self).resubscribe());

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => self.dispatch(frame),
                    None => break,
                },
                _ = shutdown.changed() => return false,
            }
        }

        warn!(endpoint = %self.transport.endpoint(), "[spv] link lost");
        self.drop_link();
        true
    }

    async fn drive(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let opened = tokio::select! {
                opened = self.transport.open() => opened,
                _ = shutdown.changed() => break,
            };

            match opened {
                Ok(link) => {
                    failures = 0;
                    if !self.serve(link, &mut shutdown).await {
                        break;
                    }
                    if !self.transition(ReadyState::Connecting) {
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        endpoint = %self.transport.endpoint(),
                        attempt = failures,
                        error = %e,
                        "[spv] open failed"
                    );
                    if self.config.attempts_exhausted(failures) {
                        warn!(attempts = failures, "[spv] giving up reconnecting");
                        break;
                    }
                    let delay = self.config.backoff_delay(failures);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        self.drop_link();
        self.transition(ReadyState::Closed);
    }
}

#[async_trait]
impl Connector for SessionConnector {
    fn ready_state(&self) -> ReadyState {
        self.session.ready_state()
    }

    async fn connect(&self) -> Result<(), SpvError> {
        match self.session.ready_state() {
            ReadyState::Connecting | ReadyState::Open => return Ok(()),
            ReadyState::Closing => {
                return Err(SpvError::Connection(
                    "connect() while the session is closing".to_string(),
                ))
            }
            ReadyState::Closed => {}
        }
        if !self.session.transition(ReadyState::Connecting) {
            // Lost a race with a concurrent connect() or disconnect().
            return match self.session.ready_state() {
                ReadyState::Closing => Err(SpvError::Connection(
                    "connect() while the session is closing".to_string(),
                )),
                _ => Ok(()),
            };
        }

        self.session.shutdown.send_replace(false);
        let shutdown = self.session.shutdown.subscribe();
        let driver = tokio::spawn(Arc::clone(&self.session).drive(shutdown));
        *self.driver.lock() = Some(driver);

        let mut state = self.session.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ReadyState::Open => return Ok(()),
                ReadyState::Connecting => {}
                ReadyState::Closing | ReadyState::Closed => {
                    return Err(SpvError::Connection(format!(
                        "unable to open {}: session {current}",
                        self.session.transport.endpoint()
                    )));
                }
            }
            if state.changed().await.is_err() {
                return Err(SpvError::ConnectionLost);
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SpvError> {
        if self.session.ready_state() == ReadyState::Closed {
            return Ok(());
        }
        self.session.transition(ReadyState::Closing);
        self.session.shutdown.send_replace(true);

        let driver = self.driver.lock().take();
        match driver {
            Some(driver) => {
                if let Err(e) = driver.await {
                    warn!(error = %e, "[spv] session driver failed");
                }
                self.session.drop_link();
                self.session.transition(ReadyState::Closed);
            }
            None => self.wait_for(ReadyState::Closed).await,
        }
        info!(endpoint = %self.session.transport.endpoint(), "[spv] session closed");
        Ok(())
    }

    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.session.bus.subscribe(filter)
    }

    fn support_verification_methods(&self) -> bool {
        self.session.transport.supports_header_ranges()
    }

    async fn get_tip(&self) -> Result<ChainTip, SpvError> {
        match self.session.call(Call::GetTip).await? {
            Reply::Tip(tip) => Ok(tip),
            other => Err(unexpected("get_tip", other)),
        }
    }

    async fn get_header(&self, key: HeightOrId) -> Result<LocatedHeader, SpvError> {
        match self.session.call(Call::GetHeader(key)).await? {
            Reply::Header(located) => Ok(located),
            other => Err(unexpected("get_header", other)),
        }
    }

    async fn get_headers(&self, start: u32, count: u32) -> Result<Vec<BlockHeader>, SpvError> {
        match self.session.call(Call::GetHeaders { start, count }).await? {
            Reply::Headers(headers) => Ok(headers),
            other => Err(unexpected("get_headers", other)),
        }
    }

    async fn get_tx(&self, tx_id: &TxId) -> Result<Vec<u8>, SpvError> {
        match self.session.call(Call::GetTx(*tx_id)).await? {
            Reply::Tx(raw) => hex::decode(&raw)
                .map_err(|e| SpvError::InvalidData(format!("transaction {tx_id}: {e}"))),
            other => Err(unexpected("get_tx", other)),
        }
    }

    async fn get_tx_block_id(&self, tx_id: &TxId) -> Result<TxLocation, SpvError> {
        match self.session.call(Call::GetTxBlockId(*tx_id)).await? {
            Reply::TxLocation(location) => Ok(location),
            other => Err(unexpected("get_tx_block_id", other)),
        }
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<TxId, SpvError> {
        match self.session.call(Call::SendTx(raw_hex.to_string())).await? {
            Reply::TxId(tx_id) => Ok(tx_id),
            other => Err(unexpected("send_tx", other)),
        }
    }

    async fn addresses_query(
        &self,
        addresses: &[String],
        options: AddressesQueryOptions,
    ) -> Result<AddressesQueryResult, SpvError> {
        let call = Call::AddressesQuery {
            addresses: addresses.to_vec(),
            options,
        };
        match self.session.call(call).await? {
            Reply::Addresses(result) => Ok(result),
            other => Err(unexpected("addresses_query", other)),
        }
    }

    async fn get_unspent(&self, address: &str) -> Result<Vec<Coin>, SpvError> {
        match self.session.call(Call::GetUnspent(address.to_string())).await? {
            Reply::Coins(coins) => Ok(coins),
            other => Err(unexpected("get_unspent", other)),
        }
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), SpvError> {
        if !self.session.addresses.lock().insert(address.to_string()) {
            return Ok(());
        }

        let result = match self
            .session
            .call(Call::SubscribeAddress(address.to_string()))
            .await
        {
            Ok(Reply::Subscribed) => Ok(()),
            Ok(other) => Err(unexpected("subscribe_address", other)),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.session.addresses.lock().remove(address);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use ReadyState::*;
        assert!(transition_allowed(Closed, Connecting));
        assert!(transition_allowed(Connecting, Open));
        assert!(transition_allowed(Open, Closing));
        assert!(transition_allowed(Closing, Closed));
        assert!(!transition_allowed(Closing, Open));
        assert!(!transition_allowed(Closing, Connecting));
        assert!(!transition_allowed(Closed, Open));
    }
}
