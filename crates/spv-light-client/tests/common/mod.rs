//! Shared fixtures for the light client integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use spv_bus::{EventBus, EventPublisher};
use spv_light_client::{
    BlockHeader, ChainTip, Connector, ConnectorConfig, Hash256, HeightOrId, LedgerEvent,
    LedgerEventFilter, LedgerSubscription, LocatedHeader, MemoryLedger, MemoryTransport,
    ReadyState, SessionConnector, SpvError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const FIXTURE_ADDRESS: &str = "n1YYm9uXWTsjd6xwSEiys7aezJovh6xKbj";
pub const FIXTURE_TX: &str = "75a22bdb38352ba6deb7495631335616a308a2db8eb1aa596296d3be5f34f01e";
pub const FIXTURE_TX_HEIGHT: u32 = 159233;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Testnet header at height 300000.
pub fn header_300000() -> BlockHeader {
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

pub fn session(ledger: &MemoryLedger) -> (Arc<MemoryTransport>, Arc<SessionConnector>) {
    session_with(ledger, ConnectorConfig::for_testing())
}

pub fn session_with(
    ledger: &MemoryLedger,
    config: ConnectorConfig,
) -> (Arc<MemoryTransport>, Arc<SessionConnector>) {
    let transport = Arc::new(MemoryTransport::new(ledger.clone()));
    let connector = Arc::new(SessionConnector::new(transport.clone(), config));
    (transport, connector)
}

pub async fn connected(ledger: &MemoryLedger) -> (Arc<MemoryTransport>, Arc<SessionConnector>) {
    let (transport, connector) = session(ledger);
    connector.connect().await.expect("connect");
    assert_eq!(connector.ready_state(), ReadyState::Open);
    (transport, connector)
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

/// Wait for a `NewBlock` at `height`, skipping earlier ones.
pub async fn next_tip_at(events: &mut LedgerSubscription, height: i64) -> ChainTip {
    within(async {
        loop {
            match events.recv().await {
                Some(LedgerEvent::NewBlock(tip)) if tip.height == height => return tip,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
}

/// Wait for the next ready-state event.
pub async fn next_state(events: &mut LedgerSubscription) -> ReadyState {
    within(async {
        loop {
            match events.recv().await {
                Some(LedgerEvent::NewReadyState(state)) => return state,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Connector that serves data through a live session but takes its events
/// from the test, so tips can be announced in any order.
pub struct ScriptedEvents {
    inner: Arc<SessionConnector>,
    bus: EventBus<LedgerEvent>,
}

impl ScriptedEvents {
    pub fn new(inner: Arc<SessionConnector>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            bus: EventBus::new(),
        })
    }

    pub fn announce(&self, tip: ChainTip) {
        self.bus.publish(LedgerEvent::Tip(tip));
    }
}

#[async_trait]
impl Connector for ScriptedEvents {
    fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    async fn connect(&self) -> Result<(), SpvError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), SpvError> {
        self.inner.disconnect().await
    }

    fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.bus.subscribe(filter)
    }

    fn support_verification_methods(&self) -> bool {
        self.inner.support_verification_methods()
    }

    async fn get_tip(&self) -> Result<ChainTip, SpvError> {
        self.inner.get_tip().await
    }

    async fn get_header(&self, key: HeightOrId) -> Result<LocatedHeader, SpvError> {
        self.inner.get_header(key).await
    }

    async fn get_headers(&self, start: u32, count: u32) -> Result<Vec<BlockHeader>, SpvError> {
        self.inner.get_headers(start, count).await
    }
}
