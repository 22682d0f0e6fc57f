//! # Tip Follower
//!
//! Shared plumbing for both blockchain variants: the tracked tip and the task
//! that feeds connector events into it.

use crate::domain::{
    ChainTip, EventTopic, LedgerEvent, LedgerEventFilter, LedgerSubscription, ReadyState,
    SpvError,
};
use crate::ports::Connector;
use async_trait::async_trait;
use parking_lot::RwLock;
use spv_bus::{EventBus, EventPublisher};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The tip a blockchain currently trusts, plus the bus it announces on.
pub(crate) struct TipTracker {
    tip: RwLock<ChainTip>,
    bus: EventBus<LedgerEvent>,
}

impl TipTracker {
    pub(crate) fn new() -> Self {
        Self {
            tip: RwLock::new(ChainTip::unknown()),
            bus: EventBus::new(),
        }
    }

    pub(crate) fn latest(&self) -> ChainTip {
        *self.tip.read()
    }

    pub(crate) fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
        self.bus.subscribe(filter)
    }

    pub(crate) fn bus(&self) -> &EventBus<LedgerEvent> {
        &self.bus
    }

    /// Replace the tip in one step and announce it. Returns `false` when the
    /// tip is unchanged.
    pub(crate) fn replace(&self, tip: ChainTip) -> bool {
        let previous = {
            let mut current = self.tip.write();
            if *current == tip {
                return false;
            }
            std::mem::replace(&mut *current, tip)
        };

        if !previous.is_unknown() && tip.height <= previous.height {
            info!(
                from_height = previous.height,
                from = %previous.block_id,
                to_height = tip.height,
                to = %tip.block_id,
                "[spv] chain reorganized"
            );
        } else {
            debug!(height = tip.height, block = %tip.block_id, "[spv] new tip");
        }
        self.bus.publish(LedgerEvent::NewBlock(tip));
        true
    }
}

/// Receives tips announced by the connector.
#[async_trait]
pub(crate) trait TipSink: Send + Sync + 'static {
    async fn accept_tip(&self, tip: ChainTip);
}

/// Fail unless the connector is connecting or open.
pub(crate) fn require_live(connector: &dyn Connector) -> Result<(), SpvError> {
    match connector.ready_state() {
        ReadyState::Connecting | ReadyState::Open => Ok(()),
        state => Err(SpvError::Connection(format!(
            "blockchain needs a connecting or open connector, got {state}"
        ))),
    }
}

/// Screen a connector tip that does not advance past `floor`.
///
/// Such a tip is either a reorganization or a late announcement; the
/// backend's current tip decides which. `None` when the backend cannot be
/// asked, in which case the candidate is dropped.
pub(crate) async fn confirm_tip(
    connector: &dyn Connector,
    floor: i64,
    candidate: ChainTip,
) -> Option<ChainTip> {
    if candidate.height > floor {
        return Some(candidate);
    }
    match connector.get_tip().await {
        Ok(current) => {
            if current != candidate {
                debug!(
                    announced = candidate.height,
                    current = current.height,
                    "[spv] stale tip superseded by backend tip"
                );
            }
            Some(current)
        }
        Err(e) => {
            warn!(height = candidate.height, error = %e, "[spv] tip not confirmed, ignoring it");
            None
        }
    }
}

/// Spawn the task that forwards connector tips to `sink` and re-raises
/// address touches on `bus`.
///
/// The connector subscription is taken before returning, so nothing
/// published after construction is missed.
pub(crate) fn spawn_follower<S: TipSink>(
    connector: Arc<dyn Connector>,
    sink: Arc<S>,
    bus: EventBus<LedgerEvent>,
) -> JoinHandle<()> {
    let mut events = connector.subscribe(LedgerEventFilter::topics(vec![
        EventTopic::Tip,
        EventTopic::TouchAddress,
    ]));

    tokio::spawn(async move {
        match connector.get_tip().await {
            Ok(tip) => sink.accept_tip(tip).await,
            Err(e) => debug!(error = %e, "[spv] initial tip probe failed"),
        }

        while let Some(event) = events.recv().await {
            match event {
                LedgerEvent::Tip(tip) => sink.accept_tip(tip).await,
                touch @ LedgerEvent::TouchAddress { .. } => {
                    bus.publish(touch);
                }
                _ => {}
            }
        }
        debug!("[spv] connector event stream ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Hash256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector whose only data operation reports a fixed tip.
    struct FixedTip {
        tip: Option<ChainTip>,
        asked: AtomicUsize,
        bus: EventBus<LedgerEvent>,
    }

    impl FixedTip {
        fn new(tip: Option<ChainTip>) -> Self {
            Self {
                tip,
                asked: AtomicUsize::new(0),
                bus: EventBus::new(),
            }
        }
    }

    #[async_trait]
    impl Connector for FixedTip {
        fn ready_state(&self) -> ReadyState {
            ReadyState::Open
        }

        async fn connect(&self) -> Result<(), SpvError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SpvError> {
            Ok(())
        }

        fn subscribe(&self, filter: LedgerEventFilter) -> LedgerSubscription {
            self.bus.subscribe(filter)
        }

        async fn get_tip(&self) -> Result<ChainTip, SpvError> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.tip.ok_or(SpvError::ConnectionLost)
        }
    }

    #[test]
    fn test_tracker_starts_at_sentinel() {
        let tracker = TipTracker::new();
        assert_eq!(tracker.latest(), ChainTip::unknown());
    }

    #[test]
    fn test_replace_publishes_once_per_change() {
        let tracker = TipTracker::new();
        let mut events = tracker.subscribe(LedgerEventFilter::all());

        let tip = ChainTip::new(Hash256::sha256d(b"a"), 10);
        assert!(tracker.replace(tip));
        assert!(!tracker.replace(tip));

        let reorg = ChainTip::new(Hash256::sha256d(b"b"), 10);
        assert!(tracker.replace(reorg));
        assert_eq!(tracker.latest(), reorg);

        assert_eq!(events.try_recv().unwrap(), Some(LedgerEvent::NewBlock(tip)));
        assert_eq!(events.try_recv().unwrap(), Some(LedgerEvent::NewBlock(reorg)));
        assert_eq!(events.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_higher_tip_needs_no_confirmation() {
        let connector = FixedTip::new(None);
        let tip = ChainTip::new(Hash256::sha256d(b"11"), 11);
        assert_eq!(confirm_tip(&connector, 10, tip).await, Some(tip));
        assert_eq!(connector.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_late_tip_is_replaced_by_backend_tip() {
        let current = ChainTip::new(Hash256::sha256d(b"10"), 10);
        let connector = FixedTip::new(Some(current));
        let late = ChainTip::new(Hash256::sha256d(b"9"), 9);
        assert_eq!(confirm_tip(&connector, 10, late).await, Some(current));
        assert_eq!(connector.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_confirmed_reorg_passes() {
        let reorg = ChainTip::new(Hash256::sha256d(b"8b"), 8);
        let connector = FixedTip::new(Some(reorg));
        assert_eq!(confirm_tip(&connector, 10, reorg).await, Some(reorg));
    }

    #[tokio::test]
    async fn test_unconfirmed_tip_is_dropped() {
        let connector = FixedTip::new(None);
        let late = ChainTip::new(Hash256::sha256d(b"9"), 9);
        assert_eq!(confirm_tip(&connector, 10, late).await, None);
    }
}
