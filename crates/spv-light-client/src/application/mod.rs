//! # Application Module
//!
//! Blockchain views over a connector, and the capability-based selection
//! between them.

mod follower;
pub mod naive;
pub mod verifying;

pub use naive::NaiveBlockchain;
pub use verifying::VerifyingBlockchain;

use crate::config::LightClientConfig;
use crate::domain::SpvError;
use crate::ports::{Blockchain, Connector, Storage};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the strongest blockchain view the inputs allow.
///
/// Verifying when `storage` is given and the connector can serve header
/// ranges, naive otherwise.
pub fn open_blockchain(
    connector: Arc<dyn Connector>,
    storage: Option<Arc<dyn Storage>>,
    config: &LightClientConfig,
) -> Result<Arc<dyn Blockchain>, SpvError> {
    match storage {
        Some(storage) if connector.support_verification_methods() => {
            if storage.is_compact() != config.compact_mode {
                warn!(
                    storage_compact = storage.is_compact(),
                    config_compact = config.compact_mode,
                    "[spv] storage mode differs from configuration, using storage mode"
                );
            }
            info!(compact = storage.is_compact(), "[spv] opening verifying blockchain");
            Ok(Arc::new(VerifyingBlockchain::new(connector, storage, config)?))
        }
        Some(_) => {
            info!("[spv] connector cannot serve verification data, falling back to naive blockchain");
            Ok(Arc::new(NaiveBlockchain::new(connector)?))
        }
        None => {
            info!("[spv] no storage supplied, opening naive blockchain");
            Ok(Arc::new(NaiveBlockchain::new(connector)?))
        }
    }
}
