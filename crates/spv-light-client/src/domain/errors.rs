//! # Domain Errors
//!
//! Error taxonomy shared by every layer of the light client.

use thiserror::Error;

/// Light client error types.
///
/// Every asynchronous operation either resolves with its value or fails with
/// exactly one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpvError {
    /// An abstract/default operation was invoked without a concrete backend.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// No header exists for the lookup key (height or block id).
    #[error("Header not found: {0}")]
    HeaderNotFound(String),

    /// Transaction unknown to both the chain and the mempool.
    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    /// A header failed chunk commitment or linear chain validation.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Transport or session failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session closed while the request was in flight.
    #[error("Connection lost")]
    ConnectionLost,

    /// A compact-only operation was used outside compact mode, or vice versa.
    #[error("Storage mode mismatch: {0}")]
    Mode(String),

    /// The backend refused to relay a transaction.
    #[error("Broadcast rejected: {0}")]
    Broadcast(String),

    /// Storage contract violation (missing index, inconsistent state).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed hex, bytes or reply shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl SpvError {
    /// Whether the error came from the session rather than the request itself.
    pub fn is_connection(&self) -> bool {
        matches!(self, SpvError::Connection(_) | SpvError::ConnectionLost)
    }
}
