//! # Transport Port
//!
//! A session connector talks to its backend through typed frames. A
//! transport only has to open a *link*: a pair of frame channels. How the
//! frames are encoded on the wire (JSON-RPC, REST, WebSocket) is the
//! transport's business.
//!
//! A link is considered lost when the inbound channel closes.

use crate::domain::{
    AddressesQueryOptions, AddressesQueryResult, BlockHeader, ChainTip, Coin, HeightOrId,
    LocatedHeader, SpvError, TxId, TxLocation,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A request the session sends to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    /// Current backend tip.
    GetTip,
    /// Subscribe to tip notifications; replies with the current tip.
    SubscribeTip,
    /// Header by height or id.
    GetHeader(HeightOrId),
    /// Consecutive headers.
    GetHeaders {
        /// First height.
        start: u32,
        /// Maximum number of headers.
        count: u32,
    },
    /// Raw transaction (hex).
    GetTx(TxId),
    /// Location of a transaction.
    GetTxBlockId(TxId),
    /// Broadcast a raw transaction (hex).
    SendTx(String),
    /// Batched address history.
    AddressesQuery {
        /// Addresses to look up.
        addresses: Vec<String>,
        /// Filters.
        options: AddressesQueryOptions,
    },
    /// Unspent outputs of an address.
    GetUnspent(String),
    /// Subscribe to touch notifications for an address.
    SubscribeAddress(String),
}

impl Call {
    /// Method name, for logging.
    pub fn method(&self) -> &'static str {
        match self {
            Call::GetTip => "get_tip",
            Call::SubscribeTip => "subscribe_tip",
            Call::GetHeader(_) => "get_header",
            Call::GetHeaders { .. } => "get_headers",
            Call::GetTx(_) => "get_tx",
            Call::GetTxBlockId(_) => "get_tx_block_id",
            Call::SendTx(_) => "send_tx",
            Call::AddressesQuery { .. } => "addresses_query",
            Call::GetUnspent(_) => "get_unspent",
            Call::SubscribeAddress(_) => "subscribe_address",
        }
    }
}

/// Successful reply payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// Tip (reply to `GetTip` and `SubscribeTip`).
    Tip(ChainTip),
    /// Single header.
    Header(LocatedHeader),
    /// Header range.
    Headers(Vec<BlockHeader>),
    /// Raw transaction hex.
    Tx(String),
    /// Transaction location.
    TxLocation(TxLocation),
    /// Id of a broadcast transaction.
    TxId(TxId),
    /// Address history batch.
    Addresses(AddressesQueryResult),
    /// Unspent outputs.
    Coins(Vec<Coin>),
    /// Subscription acknowledged.
    Subscribed,
}

/// Failures reported by the backend for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum RemoteError {
    /// No such header; carries the lookup key.
    HeaderNotFound(String),
    /// No such transaction; carries the id.
    TxNotFound(String),
    /// Broadcast refused.
    Rejected(String),
    /// Anything else.
    Internal(String),
}

impl From<RemoteError> for SpvError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::HeaderNotFound(key) => SpvError::HeaderNotFound(key),
            RemoteError::TxNotFound(id) => SpvError::TxNotFound(id),
            RemoteError::Rejected(reason) => SpvError::Broadcast(reason),
            RemoteError::Internal(reason) => SpvError::Connection(reason),
        }
    }
}

/// Backend-originated push notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// New backend tip.
    Tip {
        /// The tip.
        tip: ChainTip,
    },
    /// A subscribed address appeared in a transaction.
    TouchAddress {
        /// The address.
        address: String,
        /// The transaction.
        tx_id: TxId,
    },
}

/// Frames sent by the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Correlated request.
    Request {
        /// Request id, unique per session.
        id: u64,
        /// The call.
        call: Call,
    },
}

/// Frames received by the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Response to the request with the same id.
    Response {
        /// Request id being answered.
        id: u64,
        /// Outcome.
        result: Result<Reply, RemoteError>,
    },
    /// Unsolicited push.
    Notification(Notification),
}

/// An open link: frames out, frames in.
pub struct TransportLink {
    /// Frames to the backend. Dropping it closes the link.
    pub outbound: mpsc::Sender<ClientFrame>,
    /// Frames from the backend. `None` means the link is gone.
    pub inbound: mpsc::Receiver<ServerFrame>,
}

/// Opens links to a backend - outbound port.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link.
    async fn open(&self) -> Result<TransportLink, SpvError>;

    /// Backend address, for logging.
    fn endpoint(&self) -> &str;

    /// Does the backend serve header ranges?
    fn supports_header_ranges(&self) -> bool {
        true
    }
}
