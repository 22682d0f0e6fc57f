//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound ports: the session and unbound connectors, the
//! in-memory storage and the in-memory backend transport.

mod memory_backend;
mod memory_storage;
mod session;
mod unbound;

pub use memory_backend::{build_chain, MemoryLedger, MemoryTransport, ResponseMode};
pub use memory_storage::MemoryStorage;
pub use session::SessionConnector;
pub use unbound::UnboundConnector;
