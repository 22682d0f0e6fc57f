//! # Ports Module
//!
//! Hexagonal architecture ports: the inbound blockchain API and the outbound
//! connector, storage and transport contracts.

pub mod inbound;
pub mod outbound;
pub mod transport;

pub use inbound::*;
pub use outbound::*;
pub use transport::*;
