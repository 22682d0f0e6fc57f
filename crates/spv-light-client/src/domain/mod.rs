//! # Domain Module
//!
//! Core domain types for the light client.

pub mod chunk;
pub mod errors;
pub mod events;
pub mod hash;
pub mod header;
pub mod known_chunks;
pub mod value_objects;

pub use chunk::*;
pub use errors::*;
pub use events::*;
pub use hash::*;
pub use header::*;
pub use known_chunks::*;
pub use value_objects::*;
