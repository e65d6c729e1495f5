//! CodeQuarry core — data model, deterministic identity, and checksum helpers.
//!
//! Everything here is pure data and pure functions; the indexing and retrieval
//! machinery lives in the `codequarry-engine` crate.

pub mod identity;
pub mod similar;
pub mod types;

pub use types::*;
