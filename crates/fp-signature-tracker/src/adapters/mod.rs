//! Adapters: concrete implementations of the outbound ports.

pub mod babylon_client;
pub mod memory_store;

pub use babylon_client::{classify_error_message, BabylonClient, NetworkEndpoints};
pub use memory_store::InMemoryResultStore;
