//! In-memory key-state storage.
//!
//! A single [`KeyStore`] holds the per-key state of one limiter. It bounds
//! memory two ways: entries idle past the TTL are swept in the background,
//! and an optional key cap evicts the least recently used entry on insert.

mod key_store;
mod sweeper;

pub use key_store::{KeyStore, StoreConfig, Update};
