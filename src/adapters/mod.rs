//! Port Adapters
//!
//! In-memory implementations of the domain ports. They serve as first-class
//! test doubles and as working backends for single-process use.

pub mod memory_entities;
pub mod memory_store;

pub use memory_entities::InMemoryEntityStore;
pub use memory_store::{InMemoryKeyValueStore, StoreStats};
