//! Domain Layer
//!
//! Core vocabulary of the cache, independent of any backend:
//!
//! - **Identity** (`identity.rs`) - Type tags, derived identities, entity keys
//! - **Graph** (`graph.rs`) - Identity-keyed arena of entity records
//! - **Ports** (`ports.rs`) - Trait abstractions for the key-value store and
//!   the persistence layer's object store
//!
//! # Usage
//!
//! ```ignore
//! use veracache::domain::{EntityGraph, EntityRecord, Identity, TypeTag};
//!
//! let mut graph = EntityGraph::new();
//! let key = graph
//!     .insert(
//!         EntityRecord::with_identity(TypeTag::new("Product")?, Identity::single(42))
//!             .field("name", "Anvil"),
//!     )
//!     .unwrap();
//! ```

pub mod graph;
pub mod identity;
pub mod ports;

// Re-export commonly used types
pub use graph::{EntityGraph, EntityRecord, FieldValue};
pub use identity::{EntityKey, Identity, TypeTag};
pub use ports::{EntityStore, KeyValueStore, ScanCursor};
