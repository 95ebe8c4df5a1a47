//! Codec Layer
//!
//! Two halves, composed on every cache read and write:
//!
//! - **Wire** (`wire.rs`) - Object graph to JSON document and back, with
//!   circular-reference-safe traversal
//! - **Integrity** (`integrity.rs`) - Sealed envelopes carrying an
//!   HMAC-SHA256 digest over the stored bytes

pub mod integrity;
pub mod wire;

pub use integrity::{IntegrityCodec, SealedEntry, SealedIndex};
pub use wire::{decode, encode, InFlight};
