//! # Strand Core
//!
//! Core types for the Strand dispersed object store:
//! - `ObjectId` - Opaque identifier binding a blob to its dispersal
//! - `QuorumParams` - The `(m, n)` erasure geometry and the Byzantine
//!   thresholds derived from it
//! - `StrandError` - The error surface shared by every crate
//!
//! ## Architecture
//!
//! A client erasure-codes a blob into `n` fragments and offers them to the
//! cluster; each storage node verifies its fragments against a fingerprinted
//! cross-checksum and gossips Echo/Ready votes until `2f + 1` peers agree the
//! object is durable. Any `m` good fragments reconstruct the blob.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Result, StrandError};
    pub use crate::types::{ObjectId, PeerId, QuorumParams};
}
