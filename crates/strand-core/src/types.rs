//! Core type definitions for Strand
//!
//! Object identity, peer identity, and the quorum arithmetic that every
//! other crate builds on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StrandError};

/// ObjectId - Opaque identifier for a dispersed object
///
/// Non-empty UTF-8, at most [`constants::MAX_OBJECT_ID_BYTES`] bytes,
/// globally unique across the cluster. The cluster never interprets it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Create an ObjectId, validating the size bounds
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(StrandError::InvalidParameters(
                "object id must not be empty".to_string(),
            ));
        }
        if id.len() > constants::MAX_OBJECT_ID_BYTES {
            return Err(StrandError::InvalidParameters(format!(
                "object id exceeds {} bytes",
                constants::MAX_OBJECT_ID_BYTES
            )));
        }
        // NUL separates object id from peer id in evidence keys, and '/'
        // would escape the object's fragment directory
        if id.bytes().any(|b| b == 0 || b == b'/') {
            return Err(StrandError::InvalidParameters(
                "object id must not contain NUL or '/'".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier as raw bytes (key material for the KV store)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PeerId - Stable identity of a cluster member
///
/// The configured `host:port` string of the peer, not the transport-layer
/// remote address: two peers behind one NAT must still count as two voters.
pub type PeerId = String;

/// Index of a fragment within an object's dispersal, in `[0, n)`
pub type FragmentIndex = u32;

/// QuorumParams - The `(m, n)` erasure geometry and Byzantine thresholds
///
/// `m` data fragments, `n` total fragments, `f = n - m` tolerated Byzantine
/// peers. The Echo threshold `m + f` equals `n`: every honest peer must be
/// reachable to commit, in exchange for tolerating `f` data-altering peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumParams {
    /// Data fragment count (m)
    pub data: usize,

    /// Total fragment count (n)
    pub total: usize,
}

impl QuorumParams {
    /// Create quorum parameters, rejecting degenerate geometries
    pub fn new(data: usize, total: usize) -> Result<Self> {
        if data == 0 {
            return Err(StrandError::InvalidParameters(
                "data fragment count must be non-zero".to_string(),
            ));
        }
        if total < data {
            return Err(StrandError::InvalidParameters(format!(
                "total fragment count {} below data fragment count {}",
                total, data
            )));
        }
        if total == data {
            return Err(StrandError::InvalidParameters(
                "no parity fragments: cluster would tolerate zero faults".to_string(),
            ));
        }
        Ok(Self { data, total })
    }

    /// Byzantine fault bound: f = n - m
    pub fn faults(&self) -> usize {
        self.total - self.data
    }

    /// Echo votes required before a node sends Ready: m + f = n
    pub fn echo_threshold(&self) -> usize {
        self.data + self.faults()
    }

    /// Ready votes required to commit: 2f + 1
    pub fn ready_threshold(&self) -> usize {
        2 * self.faults() + 1
    }

    /// Ready votes that force a node to amplify its own Ready: f + 1
    pub fn amplify_threshold(&self) -> usize {
        self.faults() + 1
    }
}

/// System constants
pub mod constants {
    use std::time::Duration;

    /// Maximum object identifier size in bytes
    pub const MAX_OBJECT_ID_BYTES: usize = 256;

    /// How long a Disperse call waits for the commit quorum
    pub const DISPERSE_TIMEOUT: Duration = Duration::from_secs(20);

    /// Connect deadline for node-to-node gossip RPCs
    pub const GOSSIP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect deadline for client Disperse RPCs
    pub const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Call deadline for client Disperse RPCs (exceeds the node's commit wait)
    pub const DISPERSE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Client-side Disperse attempts per peer
    pub const DISPERSE_ATTEMPTS: u32 = 3;

    /// Linear backoff unit between client Disperse attempts
    pub const DISPERSE_BACKOFF: Duration = Duration::from_secs(2);

    /// TCP deadline for the pre-disperse liveness probe
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Buffered puts that force a KV batch flush
    pub const BATCH_MAX_ENTRIES: usize = 100;

    /// Longest a buffered KV put waits before being flushed
    pub const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

    /// Default per-object lifetime before garbage collection
    pub const DEFAULT_OBJECT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_valid() {
        let id = ObjectId::new("invoice-2024-001").unwrap();
        assert_eq!(id.as_str(), "invoice-2024-001");
        assert_eq!(id.to_string(), "invoice-2024-001");
    }

    #[test]
    fn test_object_id_rejects_empty() {
        assert!(ObjectId::new("").is_err());
    }

    #[test]
    fn test_object_id_rejects_reserved_bytes() {
        assert!(ObjectId::new("obj\0ect").is_err());
        assert!(ObjectId::new("obj/ect").is_err());
    }

    #[test]
    fn test_object_id_rejects_oversized() {
        let long = "x".repeat(constants::MAX_OBJECT_ID_BYTES + 1);
        assert!(ObjectId::new(long).is_err());

        let max = "x".repeat(constants::MAX_OBJECT_ID_BYTES);
        assert!(ObjectId::new(max).is_ok());
    }

    #[test]
    fn test_quorum_params_canonical() {
        let params = QuorumParams::new(3, 5).unwrap();
        assert_eq!(params.faults(), 2);
        assert_eq!(params.echo_threshold(), 5);
        assert_eq!(params.ready_threshold(), 5);
        assert_eq!(params.amplify_threshold(), 3);
    }

    #[test]
    fn test_quorum_params_wide() {
        let params = QuorumParams::new(4, 6).unwrap();
        assert_eq!(params.faults(), 2);
        assert_eq!(params.echo_threshold(), 6);
        assert_eq!(params.ready_threshold(), 5);
    }

    #[test]
    fn test_quorum_params_rejects_degenerate() {
        assert!(QuorumParams::new(0, 5).is_err());
        assert!(QuorumParams::new(5, 3).is_err());
        // n == m leaves no room for a single fault
        assert!(QuorumParams::new(3, 3).is_err());
    }
}
