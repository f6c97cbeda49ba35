//! Fingerprinted cross-checksum (FPCC)
//!
//! The FPCC binds all `n` fragments of one object to a single identity: a
//! SHA-256 digest and a seeded fingerprint per fragment, plus the shared
//! seed. A node verifies the fragment it is offered against entry `i`; a
//! reader verifies every fragment it collects before decoding.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::fingerprint::Fingerprint;

/// Fingerprinted cross-checksum for one object
///
/// Two nodes hold the same object exactly when their FPCCs are structurally
/// equal; a node pins the first FPCC it accepts and rejects all others.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fpcc {
    /// Secret evaluation point, fresh per object, never zero
    pub seed: u64,

    /// SHA-256 of each fragment
    pub hashes: Vec<[u8; 32]>,

    /// Fingerprint of each fragment under `seed`
    pub fps: Vec<u64>,
}

impl Fpcc {
    /// Build the cross-checksum for an encoded fragment vector
    pub fn build(fragments: &[Vec<u8>], fingerprint: &Fingerprint) -> Self {
        let hashes = fragments
            .iter()
            .map(|fragment| Sha256::digest(fragment).into())
            .collect();
        let fps = fragments
            .iter()
            .map(|fragment| fingerprint.eval(fragment))
            .collect();

        Self {
            seed: fingerprint.seed(),
            hashes,
            fps,
        }
    }

    /// Number of fragments this checksum covers
    pub fn fragment_count(&self) -> usize {
        self.hashes.len()
    }

    /// Verify a fragment against entry `index`
    ///
    /// True iff both the SHA-256 digest and the fingerprint match. An index
    /// outside the checksum never verifies.
    pub fn verify(&self, index: usize, bytes: &[u8]) -> bool {
        let (Some(expected_hash), Some(expected_fp)) = (self.hashes.get(index), self.fps.get(index))
        else {
            return false;
        };

        let hash: [u8; 32] = Sha256::digest(bytes).into();
        if &hash != expected_hash {
            return false;
        }

        Fingerprint::new_seeded(self.seed).eval(bytes) == *expected_fp
    }

    /// Serialize for the durable KV store
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("fpcc serialization is infallible")
    }

    /// Deserialize from the durable KV store
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

impl fmt::Debug for Fpcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fpcc")
            .field("seed", &self.seed)
            .field("fragments", &self.hashes.len())
            .field(
                "first_hash",
                &self.hashes.first().map(|h| hex::encode(&h[..8])),
            )
            .finish()
    }
}
