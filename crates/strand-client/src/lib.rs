//! # Strand Client
//!
//! Client-side orchestration of a dispersal:
//!
//! 1. Probe the cluster; abort if too few peers are reachable to ever commit.
//! 2. Erasure-code the blob and build a fresh-seeded cross-checksum.
//! 3. Offer every fragment to every peer, one index at a time.
//!
//! And of a retrieval:
//!
//! 1. Adopt the first cross-checksum whose fragment 0 verifies against it.
//! 2. Collect further verified fragments until `m` are held.
//! 3. Decode, trimming padding by the recorded blob length.
//!
//! The client trusts nothing a node returns: every fragment is re-verified
//! against the adopted checksum before it is used.

use strand_core::{ObjectId, Result, StrandError};
use strand_crypto::{Fingerprint, Fpcc};
use strand_erasure::Codec;
use strand_network::proto::{DisperseRequest, RetrieveRequest};
use strand_network::{error_code, PeerClient};

/// Client handle for one cluster
pub struct StoreClient {
    peers: Vec<String>,
    codec: Codec,
    client: PeerClient,
}

impl StoreClient {
    /// Create a client for a cluster of `total` peers with `data`-of-`total`
    /// erasure coding
    pub fn new(peers: Vec<String>, data: usize, total: usize) -> Result<Self> {
        let codec = Codec::new(data, total)?;
        if peers.len() != total {
            return Err(StrandError::InvalidParameters(format!(
                "cluster has {} peers but the erasure geometry needs {}",
                peers.len(),
                total
            )));
        }
        Ok(Self {
            peers,
            codec,
            client: PeerClient::new(),
        })
    }

    /// Disperse a blob under `object` across the cluster
    ///
    /// Succeeds once any node confirms the commit quorum; a cluster-wide
    /// commit timeout surfaces as [`StrandError::CommitTimeout`].
    pub async fn disperse(&self, object: &ObjectId, blob: &[u8]) -> Result<()> {
        let params = self.codec.params();

        // Liveness probe: with fewer than 2f reachable peers the Ready
        // quorum can never form, so don't send a single fragment.
        let probes =
            futures::future::join_all(self.peers.iter().map(|peer| self.client.probe(peer))).await;
        let reachable = probes.iter().filter(|up| **up).count();
        let required = 2 * params.faults();
        if reachable < required {
            return Err(StrandError::QuorumImpossible {
                required,
                reachable,
            });
        }

        let (fragments, blob_len) = self.codec.encode(blob)?;
        let fpcc = Fpcc::build(&fragments, &Fingerprint::new_random());
        let wire_fpcc: strand_network::proto::Fpcc = (&fpcc).into();

        let timeout_code = StrandError::CommitTimeout(String::new()).code();
        let mut any_committed = false;
        let mut saw_timeout = false;

        // Every fragment goes to every peer; nodes deduplicate. One index
        // fans out fully before the next starts.
        for (index, fragment) in fragments.iter().enumerate() {
            let request = DisperseRequest {
                object_id: object.to_string(),
                fragment_index: index as u32,
                fragment: fragment.clone(),
                fpcc: Some(wire_fpcc.clone()),
                blob_len,
            };

            let sends = self.peers.iter().map(|peer| {
                let request = request.clone();
                async move { (peer, self.client.disperse(peer, request).await) }
            });

            for (peer, result) in futures::future::join_all(sends).await {
                match result {
                    Ok(response) if response.ok => any_committed = true,
                    Ok(response) => {
                        if error_code(&response.error) == Some(timeout_code) {
                            saw_timeout = true;
                        }
                        tracing::debug!(
                            "peer {} rejected fragment {}: {}",
                            peer,
                            index,
                            response.error
                        );
                    }
                    Err(e) => tracing::debug!("disperse {} to {} failed: {}", index, peer, e),
                }
            }
        }

        if any_committed {
            Ok(())
        } else if saw_timeout {
            Err(StrandError::CommitTimeout(object.to_string()))
        } else {
            Err(StrandError::Transport(format!(
                "no node accepted the dispersal of {}",
                object
            )))
        }
    }

    /// Reassemble the blob stored under `object`
    pub async fn retrieve(&self, object: &ObjectId) -> Result<Vec<u8>> {
        let params = self.codec.params();
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; params.total];

        // Adopt a checksum: the first peer whose fragment 0 verifies against
        // the checksum it returned alongside.
        let mut adopted: Option<(Fpcc, u64)> = None;
        for peer in &self.peers {
            let request = RetrieveRequest {
                object_id: object.to_string(),
                fragment_index: 0,
            };
            match self.client.retrieve(peer, request).await {
                Ok(response) if response.ok => {
                    let Some(wire) = response.fpcc else { continue };
                    let Ok(fpcc) = Fpcc::try_from(wire) else {
                        tracing::debug!("peer {} returned a malformed checksum", peer);
                        continue;
                    };
                    if fpcc.fragment_count() == params.total && fpcc.verify(0, &response.fragment) {
                        slots[0] = Some(response.fragment);
                        adopted = Some((fpcc, response.blob_len));
                        break;
                    }
                    tracing::debug!("peer {} returned an unverifiable fragment 0", peer);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("retrieve 0 from {} failed: {}", peer, e),
            }
        }

        let Some((fpcc, blob_len)) = adopted else {
            return Err(StrandError::UnrecoverableObject {
                object: object.to_string(),
                required: params.data,
                verified: 0,
            });
        };

        let mut verified = 1;
        'indices: for index in 1..params.total {
            if verified >= params.data {
                break;
            }
            for peer in &self.peers {
                let request = RetrieveRequest {
                    object_id: object.to_string(),
                    fragment_index: index as u32,
                };
                match self.client.retrieve(peer, request).await {
                    Ok(response) if response.ok && fpcc.verify(index, &response.fragment) => {
                        slots[index] = Some(response.fragment);
                        verified += 1;
                        continue 'indices;
                    }
                    Ok(response) if response.ok => {
                        tracing::debug!("peer {} returned a bad fragment {}", peer, index);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("retrieve {} from {} failed: {}", index, peer, e),
                }
            }
        }

        if verified < params.data {
            return Err(StrandError::UnrecoverableObject {
                object: object.to_string(),
                required: params.data,
                verified,
            });
        }

        if blob_len > 0 {
            self.codec.decode(slots, blob_len)
        } else {
            // Length never learned (or a genuinely empty blob): decode the
            // padded whole and strip the zero suffix.
            let fragment_len = slots.iter().flatten().next().map(|f| f.len()).unwrap_or(0);
            let padded = (params.data * fragment_len) as u64;
            let blob = self.codec.decode(slots, padded)?;
            Ok(trim_zero_suffix(blob))
        }
    }
}

/// Strip trailing zero bytes from a decoded blob
pub fn trim_zero_suffix(mut blob: Vec<u8>) -> Vec<u8> {
    while blob.last() == Some(&0) {
        blob.pop();
    }
    blob
}
