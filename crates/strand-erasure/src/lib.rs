//! # Strand Erasure Codec
//!
//! Reed-Solomon `(m, n)` coding over GF(2⁸): a blob is split into `m`
//! equal-length data fragments (zero-padded at the tail) and extended with
//! `n − m` parity fragments. Any `m` of the `n` fragments reconstruct the
//! original blob.

use reed_solomon_erasure::galois_8::ReedSolomon;
use strand_core::{QuorumParams, Result, StrandError};

/// Reed-Solomon encoder/decoder for a fixed `(m, n)` geometry
pub struct Codec {
    params: QuorumParams,
    rs: ReedSolomon,
}

impl Codec {
    /// Create a codec for `m` data fragments out of `n` total
    pub fn new(data: usize, total: usize) -> Result<Self> {
        let params = QuorumParams::new(data, total)?;
        let rs = ReedSolomon::new(params.data, params.faults())
            .map_err(|e| StrandError::InvalidParameters(e.to_string()))?;
        Ok(Self { params, rs })
    }

    /// The quorum geometry this codec encodes for
    pub fn params(&self) -> QuorumParams {
        self.params
    }

    /// Fragment length for a blob of `blob_len` bytes
    ///
    /// Every fragment of one object has the same length; an empty blob still
    /// produces one-byte fragments so the coder has material to work on.
    pub fn fragment_len(&self, blob_len: usize) -> usize {
        blob_len.div_ceil(self.params.data).max(1)
    }

    /// Split a blob into `n` equal-length fragments
    ///
    /// Returns the fragment vector and the original blob length, which the
    /// decoder needs to strip the zero padding exactly.
    pub fn encode(&self, blob: &[u8]) -> Result<(Vec<Vec<u8>>, u64)> {
        let fragment_len = self.fragment_len(blob.len());

        let mut fragments = Vec::with_capacity(self.params.total);
        for i in 0..self.params.data {
            let start = (i * fragment_len).min(blob.len());
            let end = ((i + 1) * fragment_len).min(blob.len());
            let mut fragment = vec![0u8; fragment_len];
            fragment[..end - start].copy_from_slice(&blob[start..end]);
            fragments.push(fragment);
        }
        for _ in self.params.data..self.params.total {
            fragments.push(vec![0u8; fragment_len]);
        }

        self.rs
            .encode(&mut fragments)
            .map_err(|e| StrandError::InvalidParameters(e.to_string()))?;

        Ok((fragments, blob.len() as u64))
    }

    /// Reconstruct a blob from any `m` present fragments
    ///
    /// `fragments` must have length exactly `n`, with missing entries as
    /// `None`. The result is the first `m` fragments concatenated and
    /// truncated to `original_len`.
    pub fn decode(&self, mut fragments: Vec<Option<Vec<u8>>>, original_len: u64) -> Result<Vec<u8>> {
        if fragments.len() != self.params.total {
            return Err(StrandError::InvalidParameters(format!(
                "expected {} fragment slots, got {}",
                self.params.total,
                fragments.len()
            )));
        }

        let available = fragments.iter().filter(|f| f.is_some()).count();
        if available < self.params.data {
            return Err(StrandError::InsufficientShards {
                required: self.params.data,
                available,
            });
        }

        self.rs
            .reconstruct(&mut fragments)
            .map_err(|e| StrandError::DecodeFailed(e.to_string()))?;

        // Size the buffer from the reconstructed fragments; original_len is
        // caller-supplied and only bounds the final truncation.
        let fragment_len = fragments
            .first()
            .and_then(|f| f.as_ref())
            .map(|f| f.len())
            .unwrap_or(0);
        let mut blob = Vec::with_capacity(self.params.data * fragment_len);
        for fragment in fragments.into_iter().take(self.params.data) {
            blob.extend_from_slice(&fragment.ok_or_else(|| {
                StrandError::DecodeFailed("reconstruction left a fragment missing".to_string())
            })?);
        }

        if (original_len as usize) > blob.len() {
            return Err(StrandError::DecodeFailed(format!(
                "original length {} exceeds reconstructed {} bytes",
                original_len,
                blob.len()
            )));
        }
        blob.truncate(original_len as usize);
        Ok(blob)
    }
}
