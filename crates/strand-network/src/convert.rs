//! Conversions between wire messages and core types

use strand_crypto::Fpcc;
use thiserror::Error;

use crate::proto;

/// Malformed FPCC on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FpccCodecError {
    #[error("fragment hash {index} has {len} bytes, expected 32")]
    BadHashLength { index: usize, len: usize },

    #[error("checksum shape mismatch: {hashes} hashes vs {fps} fingerprints")]
    ShapeMismatch { hashes: usize, fps: usize },
}

impl From<&Fpcc> for proto::Fpcc {
    fn from(fpcc: &Fpcc) -> Self {
        Self {
            seed: fpcc.seed,
            hashes: fpcc.hashes.iter().map(|h| h.to_vec()).collect(),
            fps: fpcc.fps.clone(),
        }
    }
}

impl TryFrom<proto::Fpcc> for Fpcc {
    type Error = FpccCodecError;

    fn try_from(wire: proto::Fpcc) -> Result<Self, Self::Error> {
        if wire.hashes.len() != wire.fps.len() {
            return Err(FpccCodecError::ShapeMismatch {
                hashes: wire.hashes.len(),
                fps: wire.fps.len(),
            });
        }

        let hashes = wire
            .hashes
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| {
                let len = bytes.len();
                <[u8; 32]>::try_from(bytes).map_err(|_| FpccCodecError::BadHashLength { index, len })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Fpcc {
            seed: wire.seed,
            hashes,
            fps: wire.fps,
        })
    }
}
