//! Error types for Strand operations

use thiserror::Error;

/// Result type alias for Strand operations
pub type Result<T> = std::result::Result<T, StrandError>;

/// Errors that can occur across the Strand dispersal pipeline
#[derive(Error, Debug, Clone)]
pub enum StrandError {
    // === Parameters ===
    /// Bad erasure geometry or malformed argument
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    // === Verification ===
    /// Fragment failed its hash or fingerprint check
    #[error("Integrity failure for object {object} fragment {index}")]
    IntegrityFailure { object: String, index: u32 },

    /// Conflicting cross-checksum for an already-known object
    #[error("Cross-checksum mismatch for object {0}")]
    FpccMismatch(String),

    // === Erasure Coding ===
    /// Too few fragments present to reconstruct
    #[error("Insufficient fragments: need {required}, have {available}")]
    InsufficientShards { required: usize, available: usize },

    /// Reed-Solomon reconstruction was infeasible
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    // === Dispersal ===
    /// Liveness probe found too few reachable peers to ever commit
    #[error("Quorum impossible: need {required} reachable peers, found {reachable}")]
    QuorumImpossible { required: usize, reachable: usize },

    /// The commit quorum did not form within the disperse deadline
    #[error("Commit timed out for object {0}")]
    CommitTimeout(String),

    /// Fewer than m verified fragments could be assembled
    #[error("Unrecoverable object {object}: need {required} verified fragments, have {verified}")]
    UnrecoverableObject {
        object: String,
        required: usize,
        verified: usize,
    },

    // === Storage ===
    /// Fragment or cross-checksum absent on this node
    #[error("Not found: object {object} fragment {index}")]
    NotFound { object: String, index: u32 },

    /// Durable write or read failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Persisted record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Network ===
    /// Dial or RPC failure talking to a peer
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StrandError {
    /// Error code carried in RPC error strings
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidParameters(_) => 1001,
            Self::IntegrityFailure { .. } => 1002,
            Self::FpccMismatch(_) => 1003,
            Self::InsufficientShards { .. } | Self::DecodeFailed(_) => 1004,
            Self::QuorumImpossible { .. } => 1005,
            Self::CommitTimeout(_) => 1006,
            Self::UnrecoverableObject { .. } => 1007,
            Self::NotFound { .. } => 1008,
            Self::StorageError(_) | Self::Serialization(_) => 1009,
            Self::Transport(_) => 1010,
        }
    }

    /// Whether a retry of the same operation can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommitTimeout(_)
                | Self::StorageError(_)
                | Self::Transport(_)
                | Self::QuorumImpossible { .. }
        )
    }
}

impl From<std::io::Error> for StrandError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}
