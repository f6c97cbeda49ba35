//! # Strand Network
//!
//! The wire protocol between clients and storage nodes, and among the nodes
//! themselves: a single gRPC service `Dispersal` with four operations.
//!
//! ## Protocol Surface
//!
//! | RPC | Caller | Effect |
//! |----------|--------------|--------------------------------------------|
//! | Disperse | client | verify + persist a fragment, wait for commit |
//! | Echo | peer node | first-phase vote for an object |
//! | Ready | peer node | second-phase vote; 2f+1 commit the object |
//! | Retrieve | client | fragment + cross-checksum readback |
//!
//! Echo and Ready are fire-and-forget from the sender's point of view:
//! errors are logged and swallowed, and re-delivery comes from the sender's
//! own retry discipline rather than transport-level retries.

pub mod client;
pub mod convert;

/// Generated protobuf/tonic bindings
pub mod proto {
    tonic::include_proto!("strand.dispersal.v1");
}

pub use client::PeerClient;
pub use convert::FpccCodecError;

use strand_core::StrandError;

/// Extract the `[code]` prefix from a wire error string
pub fn error_code(error: &str) -> Option<u32> {
    let rest = error.strip_prefix('[')?;
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

impl proto::DisperseResponse {
    /// Successful response
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: String::new(),
        }
    }

    /// Failure response carrying the error code and message
    pub fn rejected(err: &StrandError) -> Self {
        Self {
            ok: false,
            error: format!("[{}] {}", err.code(), err),
        }
    }
}

impl proto::EchoResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: String::new(),
        }
    }

    pub fn rejected(err: &StrandError) -> Self {
        Self {
            ok: false,
            error: format!("[{}] {}", err.code(), err),
        }
    }
}

impl proto::ReadyResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: String::new(),
        }
    }

    pub fn rejected(err: &StrandError) -> Self {
        Self {
            ok: false,
            error: format!("[{}] {}", err.code(), err),
        }
    }
}

impl proto::RetrieveResponse {
    /// Failure response; fragment fields are left empty
    pub fn rejected(err: &StrandError) -> Self {
        Self {
            ok: false,
            error: format!("[{}] {}", err.code(), err),
            ..Default::default()
        }
    }
}
