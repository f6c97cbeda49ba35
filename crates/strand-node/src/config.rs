//! Node configuration
//!
//! Explicit settings structs layered from three sources, strongest last:
//! defaults, a TOML file, `STRAND_*` environment variables. CLI flags are
//! applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use strand_core::constants::{DEFAULT_OBJECT_TTL, DISPERSE_TIMEOUT};
use strand_core::{PeerId, QuorumParams, Result, StrandError};

/// Node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Cluster membership
    pub cluster: ClusterSettings,
    /// Erasure geometry
    pub erasure: ErasureSettings,
    /// Object lifecycle
    pub object: ObjectSettings,
    /// Storage paths
    pub storage: StorageSettings,
    /// RPC server
    pub server: ServerSettings,
}

/// Cluster membership settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Ordered `host:port` identities of every node, this one included
    pub peers: Vec<PeerId>,
    /// This node's identity; derived from the bound port when omitted
    #[serde(rename = "self")]
    pub self_id: Option<PeerId>,
}

/// Erasure geometry settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErasureSettings {
    /// Data fragment count (m)
    pub data: usize,
    /// Total fragment count (n)
    pub total: usize,
}

/// Object lifecycle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectSettings {
    /// Per-object lifetime before garbage collection, in seconds
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    /// How long a Disperse call waits for the commit quorum, in seconds
    #[serde(rename = "disperse_timeout")]
    pub disperse_timeout_secs: u64,
}

/// Storage path settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Fragment directory root
    pub datadir: String,
    /// Durable KV path
    pub db: String,
}

/// RPC server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Inbound gRPC port
    pub grpc_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings {
                peers: (7001..=7005).map(|port| format!("127.0.0.1:{}", port)).collect(),
                self_id: None,
            },
            erasure: ErasureSettings { data: 3, total: 5 },
            object: ObjectSettings {
                ttl_secs: DEFAULT_OBJECT_TTL.as_secs(),
                disperse_timeout_secs: DISPERSE_TIMEOUT.as_secs(),
            },
            storage: StorageSettings {
                datadir: "./data/fragments".to_string(),
                db: "./data/kv".to_string(),
            },
            server: ServerSettings { grpc_port: 7001 },
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the optional TOML file, then `STRAND_*`
    /// environment variables (`STRAND_SERVER__GRPC_PORT=7002` style)
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("STRAND").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }

    /// This node's identity within the peer list
    pub fn self_id(&self) -> PeerId {
        self.cluster
            .self_id
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.server.grpc_port))
    }

    /// The erasure geometry as quorum parameters
    pub fn quorum(&self) -> Result<QuorumParams> {
        QuorumParams::new(self.erasure.data, self.erasure.total)
    }

    /// Per-object lifetime before garbage collection
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.object.ttl_secs)
    }

    /// Commit wait deadline for inbound Disperse calls
    pub fn disperse_timeout(&self) -> Duration {
        Duration::from_secs(self.object.disperse_timeout_secs)
    }

    /// Check internal consistency before starting the node
    pub fn validate(&self) -> Result<()> {
        let params = self.quorum()?;
        if self.cluster.peers.len() != params.total {
            return Err(StrandError::InvalidParameters(format!(
                "cluster has {} peers but the erasure geometry needs {}",
                self.cluster.peers.len(),
                params.total
            )));
        }
        Ok(())
    }
}
