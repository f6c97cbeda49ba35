//! # Strand Node
//!
//! The storage node of the Strand dispersed object store:
//! - `protocol` - the per-object Disperse/Echo/Ready/Retrieve state machine
//! - `service` - the gRPC surface wrapping it
//! - `gc` - TTL-based eviction of expired objects
//! - `config` - layered settings (defaults, file, environment)
//! - `node` - lifecycle: open stores, warm up, serve, shut down

pub mod config;
pub mod gc;
pub mod node;
pub mod protocol;
pub mod service;

pub use config::Settings;
pub use node::{RunningNode, StrandNode};
pub use protocol::DispersalProtocol;
