//! Strand CLI
//!
//! Command-line interface for running storage nodes and moving objects
//! in and out of a Strand cluster.

use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strand_client::StoreClient;
use strand_core::ObjectId;
use strand_node::{Settings, StrandNode};

#[derive(Parser)]
#[command(name = "strand")]
#[command(version = "0.1.0")]
#[command(about = "Strand - Byzantine-fault-tolerant dispersed object store")]
#[command(long_about = r#"
Strand CLI - erasure-coded object storage with verifiable dispersal.

QUICK START:
  strand node                      Start a storage node with defaults
  strand put my-object -f blob     Disperse a file across the cluster
  strand get my-object -o blob     Reassemble an object from the cluster

A blob is split into n fragments of which any m reconstruct it; the
cluster commits a dispersal only after 2f+1 nodes agree on one
cross-checksum, so up to f = n - m tampering nodes are survivable.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging (set RUST_LOG=debug for more control)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a storage node
    ///
    /// Examples:
    ///   strand node                         Run with built-in defaults
    ///   strand node -c cluster.toml         Use a config file
    ///   strand node --grpc-port 7003        Override the listen port
    Node {
        /// Inbound gRPC port (overrides config and environment)
        #[arg(long)]
        grpc_port: Option<u16>,

        /// Fragment directory root
        #[arg(long)]
        datadir: Option<String>,

        /// Durable KV path
        #[arg(long)]
        db: Option<String>,

        /// Comma-separated cluster peer list (host:port,host:port,...)
        #[arg(long)]
        peers: Option<String>,

        /// This node's identity within the peer list
        #[arg(long)]
        self_id: Option<String>,
    },

    /// Disperse a blob across the cluster
    ///
    /// Examples:
    ///   strand put invoice-42 -f invoice.pdf
    ///   cat blob.bin | strand put my-object
    Put {
        /// Object identifier, unique across the cluster
        #[arg(value_name = "OBJECT_ID")]
        id: String,

        /// Read the blob from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Reassemble an object from the cluster
    ///
    /// Examples:
    ///   strand get invoice-42 -o invoice.pdf
    ///   strand get my-object > blob.bin
    Get {
        /// Object identifier
        #[arg(value_name = "OBJECT_ID")]
        id: String,

        /// Write the blob to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Node {
            grpc_port,
            datadir,
            db,
            peers,
            self_id,
        } => {
            let mut settings = settings;
            if let Some(port) = grpc_port {
                settings.server.grpc_port = port;
            }
            if let Some(datadir) = datadir {
                settings.storage.datadir = datadir;
            }
            if let Some(db) = db {
                settings.storage.db = db;
            }
            if let Some(peers) = peers {
                settings.cluster.peers = peers.split(',').map(|p| p.trim().to_string()).collect();
            }
            if let Some(self_id) = self_id {
                settings.cluster.self_id = Some(self_id);
            }

            StrandNode::run(settings).await
        }

        Commands::Put { id, file } => {
            let object = ObjectId::new(id)?;
            let blob = match file {
                Some(path) => std::fs::read(&path)?,
                None => {
                    let mut buffer = Vec::new();
                    std::io::stdin().read_to_end(&mut buffer)?;
                    buffer
                }
            };

            let client = StoreClient::new(
                settings.cluster.peers.clone(),
                settings.erasure.data,
                settings.erasure.total,
            )?;
            client.disperse(&object, &blob).await?;

            tracing::info!("dispersed {} ({} bytes)", object, blob.len());
            Ok(())
        }

        Commands::Get { id, out } => {
            let object = ObjectId::new(id)?;

            let client = StoreClient::new(
                settings.cluster.peers.clone(),
                settings.erasure.data,
                settings.erasure.total,
            )?;
            let blob = client.retrieve(&object).await?;

            match out {
                Some(path) => std::fs::write(&path, &blob)?,
                None => std::io::stdout().write_all(&blob)?,
            }

            tracing::info!("retrieved {} ({} bytes)", object, blob.len());
            Ok(())
        }
    }
}
