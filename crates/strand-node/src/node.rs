//! Strand storage node lifecycle
//!
//! Opens the durable stores, rebuilds per-object state, and serves the
//! dispersal gRPC surface until a shutdown signal arrives. Failing to bind
//! the port, open the KV store, or create the data directory is fatal.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use strand_network::proto::dispersal_server::DispersalServer;
use strand_storage::{FragmentStore, KvStore};

use crate::config::Settings;
use crate::gc::GarbageCollector;
use crate::protocol::DispersalProtocol;
use crate::service::DispersalService;

/// A storage node ready to start from validated settings
pub struct StrandNode;

/// A started node; stop it to flush and release everything
pub struct RunningNode {
    addr: SocketAddr,
    protocol: Arc<DispersalProtocol>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<(), tonic::transport::Error>>,
    gc: JoinHandle<()>,
}

impl StrandNode {
    /// Bind, warm up, and start serving; returns immediately
    pub async fn start(settings: Settings) -> anyhow::Result<RunningNode> {
        settings.validate()?;
        let params = settings.quorum()?;
        let self_id = settings.self_id();

        let kv = Arc::new(KvStore::open(&settings.storage.db)?);
        let fragments = Arc::new(FragmentStore::new(&settings.storage.datadir)?);

        let protocol = Arc::new(DispersalProtocol::new(
            params,
            self_id.clone(),
            settings.cluster.peers.clone(),
            kv,
            fragments,
            settings.disperse_timeout(),
        ));

        let restored = protocol.warm_up()?;
        if restored > 0 {
            tracing::info!("restored {} objects from durable state", restored);
        }

        let listener = TcpListener::bind(("0.0.0.0", settings.server.grpc_port)).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let service = DispersalServer::new(DispersalService::new(protocol.clone()));
        let server = tokio::spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = shutdown_rx.await;
                }),
        );

        let gc = tokio::spawn(GarbageCollector::new(protocol.clone(), settings.ttl()).run());

        tracing::info!(
            "node {} serving dispersal on {} ({} data / {} total fragments)",
            self_id,
            addr,
            params.data,
            params.total
        );

        Ok(RunningNode {
            addr,
            protocol,
            shutdown_tx: Some(shutdown_tx),
            server,
            gc,
        })
    }

    /// Start and block until Ctrl+C or SIGTERM
    pub async fn run(settings: Settings) -> anyhow::Result<()> {
        let node = Self::start(settings).await?;
        wait_for_shutdown().await;
        tracing::info!("shutting down...");
        node.stop().await;
        tracing::info!("node stopped");
        Ok(())
    }
}

impl RunningNode {
    /// The bound listen address (useful when the port was 0)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The state machine, for inspection in tests
    pub fn protocol(&self) -> &Arc<DispersalProtocol> {
        &self.protocol
    }

    /// Graceful stop: drain the server, abort the GC, flush evidence
    ///
    /// Waits for both tasks so every store handle is released before this
    /// returns; the durable KV can be reopened immediately afterwards.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.server.await;
        self.gc.abort();
        let _ = self.gc.await;
        self.protocol.shutdown().await;
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
