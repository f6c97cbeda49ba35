//! End-to-end cluster tests
//!
//! Each test spins a real multi-node cluster on loopback ports and drives it
//! through the public client and wire surfaces.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use strand_client::StoreClient;
use strand_core::{ObjectId, StrandError};
use strand_crypto::{Fingerprint, Fpcc};
use strand_erasure::Codec;
use strand_network::proto::dispersal_server::{Dispersal, DispersalServer};
use strand_network::proto::{
    DisperseRequest, DisperseResponse, EchoRequest, EchoResponse, ReadyRequest, ReadyResponse,
    RetrieveRequest, RetrieveResponse,
};
use strand_network::{error_code, PeerClient};
use strand_node::config::{
    ClusterSettings, ErasureSettings, ObjectSettings, ServerSettings, StorageSettings,
};
use strand_node::{RunningNode, Settings, StrandNode};

const BLOB: &[u8] = b"The quick brown fox jumps over the lazy dog";

/// Reserve n free loopback ports
fn reserve_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<std::net::TcpListener> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

fn node_settings(
    peers: &[String],
    index: usize,
    port: u16,
    dir: &TempDir,
    data: usize,
    total: usize,
    ttl_secs: u64,
) -> Settings {
    Settings {
        cluster: ClusterSettings {
            peers: peers.to_vec(),
            self_id: Some(peers[index].clone()),
        },
        erasure: ErasureSettings { data, total },
        object: ObjectSettings {
            ttl_secs,
            disperse_timeout_secs: 1,
        },
        storage: StorageSettings {
            datadir: dir.path().join("fragments").to_string_lossy().into_owned(),
            db: dir.path().join("kv").to_string_lossy().into_owned(),
        },
        server: ServerSettings { grpc_port: port },
    }
}

struct Cluster {
    dirs: Vec<TempDir>,
    nodes: Vec<Option<RunningNode>>,
    peers: Vec<String>,
    data: usize,
    total: usize,
}

impl Cluster {
    /// Start a full cluster of `total` nodes
    async fn start(data: usize, total: usize, ttl_secs: u64) -> Self {
        let ports = reserve_ports(total);
        let peers: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect();

        let mut dirs = Vec::new();
        let mut nodes = Vec::new();
        for (index, port) in ports.iter().enumerate() {
            let dir = TempDir::new().unwrap();
            let settings = node_settings(&peers, index, *port, &dir, data, total, ttl_secs);
            nodes.push(Some(StrandNode::start(settings).await.unwrap()));
            dirs.push(dir);
        }

        Self {
            dirs,
            nodes,
            peers,
            data,
            total,
        }
    }

    fn client(&self) -> StoreClient {
        StoreClient::new(self.peers.clone(), self.data, self.total).unwrap()
    }

    async fn stop_node(&mut self, index: usize) {
        if let Some(node) = self.nodes[index].take() {
            node.stop().await;
        }
    }

    fn fragment_dir(&self, index: usize, object: &ObjectId) -> PathBuf {
        self.dirs[index]
            .path()
            .join("fragments")
            .join(object.as_str())
    }

    /// Flip the high bit of byte 0 in every fragment file held by a node
    fn corrupt_node(&self, index: usize, object: &ObjectId) {
        let dir = self.fragment_dir(index, object);
        let mut corrupted = 0;
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().map(|e| e == "bin").unwrap_or(false) {
                let mut bytes = std::fs::read(&path).unwrap();
                bytes[0] ^= 0x80;
                std::fs::write(&path, bytes).unwrap();
                corrupted += 1;
            }
        }
        assert!(corrupted > 0, "node {} held no fragments to corrupt", index);
    }

    async fn shutdown(mut self) {
        for index in 0..self.nodes.len() {
            self.stop_node(index).await;
        }
    }
}

#[tokio::test]
async fn test_happy_path_three_of_five() {
    let cluster = Cluster::start(3, 5, 3600).await;
    let client = cluster.client();
    let object = ObjectId::new("happy-path").unwrap();

    client.disperse(&object, BLOB).await.unwrap();
    assert_eq!(client.retrieve(&object).await.unwrap(), BLOB);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_retrieval_survives_f_node_failures() {
    let mut cluster = Cluster::start(3, 5, 3600).await;
    let client = cluster.client();
    let object = ObjectId::new("survives-f").unwrap();

    client.disperse(&object, BLOB).await.unwrap();

    // f = 2 nodes go away after the commit
    cluster.stop_node(0).await;
    cluster.stop_node(1).await;

    assert_eq!(client.retrieve(&object).await.unwrap(), BLOB);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_corruption_beyond_f_is_unrecoverable() {
    let mut cluster = Cluster::start(3, 5, 3600).await;
    let client = cluster.client();
    let object = ObjectId::new("tampered").unwrap();

    client.disperse(&object, BLOB).await.unwrap();

    // Three nodes tamper with their fragments, the two honest ones vanish:
    // the remaining copies must be rejected, not decoded into garbage
    for index in 2..5 {
        cluster.corrupt_node(index, &object);
    }
    cluster.stop_node(0).await;
    cluster.stop_node(1).await;

    match client.retrieve(&object).await {
        Err(StrandError::UnrecoverableObject { verified, .. }) => assert_eq!(verified, 0),
        other => panic!("expected UnrecoverableObject, got {:?}", other.err()),
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_equivocating_client_is_rejected() {
    let cluster = Cluster::start(3, 5, 3600).await;
    let object = ObjectId::new("equivocation").unwrap();

    let codec = Codec::new(3, 5).unwrap();
    let (fragments, blob_len) = codec.encode(BLOB).unwrap();
    let fpcc_x = Fpcc::build(&fragments, &Fingerprint::new_seeded(1111));
    let fpcc_y = Fpcc::build(&fragments, &Fingerprint::new_seeded(2222));

    let peer = &cluster.peers[0];
    let client = PeerClient::new();

    // First contact pins X; the call itself times out since only one node
    // ever hears about the object
    let response = client
        .disperse(
            peer,
            DisperseRequest {
                object_id: object.to_string(),
                fragment_index: 0,
                fragment: fragments[0].clone(),
                fpcc: Some((&fpcc_x).into()),
                blob_len,
            },
        )
        .await
        .unwrap();
    assert!(!response.ok);
    assert_eq!(
        error_code(&response.error),
        Some(StrandError::CommitTimeout(String::new()).code())
    );

    // A conflicting checksum for the same object is turned away
    let response = client
        .disperse(
            peer,
            DisperseRequest {
                object_id: object.to_string(),
                fragment_index: 1,
                fragment: fragments[1].clone(),
                fpcc: Some((&fpcc_y).into()),
                blob_len,
            },
        )
        .await
        .unwrap();
    assert!(!response.ok);
    assert_eq!(
        error_code(&response.error),
        Some(StrandError::FpccMismatch(String::new()).code())
    );

    // The node still serves fragment 0 under the originally pinned X
    let response = client
        .retrieve(
            peer,
            RetrieveRequest {
                object_id: object.to_string(),
                fragment_index: 0,
            },
        )
        .await
        .unwrap();
    assert!(response.ok);
    assert_eq!(Fpcc::try_from(response.fpcc.unwrap()).unwrap(), fpcc_x);

    cluster.shutdown().await;
}

/// A peer that accepts connections but takes no part in the protocol
struct MuteService;

#[tonic::async_trait]
impl Dispersal for MuteService {
    async fn disperse(
        &self,
        _request: Request<DisperseRequest>,
    ) -> Result<Response<DisperseResponse>, Status> {
        Ok(Response::new(DisperseResponse {
            ok: false,
            error: "[9999] not participating".to_string(),
        }))
    }

    async fn echo(&self, _request: Request<EchoRequest>) -> Result<Response<EchoResponse>, Status> {
        Ok(Response::new(EchoResponse {
            ok: false,
            error: "[9999] not participating".to_string(),
        }))
    }

    async fn ready(
        &self,
        _request: Request<ReadyRequest>,
    ) -> Result<Response<ReadyResponse>, Status> {
        Ok(Response::new(ReadyResponse {
            ok: false,
            error: "[9999] not participating".to_string(),
        }))
    }

    async fn retrieve(
        &self,
        _request: Request<RetrieveRequest>,
    ) -> Result<Response<RetrieveResponse>, Status> {
        Ok(Response::new(RetrieveResponse {
            ok: false,
            error: "[9999] not participating".to_string(),
            ..Default::default()
        }))
    }
}

#[tokio::test]
async fn test_commit_timeout_with_silent_peers() {
    // 6 peers, but 2 are mute: the unanimity Echo threshold can never be
    // met, so no node commits
    let (data, total) = (4, 6);
    let ports = reserve_ports(total);
    let peers: Vec<String> = ports.iter().map(|p| format!("127.0.0.1:{}", p)).collect();

    let mut dirs = Vec::new();
    let mut nodes = Vec::new();
    for index in 0..4 {
        let dir = TempDir::new().unwrap();
        let settings = node_settings(&peers, index, ports[index], &dir, data, total, 3600);
        nodes.push(StrandNode::start(settings).await.unwrap());
        dirs.push(dir);
    }

    let mut mutes = Vec::new();
    for port in &ports[4..] {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", *port))
            .await
            .unwrap();
        mutes.push(tokio::spawn(
            Server::builder()
                .add_service(DispersalServer::new(MuteService))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        ));
    }

    let client = StoreClient::new(peers.clone(), data, total).unwrap();
    let object = ObjectId::new("stalled").unwrap();

    // Every live node holds the fragments but the quorum never forms
    match client.disperse(&object, BLOB).await {
        Err(StrandError::CommitTimeout(_)) => {}
        other => panic!("expected CommitTimeout, got {:?}", other.err()),
    }

    // The fragments were still written, so the object remains readable
    assert_eq!(client.retrieve(&object).await.unwrap(), BLOB);

    for node in nodes {
        node.stop().await;
    }
    for mute in mutes {
        mute.abort();
    }
}

#[tokio::test]
async fn test_gc_evicts_expired_objects_cluster_wide() {
    let cluster = Cluster::start(3, 5, 1).await;
    let client = cluster.client();
    let object = ObjectId::new("short-lived").unwrap();

    client.disperse(&object, BLOB).await.unwrap();
    assert_eq!(client.retrieve(&object).await.unwrap(), BLOB);

    // ttl is 1 s and the collector ticks every 500 ms; after 3 s the object
    // and all its derived state must be gone everywhere
    tokio::time::sleep(Duration::from_secs(3)).await;

    match client.retrieve(&object).await {
        Err(StrandError::UnrecoverableObject { verified, .. }) => assert_eq!(verified, 0),
        other => panic!("expected UnrecoverableObject, got {:?}", other.err()),
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restart_preserves_committed_objects() {
    let mut cluster = Cluster::start(3, 5, 3600).await;
    let client = cluster.client();
    let object = ObjectId::new("restartable").unwrap();

    client.disperse(&object, BLOB).await.unwrap();

    // Bounce node 0: stop it, then start a fresh instance over the same
    // durable state
    let port = cluster.peers[0]
        .rsplit(':')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    cluster.stop_node(0).await;
    let settings = node_settings(
        &cluster.peers,
        0,
        port,
        &cluster.dirs[0],
        cluster.data,
        cluster.total,
        3600,
    );
    let restarted = StrandNode::start(settings).await.unwrap();

    // The restarted node serves the object on its own
    let peer_client = PeerClient::new();
    let response = peer_client
        .retrieve(
            &cluster.peers[0],
            RetrieveRequest {
                object_id: object.to_string(),
                fragment_index: 0,
            },
        )
        .await
        .unwrap();
    assert!(response.ok);

    restarted.stop().await;
    cluster.shutdown().await;
}
