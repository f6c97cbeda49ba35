//! Outbound RPC client
//!
//! Every outbound RPC opens its own channel with its own connect deadline:
//! gossip dials get 5 s, client disperse dials 10 s. Client Disperse calls
//! are retried with a linear backoff; gossip Echo/Ready are never retried,
//! because the state machine's re-delivery discipline (client disperse
//! retries, peer echos) already covers lost messages.

use std::time::Duration;
use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};

use strand_core::constants::{
    CLIENT_CONNECT_TIMEOUT, DISPERSE_ATTEMPTS, DISPERSE_BACKOFF, DISPERSE_CALL_TIMEOUT,
    GOSSIP_CONNECT_TIMEOUT, PROBE_TIMEOUT,
};
use strand_core::{PeerId, Result, StrandError};

use crate::proto::dispersal_client::DispersalClient;
use crate::proto::{
    DisperseRequest, DisperseResponse, EchoRequest, ReadyRequest, RetrieveRequest,
    RetrieveResponse,
};

/// Dials peers and issues dispersal RPCs
#[derive(Clone, Debug, Default)]
pub struct PeerClient;

impl PeerClient {
    pub fn new() -> Self {
        Self
    }

    async fn connect(
        &self,
        peer: &PeerId,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<DispersalClient<Channel>> {
        let endpoint = Endpoint::from_shared(format!("http://{}", peer))
            .map_err(|e| StrandError::Transport(format!("bad peer address {}: {}", peer, e)))?
            .connect_timeout(connect_timeout)
            .timeout(call_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| StrandError::Transport(format!("dial {}: {}", peer, e)))?;

        Ok(DispersalClient::new(channel))
    }

    /// TCP liveness probe used by the client before dispersing
    pub async fn probe(&self, peer: &PeerId) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(peer.as_str())).await,
            Ok(Ok(_))
        )
    }

    /// Best-effort Echo to one peer; the caller logs and forgets failures
    pub async fn echo(&self, peer: &PeerId, request: EchoRequest) -> Result<()> {
        let mut client = self
            .connect(peer, GOSSIP_CONNECT_TIMEOUT, GOSSIP_CONNECT_TIMEOUT)
            .await?;
        client
            .echo(request)
            .await
            .map_err(|e| StrandError::Transport(format!("echo to {}: {}", peer, e)))?;
        Ok(())
    }

    /// Best-effort Ready to one peer
    pub async fn ready(&self, peer: &PeerId, request: ReadyRequest) -> Result<()> {
        let mut client = self
            .connect(peer, GOSSIP_CONNECT_TIMEOUT, GOSSIP_CONNECT_TIMEOUT)
            .await?;
        client
            .ready(request)
            .await
            .map_err(|e| StrandError::Transport(format!("ready to {}: {}", peer, e)))?;
        Ok(())
    }

    /// Disperse one fragment to one peer, retrying on transport errors
    ///
    /// Up to 3 attempts with a 2 s linear backoff. The call deadline is 30 s,
    /// which leaves room for the node's own 20 s commit wait.
    pub async fn disperse(
        &self,
        peer: &PeerId,
        request: DisperseRequest,
    ) -> Result<DisperseResponse> {
        let mut last_err = StrandError::Transport(format!("no disperse attempt made to {}", peer));

        for attempt in 1..=DISPERSE_ATTEMPTS {
            match self.try_disperse(peer, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        "disperse to {} attempt {}/{} failed: {}",
                        peer,
                        attempt,
                        DISPERSE_ATTEMPTS,
                        e
                    );
                    last_err = e;
                    if attempt < DISPERSE_ATTEMPTS {
                        tokio::time::sleep(DISPERSE_BACKOFF * attempt).await;
                    }
                }
            }
        }

        Err(last_err)
    }

    async fn try_disperse(
        &self,
        peer: &PeerId,
        request: DisperseRequest,
    ) -> Result<DisperseResponse> {
        let mut client = self
            .connect(peer, CLIENT_CONNECT_TIMEOUT, DISPERSE_CALL_TIMEOUT)
            .await?;
        let response = client
            .disperse(request)
            .await
            .map_err(|e| StrandError::Transport(format!("disperse to {}: {}", peer, e)))?;
        Ok(response.into_inner())
    }

    /// Retrieve one fragment from one peer; a single attempt, the caller
    /// moves on to the next peer on failure
    pub async fn retrieve(
        &self,
        peer: &PeerId,
        request: RetrieveRequest,
    ) -> Result<RetrieveResponse> {
        let mut client = self
            .connect(peer, GOSSIP_CONNECT_TIMEOUT, CLIENT_CONNECT_TIMEOUT)
            .await?;
        let response = client
            .retrieve(request)
            .await
            .map_err(|e| StrandError::Transport(format!("retrieve from {}: {}", peer, e)))?;
        Ok(response.into_inner())
    }
}
