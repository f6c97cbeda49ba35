//! gRPC surface of a storage node
//!
//! Thin translation layer: wire messages in, state-machine calls, wire
//! messages out. Protocol-level rejections travel as `ok = false` responses
//! rather than transport errors, so a Byzantine-looking request never tears
//! down the RPC channel.

use std::sync::Arc;
use tonic::{Request, Response, Status};

use strand_core::{ObjectId, Result, StrandError};
use strand_crypto::Fpcc;
use strand_network::proto::dispersal_server::Dispersal;
use strand_network::proto::{
    DisperseRequest, DisperseResponse, EchoRequest, EchoResponse, ReadyRequest, ReadyResponse,
    RetrieveRequest, RetrieveResponse,
};

use crate::protocol::DispersalProtocol;

/// tonic service wrapping the per-object state machine
pub struct DispersalService {
    protocol: Arc<DispersalProtocol>,
}

impl DispersalService {
    pub fn new(protocol: Arc<DispersalProtocol>) -> Self {
        Self { protocol }
    }
}

fn parse_object_id(raw: &str) -> Result<ObjectId> {
    ObjectId::new(raw)
}

fn parse_fpcc(wire: Option<strand_network::proto::Fpcc>) -> Result<Fpcc> {
    let wire = wire.ok_or_else(|| {
        StrandError::InvalidParameters("request carries no cross-checksum".to_string())
    })?;
    Fpcc::try_from(wire).map_err(|e| StrandError::Serialization(e.to_string()))
}

#[tonic::async_trait]
impl Dispersal for DispersalService {
    async fn disperse(
        &self,
        request: Request<DisperseRequest>,
    ) -> std::result::Result<Response<DisperseResponse>, Status> {
        let req = request.into_inner();

        let outcome = async {
            let object = parse_object_id(&req.object_id)?;
            let fpcc = parse_fpcc(req.fpcc)?;
            self.protocol
                .handle_disperse(object, req.fragment_index, req.fragment, fpcc, req.blob_len)
                .await
        }
        .await;

        Ok(Response::new(match outcome {
            Ok(()) => DisperseResponse::accepted(),
            Err(e) => {
                tracing::debug!("disperse rejected: {}", e);
                DisperseResponse::rejected(&e)
            }
        }))
    }

    async fn echo(
        &self,
        request: Request<EchoRequest>,
    ) -> std::result::Result<Response<EchoResponse>, Status> {
        let req = request.into_inner();

        let outcome = async {
            let object = parse_object_id(&req.object_id)?;
            let fpcc = parse_fpcc(req.fpcc)?;
            self.protocol.handle_echo(object, fpcc, req.sender).await
        }
        .await;

        Ok(Response::new(match outcome {
            Ok(()) => EchoResponse::accepted(),
            Err(e) => {
                tracing::debug!("echo rejected: {}", e);
                EchoResponse::rejected(&e)
            }
        }))
    }

    async fn ready(
        &self,
        request: Request<ReadyRequest>,
    ) -> std::result::Result<Response<ReadyResponse>, Status> {
        let req = request.into_inner();

        let outcome = async {
            let object = parse_object_id(&req.object_id)?;
            let fpcc = parse_fpcc(req.fpcc)?;
            self.protocol.handle_ready(object, fpcc, req.sender).await
        }
        .await;

        Ok(Response::new(match outcome {
            Ok(()) => ReadyResponse::accepted(),
            Err(e) => {
                tracing::debug!("ready rejected: {}", e);
                ReadyResponse::rejected(&e)
            }
        }))
    }

    async fn retrieve(
        &self,
        request: Request<RetrieveRequest>,
    ) -> std::result::Result<Response<RetrieveResponse>, Status> {
        let req = request.into_inner();

        let outcome = parse_object_id(&req.object_id)
            .and_then(|object| self.protocol.handle_retrieve(&object, req.fragment_index));

        Ok(Response::new(match outcome {
            Ok((fragment, fpcc, blob_len)) => RetrieveResponse {
                ok: true,
                error: String::new(),
                fragment,
                fragment_index: req.fragment_index,
                fpcc: Some((&fpcc).into()),
                blob_len,
            },
            Err(e) => RetrieveResponse::rejected(&e),
        }))
    }
}
