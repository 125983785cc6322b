use std::sync::Arc;

use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use tonic::{Request, Response, Status};

use super::node::BrightRaft;
use super::proto::raft_service_server::RaftService;
use super::proto::RaftFrame;
use super::types::{NodeId, TypeConfig};

/// gRPC service implementation for Raft RPCs
pub struct RaftServiceImpl {
    raft: Arc<BrightRaft>,
}

impl RaftServiceImpl {
    pub fn new(raft: Arc<BrightRaft>) -> Self {
        Self { raft }
    }
}

fn decode<T: serde::de::DeserializeOwned>(frame: RaftFrame) -> Result<T, Status> {
    serde_json::from_slice(&frame.payload)
        .map_err(|e| Status::invalid_argument(format!("invalid rpc payload: {}", e)))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Response<RaftFrame>, Status> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| Status::internal(format!("failed to encode rpc response: {}", e)))?;
    Ok(Response::new(RaftFrame { payload }))
}

#[tonic::async_trait]
impl RaftService for RaftServiceImpl {
    async fn append_entries(
        &self,
        request: Request<RaftFrame>,
    ) -> Result<Response<RaftFrame>, Status> {
        let rpc: AppendEntriesRequest<TypeConfig> = decode(request.into_inner())?;

        let response = self
            .raft
            .append_entries(rpc)
            .await
            .map_err(|e| Status::internal(format!("append_entries failed: {:?}", e)))?;

        encode(&response)
    }

    async fn vote(&self, request: Request<RaftFrame>) -> Result<Response<RaftFrame>, Status> {
        let rpc: VoteRequest<NodeId> = decode(request.into_inner())?;

        let response = self
            .raft
            .vote(rpc)
            .await
            .map_err(|e| Status::internal(format!("vote failed: {:?}", e)))?;

        encode(&response)
    }

    async fn install_snapshot(
        &self,
        request: Request<RaftFrame>,
    ) -> Result<Response<RaftFrame>, Status> {
        let rpc: InstallSnapshotRequest<TypeConfig> = decode(request.into_inner())?;

        let response = self
            .raft
            .install_snapshot(rpc)
            .await
            .map_err(|e| Status::internal(format!("install_snapshot failed: {:?}", e)))?;

        encode(&response)
    }
}
