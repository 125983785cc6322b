use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use openraft::error::{RPCError, RaftError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use tonic::transport::Channel;

use super::proto::raft_service_client::RaftServiceClient;
use super::proto::RaftFrame;
use super::types::{NodeId, TypeConfig};

/// Per-RPC deadline between cluster nodes
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network layer for the Bright Raft cluster
#[derive(Clone, Default)]
pub struct BrightNetwork {
    /// Node addresses
    pub peers: Arc<DashMap<NodeId, String>>,

    /// gRPC client cache
    clients: Arc<DashMap<NodeId, RaftServiceClient<Channel>>>,
}

impl BrightNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a peer address, invalidating any cached client
    pub fn add_peer(&self, node_id: NodeId, addr: String) {
        self.peers.insert(node_id, addr);
        self.clients.remove(&node_id);
    }

    pub fn remove_peer(&self, node_id: NodeId) {
        self.peers.remove(&node_id);
        self.clients.remove(&node_id);
    }

    async fn get_client(
        &self,
        target: NodeId,
    ) -> Result<RaftServiceClient<Channel>, Unreachable> {
        if let Some(client) = self.clients.get(&target) {
            return Ok(client.clone());
        }

        let addr = self
            .peers
            .get(&target)
            .ok_or_else(|| {
                Unreachable::new(&std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("peer {} not found", target),
                ))
            })?
            .clone();

        let endpoint = Channel::from_shared(format!("http://{}", addr))
            .map_err(|e| {
                Unreachable::new(&std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                ))
            })?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RPC_TIMEOUT)
            .tcp_keepalive(Some(Duration::from_secs(30)));

        let channel = endpoint.connect().await.map_err(|e| {
            Unreachable::new(&std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e.to_string(),
            ))
        })?;

        let client = RaftServiceClient::new(channel);
        self.clients.insert(target, client.clone());
        Ok(client)
    }
}

/// Connection to a specific Raft peer. Requests travel as JSON payloads
/// inside single-field gRPC frames; entry documents are arbitrary JSON, so
/// the codec has to be self-describing.
pub struct BrightConnection {
    target: NodeId,
    network: BrightNetwork,
}

impl RaftNetworkFactory<TypeConfig> for BrightNetwork {
    type Network = BrightConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        self.peers
            .entry(target)
            .or_insert_with(|| node.addr.clone());

        BrightConnection {
            target,
            network: self.clone(),
        }
    }
}

fn encode_frame<T: serde::Serialize, NID, N, E>(
    request: &T,
) -> Result<RaftFrame, RPCError<NID, N, E>>
where
    NID: openraft::NodeId,
    N: openraft::Node,
    E: std::error::Error,
{
    let payload = serde_json::to_vec(request).map_err(|e| {
        RPCError::Unreachable(Unreachable::new(&std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to encode rpc: {}", e),
        )))
    })?;
    Ok(RaftFrame { payload })
}

fn decode_frame<T: serde::de::DeserializeOwned, NID, N, E>(
    frame: RaftFrame,
) -> Result<T, RPCError<NID, N, E>>
where
    NID: openraft::NodeId,
    N: openraft::Node,
    E: std::error::Error,
{
    serde_json::from_slice(&frame.payload).map_err(|e| {
        RPCError::Unreachable(Unreachable::new(&std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to decode rpc response: {}", e),
        )))
    })
}

fn transport_err<NID, N, E>(status: tonic::Status) -> RPCError<NID, N, E>
where
    NID: openraft::NodeId,
    N: openraft::Node,
    E: std::error::Error,
{
    RPCError::Unreachable(Unreachable::new(&std::io::Error::new(
        std::io::ErrorKind::Other,
        status.to_string(),
    )))
}

impl RaftNetwork<TypeConfig> for BrightConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>>
    {
        let mut client = self
            .network
            .get_client(self.target)
            .await
            .map_err(RPCError::Unreachable)?;

        let frame = encode_frame(&rpc)?;
        let response = client
            .append_entries(tonic::Request::new(frame))
            .await
            .map_err(transport_err)?;

        decode_frame(response.into_inner())
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, openraft::error::InstallSnapshotError>>,
    > {
        let mut client = self
            .network
            .get_client(self.target)
            .await
            .map_err(RPCError::Unreachable)?;

        let frame = encode_frame(&rpc)?;
        let response = client
            .install_snapshot(tonic::Request::new(frame))
            .await
            .map_err(transport_err)?;

        decode_frame(response.into_inner())
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let mut client = self
            .network
            .get_client(self.target)
            .await
            .map_err(RPCError::Unreachable)?;

        let frame = encode_frame(&rpc)?;
        let response = client
            .vote(tonic::Request::new(frame))
            .await
            .map_err(transport_err)?;

        decode_frame(response.into_inner())
    }
}
