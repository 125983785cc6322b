use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, Config as RaftConfig, Raft, ServerState, SnapshotPolicy};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::network::BrightNetwork;
use super::storage::{LogStore, StateMachineStore};
use super::types::{NodeId, Request, TypeConfig};
use crate::config::{Config, RaftSettings};
use crate::error::{BrightError, Result};
use crate::models::Command;
use crate::rpc::RpcClient;
use crate::store::IndexStore;

/// Alias for the Raft type with our configuration
pub type BrightRaft = Raft<TypeConfig>;

/// Snapshot after this many log entries beyond the last snapshot
const SNAPSHOT_THRESHOLD: u64 = 1024;

const JOIN_MAX_ATTEMPTS: usize = 30;
const JOIN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bright Raft node for distributed consensus
pub struct BrightNode {
    /// The Raft instance
    pub raft: Arc<BrightRaft>,

    /// Node ID
    pub node_id: NodeId,

    /// Cluster settings
    pub settings: RaftSettings,

    /// Network layer
    pub network: BrightNetwork,
}

impl BrightNode {
    /// Create a new node: opens the log and stable stores under `raft_dir`
    /// and wires the state machine to the index store.
    pub async fn new(
        settings: RaftSettings,
        raft_dir: &Path,
        store: Arc<IndexStore>,
    ) -> Result<Self> {
        // Election timing is the library default: a randomized 150-300ms window
        let raft_config = RaftConfig {
            cluster_name: "bright".to_string(),
            snapshot_policy: SnapshotPolicy::LogsSinceLast(SNAPSHOT_THRESHOLD),
            max_in_snapshot_log_to_keep: 1000,
            ..Default::default()
        };

        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| BrightError::Internal(format!("invalid raft config: {}", e)))?,
        );

        let log_store = LogStore::open(raft_dir)
            .map_err(|e| BrightError::Consensus(format!("failed to open log store: {}", e)))?;
        let sm_store = StateMachineStore::open(raft_dir, log_store.stable_handle(), store)
            .map_err(|e| {
                BrightError::Consensus(format!("failed to open state machine store: {}", e))
            })?;

        let network = BrightNetwork::new();

        let raft = Raft::new(
            settings.node_id,
            raft_config,
            network.clone(),
            log_store,
            sm_store,
        )
        .await
        .map_err(|e| BrightError::Consensus(format!("failed to create raft: {}", e)))?;

        Ok(Self {
            raft: Arc::new(raft),
            node_id: settings.node_id,
            settings,
            network,
        })
    }

    /// Seed a fresh cluster with a one-voter configuration. Idempotent:
    /// re-bootstrapping an initialized node is a no-op.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut members = BTreeMap::new();
        members.insert(
            self.node_id,
            BasicNode {
                addr: self.settings.advertise_addr.clone(),
            },
        );

        match self.raft.initialize(members).await {
            Ok(_) => {
                info!(node_id = self.node_id, "bootstrapped cluster as initial voter");
                Ok(())
            }
            Err(e) => {
                let message = format!("{:?}", e);
                if message.contains("NotAllowed") || message.contains("already initialized") {
                    info!("cluster already initialized");
                    Ok(())
                } else {
                    Err(BrightError::Consensus(format!(
                        "failed to initialize cluster: {}",
                        message
                    )))
                }
            }
        }
    }

    /// Replicate a command and wait for commit-and-apply on this leader.
    ///
    /// A `RaftTimeout` means unknown outcome: the entry may still commit.
    /// Callers that need certainty must follow up with a read-your-write
    /// check before retrying.
    pub async fn apply(&self, command: Command, timeout: Duration) -> Result<()> {
        if !self.is_leader().await {
            return Err(BrightError::NotLeader {
                leader: self.leader_addr().await,
            });
        }

        let write = self.raft.client_write(Request::new(command));
        match tokio::time::timeout(timeout, write).await {
            Err(_) => Err(BrightError::RaftTimeout),
            Ok(Ok(response)) => response.data.into_result(),
            Ok(Err(RaftError::APIError(ClientWriteError::ForwardToLeader(_)))) => {
                // We were leader at submission; a redirect now means we
                // stepped down before the entry committed.
                Err(BrightError::ReplicationLost)
            }
            Ok(Err(e)) => Err(BrightError::Consensus(format!("{:?}", e))),
        }
    }

    /// Check if this node is the leader
    pub async fn is_leader(&self) -> bool {
        let metrics = self.raft.metrics().borrow().clone();
        matches!(metrics.state, ServerState::Leader)
    }

    /// Get current leader ID
    pub async fn leader_id(&self) -> Option<NodeId> {
        self.raft.metrics().borrow().current_leader
    }

    /// Raft address of the current leader, if one is known
    pub async fn leader_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader?;
        metrics
            .membership_config
            .membership()
            .get_node(&leader)
            .map(|node| node.addr.clone())
    }

    /// Get cluster membership info
    pub async fn membership(&self) -> ClusterMembership {
        let metrics = self.raft.metrics().borrow().clone();

        let voters: Vec<NodeId> = metrics
            .membership_config
            .membership()
            .voter_ids()
            .collect();

        let learners: Vec<NodeId> = metrics
            .membership_config
            .membership()
            .learner_ids()
            .collect();

        ClusterMembership { voters, learners }
    }

    /// Add a node as a voter (leader only). Idempotent on re-add of the
    /// same id and address.
    pub async fn add_voter(&self, node_id: NodeId, addr: String) -> Result<()> {
        if !self.is_leader().await {
            return Err(BrightError::NotLeader {
                leader: self.leader_addr().await,
            });
        }

        let metrics = self.raft.metrics().borrow().clone();
        let membership = metrics.membership_config.membership();
        let already_voter = membership.voter_ids().any(|id| id == node_id);
        let same_addr = membership
            .get_node(&node_id)
            .map(|node| node.addr == addr)
            .unwrap_or(false);
        if already_voter && same_addr {
            return Ok(());
        }

        self.network.add_peer(node_id, addr.clone());

        self.raft
            .add_learner(node_id, BasicNode { addr }, true)
            .await
            .map_err(|e| BrightError::Consensus(format!("failed to add learner: {:?}", e)))?;

        let mut voters: BTreeSet<NodeId> = membership.voter_ids().collect();
        voters.insert(node_id);

        self.raft
            .change_membership(voters, false)
            .await
            .map_err(|e| {
                BrightError::Consensus(format!("failed to change membership: {:?}", e))
            })?;

        info!(node_id, "added voter to cluster");
        Ok(())
    }

    /// Trigger a snapshot
    pub async fn trigger_snapshot(&self) -> Result<()> {
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| BrightError::Consensus(format!("failed to trigger snapshot: {:?}", e)))
    }

    /// Flush in-flight work, persist a final snapshot and stop the node
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.raft.trigger().snapshot().await {
            warn!(error = ?e, "final snapshot on shutdown failed");
        }

        self.raft
            .shutdown()
            .await
            .map_err(|e| BrightError::Consensus(format!("shutdown failed: {:?}", e)))
    }
}

/// Cluster membership information
#[derive(Clone, Debug)]
pub struct ClusterMembership {
    pub voters: Vec<NodeId>,
    pub learners: Vec<NodeId>,
}

/// Background joiner for non-bootstrap nodes: ask each configured peer to
/// add us as a voter, every five seconds for up to thirty attempts. The
/// node's own advertised address is skipped when iterating peers.
pub fn spawn_join_task(
    node: Arc<BrightNode>,
    client: Arc<RpcClient>,
    config: Arc<Config>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Let the transport come up before the first attempt
        tokio::time::sleep(Duration::from_secs(3)).await;

        let settings = node.settings.clone();
        for attempt in 1..=JOIN_MAX_ATTEMPTS {
            for peer in &settings.peers {
                if *peer == settings.advertise_addr {
                    continue;
                }

                info!(
                    peer = %peer,
                    attempt,
                    max_attempts = JOIN_MAX_ATTEMPTS,
                    "attempting to join cluster"
                );

                let peer_http = config.http_addr_for(peer);
                match client
                    .cluster_join(
                        &peer_http,
                        settings.node_id,
                        &settings.advertise_addr,
                        config.master_key.as_deref(),
                    )
                    .await
                {
                    Ok(()) => {
                        info!(peer = %peer, node_id = settings.node_id, "joined cluster");
                        return;
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "failed to join via peer");
                    }
                }
            }

            if attempt < JOIN_MAX_ATTEMPTS {
                tokio::time::sleep(JOIN_RETRY_DELAY).await;
            }
        }

        error!(
            attempts = JOIN_MAX_ATTEMPTS,
            node_id = settings.node_id,
            "failed to auto-join cluster; node stays follower awaiting manual intervention"
        );
    })
}
