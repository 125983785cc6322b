pub mod network;
pub mod node;
pub mod proto;
pub mod service;
pub mod storage;
pub mod types;

pub use network::BrightNetwork;
pub use node::{spawn_join_task, BrightNode, BrightRaft, ClusterMembership};
pub use service::RaftServiceImpl;
pub use types::{CommandResult, NodeId, Request, TypeConfig};
