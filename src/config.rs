use std::path::PathBuf;

/// Node configuration for a Bright server
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP API port
    pub port: u16,

    /// Master key for bearer-token authentication (None disables auth)
    pub master_key: Option<String>,

    /// Root directory for all persisted state
    pub data_path: PathBuf,

    /// Allow POST /indexes/:id/documents to create missing indexes
    pub auto_create_index: bool,

    /// Raft settings; None runs the node standalone
    pub raft: Option<RaftSettings>,
}

/// Raft cluster settings
#[derive(Clone, Debug)]
pub struct RaftSettings {
    /// Unique node id within the cluster
    pub node_id: u64,

    /// Local bind address for the Raft transport (e.g. "0.0.0.0:7000")
    pub bind_addr: String,

    /// Advertised address peers use to reach this node. DNS names are
    /// preferred over pod IPs in environments that recycle addresses.
    pub advertise_addr: String,

    /// Whether this node seeds a fresh cluster with a one-voter configuration
    pub bootstrap: bool,

    /// Raft addresses of the initial peers, used by the joiner task
    pub peers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            master_key: None,
            data_path: PathBuf::from("./data"),
            auto_create_index: true,
            raft: None,
        }
    }
}

impl Config {
    /// Whether bearer-token authentication is enabled
    pub fn requires_auth(&self) -> bool {
        self.master_key.is_some()
    }

    /// Whether this node participates in a Raft cluster
    pub fn raft_enabled(&self) -> bool {
        self.raft.is_some()
    }

    /// Directory holding the Raft log, stable store and snapshots
    pub fn raft_dir(&self) -> PathBuf {
        self.data_path.join("raft")
    }

    /// Derive a peer's HTTP address from its Raft address by substituting
    /// the HTTP port. All nodes in a cluster share the same port layout.
    pub fn http_addr_for(&self, raft_addr: &str) -> String {
        let host = raft_addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(raft_addr);
        format!("{}:{}", host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(!config.requires_auth());
        assert!(!config.raft_enabled());
        assert!(config.auto_create_index);
    }

    #[test]
    fn test_http_addr_substitution() {
        let config = Config::default();
        assert_eq!(
            config.http_addr_for("node-1.bright:7000"),
            "node-1.bright:3000"
        );
        assert_eq!(config.http_addr_for("10.0.0.7:7000"), "10.0.0.7:3000");
    }

    #[test]
    fn test_raft_dir_under_data_path() {
        let config = Config {
            data_path: PathBuf::from("/var/lib/bright"),
            ..Default::default()
        };
        assert_eq!(config.raft_dir(), PathBuf::from("/var/lib/bright/raft"));
    }
}
