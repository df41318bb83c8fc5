//! Cluster configuration. Parsing a config file or wiring
//! command-line flags is bootstrapping and stays out of this crate; the
//! struct itself is host-loadable via `serde` so an application can pull
//! it out of TOML/JSON the way the rest of this family of services does.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifies the peer group; used as the service-name prefix.
    pub cluster_name: String,
    /// This node's id.
    pub node_id: NodeId,
    /// All ids in the cluster, including this node's own.
    pub peer_ids: Vec<NodeId>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub broadcast_timeout_ms: u64,
    /// When false, `AppendEntries` carries only heartbeats and the commit
    /// index never advances.
    #[serde(default = "default_replication_enabled")]
    pub data_replication_enabled: bool,
}

fn default_replication_enabled() -> bool {
    true
}

impl Config {
    /// Validates the timing relationship this engine requires:
    /// `broadcast_timeout < election_timeout_min < election_timeout_max`.
    pub fn validate(&self) -> Result<(), String> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(format!(
                "election_timeout_min_ms ({}) must be < election_timeout_max_ms ({})",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            ));
        }
        if self.broadcast_timeout_ms >= self.election_timeout_min_ms {
            return Err(format!(
                "broadcast_timeout_ms ({}) must be < election_timeout_min_ms ({})",
                self.broadcast_timeout_ms, self.election_timeout_min_ms
            ));
        }
        if !self.peer_ids.contains(&self.node_id) {
            return Err("peer_ids must include node_id".to_string());
        }
        Ok(())
    }

    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// `"/<cluster_name>/<node_id>/request_vote"` and
    /// `"/<cluster_name>/<node_id>/append_entries"`
    pub fn service_name(&self, node_id: NodeId, rpc: &str) -> String {
        format!("/{}/{}/{}", self.cluster_name, node_id, rpc)
    }

    /// Number of voting members, treated as a constant cluster size
    /// (design note: `available_candidates` tracks
    /// `peer_ids.len()` rather than anything dynamic).
    pub fn cluster_size(&self) -> u32 {
        self.peer_ids.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            cluster_name: "payments".into(),
            node_id: 1,
            peer_ids: vec![1, 2, 3],
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            broadcast_timeout_ms: 50,
            data_replication_enabled: true,
        }
    }

    #[test]
    fn validates_healthy_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_broadcast_not_below_election_min() {
        let mut c = base_config();
        c.broadcast_timeout_ms = 150;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_inverted_election_range() {
        let mut c = base_config();
        c.election_timeout_min_ms = 300;
        c.election_timeout_max_ms = 150;
        assert!(c.validate().is_err());
    }

    #[test]
    fn service_name_matches_convention() {
        let c = base_config();
        assert_eq!(c.service_name(2, "request_vote"), "/payments/2/request_vote");
    }
}
