//! End-to-end scenarios against an in-process cluster of `RaftNode`s
//! wired together by a registry-based test transport instead of real
//! sockets. Timing uses real wall-clock sleeps with small thresholds,
//! since the integration-test binary can't reach the crate's `cfg(test)`
//! `ManualClock`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use failover_raft::config::Config;
use failover_raft::context::{ContextHandle, PeerClientFactory};
use failover_raft::data::{LogEntry, NodeId};
use failover_raft::error::RaftError;
use failover_raft::rpc::{
    AppendClient, AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest,
    RequestVoteResponse, VoteClient,
};
use failover_raft::store::{DataStore, MemoryLog};
use failover_raft::RaftNode;

#[derive(Default)]
struct Registry {
    handles: Mutex<HashMap<NodeId, ContextHandle>>,
    downed: Mutex<HashSet<NodeId>>,
}

impl Registry {
    fn register(&self, id: NodeId, handle: ContextHandle) {
        self.handles.lock().unwrap().insert(id, handle);
    }

    fn down(&self, id: NodeId) {
        self.downed.lock().unwrap().insert(id);
    }

    fn route(&self, id: NodeId) -> Option<ContextHandle> {
        if self.downed.lock().unwrap().contains(&id) {
            return None;
        }
        self.handles.lock().unwrap().get(&id).cloned()
    }
}

struct TestVoteClient {
    target: NodeId,
    registry: Arc<Registry>,
}

impl VoteClient for TestVoteClient {
    fn request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse, RaftError> {
        match self.registry.route(self.target) {
            Some(handle) => Ok(handle.handle_request_vote(request)),
            None => Err(RaftError::TransportFailure { peer_id: self.target }),
        }
    }
}

struct TestAppendClient {
    target: NodeId,
    registry: Arc<Registry>,
}

impl AppendClient for TestAppendClient {
    fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RaftError> {
        match self.registry.route(self.target) {
            Some(handle) => Ok(handle.handle_append_entries(request)),
            None => Err(RaftError::TransportFailure { peer_id: self.target }),
        }
    }
}

struct TestClientFactory {
    registry: Arc<Registry>,
}

impl PeerClientFactory for TestClientFactory {
    fn build(&self, peer_id: NodeId) -> (Box<dyn VoteClient>, Box<dyn AppendClient>) {
        (
            Box::new(TestVoteClient { target: peer_id, registry: self.registry.clone() }),
            Box::new(TestAppendClient { target: peer_id, registry: self.registry.clone() }),
        )
    }
}

fn node_config(node_id: NodeId, peer_ids: Vec<NodeId>) -> Config {
    Config {
        cluster_name: "scenario".into(),
        node_id,
        peer_ids,
        election_timeout_min_ms: 40,
        election_timeout_max_ms: 80,
        broadcast_timeout_ms: 10,
        data_replication_enabled: true,
    }
}

struct Cluster {
    registry: Arc<Registry>,
    nodes: HashMap<NodeId, RaftNode>,
    stores: HashMap<NodeId, Arc<MemoryLog>>,
}

impl Cluster {
    fn new(ids: &[NodeId]) -> Cluster {
        let registry = Arc::new(Registry::default());
        let mut nodes = HashMap::new();
        let mut stores = HashMap::new();
        for &id in ids {
            let config = node_config(id, ids.to_vec());
            let store = Arc::new(MemoryLog::new());
            let factory = Box::new(TestClientFactory { registry: registry.clone() });
            let node = RaftNode::start(config, store.clone(), factory, None);
            registry.register(id, node.handle());
            nodes.insert(id, node);
            stores.insert(id, store);
        }
        Cluster { registry, nodes, stores }
    }

    fn leader(&self) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.is_leader()).map(|(&id, _)| id)
    }

    fn wait_for_leader(&self, timeout: Duration) -> Option<NodeId> {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if let Some(id) = self.leader() {
                return Some(id);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

#[test]
fn three_node_cluster_elects_exactly_one_leader() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let leader = cluster.wait_for_leader(Duration::from_secs(2));
    assert!(leader.is_some(), "expected a leader to emerge");

    thread::sleep(Duration::from_millis(100));
    let leader_count = cluster.nodes.values().filter(|n| n.is_leader()).count();
    assert_eq!(leader_count, 1, "exactly one node should hold leadership");
}

#[test]
fn committed_entry_replicates_to_every_follower() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let leader_id = cluster.wait_for_leader(Duration::from_secs(2)).expect("no leader elected");

    let leader_store = cluster.stores.get(&leader_id).unwrap();
    let entry = LogEntry { index: 1, term: 1, payload: b"hello".to_vec() };
    let last_index = leader_store.append(&[entry]);

    let leader_node = cluster.nodes.get(&leader_id).unwrap();
    let handle = leader_node
        .commit_data(last_index, None)
        .expect("leader should accept commit_data");
    assert!(handle.wait().is_ok(), "commit should reach a majority");

    thread::sleep(Duration::from_millis(200));
    for (&id, store) in &cluster.stores {
        if id == leader_id {
            continue;
        }
        assert_eq!(store.entry(1).map(|e| e.payload), Some(b"hello".to_vec()));
    }
}

#[test]
fn leader_failure_triggers_a_new_election() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let first_leader = cluster.wait_for_leader(Duration::from_secs(2)).expect("no leader elected");

    cluster.registry.down(first_leader);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut new_leader = None;
    while std::time::Instant::now() < deadline {
        if let Some(id) = cluster.leader() {
            if id != first_leader {
                new_leader = Some(id);
                break;
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(new_leader.is_some(), "a surviving node should take over leadership");
    assert_ne!(new_leader, Some(first_leader));
}

#[test]
fn append_entries_with_stale_term_is_rejected() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let _ = cluster.wait_for_leader(Duration::from_secs(2));

    let follower_id = *cluster.nodes.keys().find(|&&id| !cluster.nodes[&id].is_leader()).unwrap();
    let follower = cluster.nodes.get(&follower_id).unwrap();

    let stale_request = AppendEntriesRequest {
        term: 0,
        leader_id: 99,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![],
        leader_commit: 0,
    };
    let response = follower.handle_append_entries(stale_request);
    assert!(!response.success);
}
