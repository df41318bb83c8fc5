//! `RaftNode`: the crate's front door. Wires a `Config`, a `DataStore`,
//! a `Clock`, and a peer-client factory into a running `Driver` thread
//! and hands back the `ContextHandle` applications actually call into,
//! collapsed into a single constructor to match this crate's
//! single-event-enum driver loop.

use std::sync::Arc;

use crate::config::Config;
use crate::context::{ContextHandle, Driver, PeerClientFactory};
use crate::error::RaftError;
use crate::lifecycle::{LifecycleBridge, LifecycleHost, LifecyclePublisher};
use crate::pending_commits::CommitHandle;
use crate::rpc::{AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest,
                  RequestVoteResponse};
use crate::store::DataStore;
use crate::timers::{Clock, SystemClock};

/// A running Raft node. Dropping this does not shut the driver down by
/// itself -- call `shutdown` and then `join` for a clean exit, the same
/// two-step teardown the peer threads use.
pub struct RaftNode {
    driver: Option<Driver>,
    handle: ContextHandle,
}

impl RaftNode {
    /// Boots a node against real wall-clock timers. Most applications
    /// want this; `with_clock` exists for deterministic tests.
    pub fn start(
        config: Config,
        store: Arc<dyn DataStore>,
        client_factory: Box<dyn PeerClientFactory>,
        host: Option<Box<dyn LifecycleHost>>,
    ) -> RaftNode {
        RaftNode::with_clock(config, store, Arc::new(SystemClock), client_factory, host)
    }

    pub fn with_clock(
        config: Config,
        store: Arc<dyn DataStore>,
        clock: Arc<dyn Clock>,
        client_factory: Box<dyn PeerClientFactory>,
        host: Option<Box<dyn LifecycleHost>>,
    ) -> RaftNode {
        let lifecycle = Arc::new(LifecycleBridge::new(host));
        let (driver, handle) = Driver::spawn(config, store, clock, client_factory, lifecycle);
        RaftNode { driver: Some(driver), handle }
    }

    pub fn add_lifecycle_publisher(&self, publisher: std::sync::Weak<dyn LifecyclePublisher>) {
        self.handle.lifecycle().add_publisher(publisher);
    }

    pub fn is_leader(&self) -> bool {
        self.handle.is_leader()
    }

    /// See `ContextHandle::commit_data`.
    pub fn commit_data(
        &self,
        index: u64,
        callback: Option<Box<dyn FnOnce(Result<(), RaftError>) + Send>>,
    ) -> Result<CommitHandle, RaftError> {
        self.handle.commit_data(index, callback)
    }

    pub fn handle_request_vote(&self, request: RequestVoteRequest) -> RequestVoteResponse {
        self.handle.handle_request_vote(request)
    }

    pub fn handle_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        self.handle.handle_append_entries(request)
    }

    /// A cheaply-cloneable reference to this node usable from any thread,
    /// e.g. from the transport layer's RPC dispatch callbacks.
    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Signals the driver thread to stop and blocks until it has. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
        if let Some(driver) = self.driver.take() {
            driver.join();
        }
    }
}

impl Drop for RaftNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
