//! `Context`: owns all Raft state and the peer table, hosts the RPC
//! handlers, and drives election and replication. Runs exclusively on the
//! single `Driver` thread -- every mutation of term/vote/log/cursor
//! state happens there, which is
//! how this crate satisfies "all mutations must be serialized" without a
//! coarse mutex: there is exactly one thread that is ever allowed to
//! touch a `Context`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::config::Config;
use crate::data::{CommitInfo, NodeId, Role, Term, VoteState};
use crate::error::RaftError;
use crate::lifecycle::LifecycleBridge;
use crate::pending_commits::{CommitHandle, PendingCommits};
use crate::peer::OtherNode;
use crate::rpc::{AppendClient, AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest,
                  RequestVoteResponse, VoteClient};
use crate::state_machine::{Action, Event, StateMachine};
use crate::store::DataStore;
use crate::timers::{BroadcastTimer, Clock, ElectionTimer};

/// Everything the `Driver` thread's event loop can receive: inbound RPCs
/// (with a reply channel so the caller can block on the response), peer
/// response events, timer firings, and the `commit_data` trigger.
pub enum DriverEvent {
    RequestVoteRpc { request: RequestVoteRequest, reply: Sender<RequestVoteResponse> },
    AppendEntriesRpc { request: AppendEntriesRequest, reply: Sender<AppendEntriesResponse> },
    RequestVoteResponse { from: NodeId, term: Term, granted: bool },
    AppendEntriesAck { from: NodeId, term: Term, success: bool, match_index: u64 },
    ElectionTimeout,
    BroadcastTick,
    CommitRequested { index: u64 },
    Shutdown,
}

/// Constructs a peer's pair of RPC clients. Supplied by the host
/// application/transport; the core never constructs a client itself.
pub trait PeerClientFactory: Send {
    fn build(&self, peer_id: NodeId) -> (Box<dyn VoteClient>, Box<dyn AppendClient>);
}

pub struct Context {
    config: Arc<Config>,
    store: Arc<dyn DataStore>,
    lifecycle: Arc<LifecycleBridge>,
    pending_commits: Arc<PendingCommits>,

    fsm: StateMachine,
    term: Term,
    vote_state: VoteState,
    last_commit: CommitInfo,
    broadcast_received: bool,

    peers: HashMap<NodeId, OtherNode>,
    election_timer: Arc<ElectionTimer>,
    broadcast_timer: Arc<BroadcastTimer>,

    role_cache: Arc<AtomicU8>,
    term_cache: Arc<AtomicU64>,

    pending_transitions: Vec<crate::state_machine::Transition>,
}

fn role_to_u8(role: Role) -> u8 {
    match role {
        Role::Standby => 0,
        Role::Follower => 1,
        Role::Candidate => 2,
        Role::Leader => 3,
    }
}

/// A thin, cheaply-cloned handle the application uses from any thread:
/// the `Driver` thread is the only thing that ever touches `Context`
/// directly.
#[derive(Clone)]
pub struct ContextHandle {
    tx: Sender<DriverEvent>,
    store: Arc<dyn DataStore>,
    config: Arc<Config>,
    pending_commits: Arc<PendingCommits>,
    lifecycle: Arc<LifecycleBridge>,
    role_cache: Arc<AtomicU8>,
    term_cache: Arc<AtomicU64>,
}

impl ContextHandle {
    pub fn lifecycle(&self) -> &Arc<LifecycleBridge> {
        &self.lifecycle
    }

    pub fn is_leader(&self) -> bool {
        self.role_cache.load(Ordering::SeqCst) == role_to_u8(Role::Leader)
    }

    /// Leader-only entry point. The
    /// application must have already appended the entry at `index` in
    /// the current term via `DataStore`; this only registers the pending
    /// commit and kicks an immediate broadcast. Never blocks.
    pub fn commit_data(
        &self,
        index: u64,
        callback: Option<Box<dyn FnOnce(Result<(), RaftError>) + Send>>,
    ) -> Result<CommitHandle, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader);
        }
        if !self.config.data_replication_enabled {
            return Err(RaftError::ReplicationDisabled);
        }
        let current_term = self.term_cache.load(Ordering::SeqCst);
        match self.store.entry(index) {
            Some(entry) if entry.term == current_term => {}
            _ => return Err(RaftError::LogInconsistency { prev_log_index: index }),
        }

        let handle = self.pending_commits.register(index, callback);
        let _ = self.tx.send(DriverEvent::CommitRequested { index });
        Ok(handle)
    }

    /// Delivers an inbound `RequestVote` RPC and blocks for the reply:
    /// the request is serialized onto the `Driver` thread and the calling
    /// thread (the transport) waits for its answer.
    pub fn handle_request_vote(&self, request: RequestVoteRequest) -> RequestVoteResponse {
        let (reply, rx) = channel();
        if self.tx.send(DriverEvent::RequestVoteRpc { request, reply }).is_err() {
            return RequestVoteResponse {
                term: self.term_cache.load(Ordering::SeqCst),
                vote_granted: false,
            };
        }
        rx.recv().unwrap_or(RequestVoteResponse {
            term: self.term_cache.load(Ordering::SeqCst),
            vote_granted: false,
        })
    }

    pub fn handle_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        let (reply, rx) = channel();
        if self.tx.send(DriverEvent::AppendEntriesRpc { request, reply }).is_err() {
            return AppendEntriesResponse {
                term: self.term_cache.load(Ordering::SeqCst),
                success: false,
                match_index: 0,
            };
        }
        rx.recv().unwrap_or(AppendEntriesResponse {
            term: self.term_cache.load(Ordering::SeqCst),
            success: false,
            match_index: 0,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(DriverEvent::Shutdown);
    }
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: Arc<Config>,
        store: Arc<dyn DataStore>,
        lifecycle: Arc<LifecycleBridge>,
        pending_commits: Arc<PendingCommits>,
        peers: HashMap<NodeId, OtherNode>,
        election_timer: Arc<ElectionTimer>,
        broadcast_timer: Arc<BroadcastTimer>,
        role_cache: Arc<AtomicU8>,
        term_cache: Arc<AtomicU64>,
    ) -> Self {
        let available_candidates = config.cluster_size();
        Context {
            config,
            store,
            lifecycle,
            pending_commits,
            fsm: StateMachine::new(),
            term: 0,
            vote_state: VoteState::new(available_candidates),
            last_commit: CommitInfo::default(),
            broadcast_received: false,
            peers,
            election_timer,
            broadcast_timer,
            role_cache,
            term_cache,
            pending_transitions: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.fsm.role()
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn last_commit(&self) -> CommitInfo {
        self.last_commit
    }

    fn dispatch(&mut self, event: Event) -> crate::state_machine::Transition {
        let transition = self.fsm.handle(event);
        self.apply_actions(transition.actions);
        self.pending_transitions.push(transition);
        transition
    }

    fn apply_actions(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::StartElectionTimer | Action::ResetElectionTimer => {
                    self.election_timer.reset();
                }
                Action::StopElectionTimer => self.election_timer.stop(),
                Action::StartBroadcastTimer => self.broadcast_timer.start(),
                Action::StopBroadcastTimer => self.broadcast_timer.stop(),
                Action::IncreaseTerm => self.increase_term(),
                Action::VoteForMe => self.vote_for_me(),
                Action::RequestVote => self.request_vote(),
                Action::InitPeerCursors => self.init_peer_cursors(),
                Action::Broadcast => self.broadcast(),
                // The term/vote mutation for a HigherTermObserved
                // transition already happened in `adopt_term` before
                // `dispatch` was called; these two are documentation of
                // that fact for readers of the FSM table, not separate
                // work items here.
                Action::AdoptTerm | Action::ClearVote => {}
                Action::AbandonPendingCommits => self.pending_commits.abandon_all(),
            }
        }
    }

    /// Drains transitions accumulated since the last drain, lowest index
    /// order is irrelevant here -- there is at most one transition per
    /// `Context` call in every code path this crate has.
    pub fn take_transitions(&mut self) -> Vec<crate::state_machine::Transition> {
        std::mem::take(&mut self.pending_transitions)
    }

    pub fn initialize(&mut self) {
        self.dispatch(Event::Init);
    }

    /// Increments the current term and clears the vote. Only valid from
    /// Follower or Candidate, entering Candidate (enforced by the FSM
    /// table, not re-checked here).
    fn increase_term(&mut self) {
        self.term += 1;
        self.vote_state.reset();
        self.term_cache.store(self.term, Ordering::SeqCst);
    }

    fn vote_for_me(&mut self) {
        self.vote_state.voted = true;
        self.vote_state.voted_for = Some(self.config.node_id);
        self.vote_state.votes_received = 1;
    }

    fn reset_vote(&mut self) {
        self.vote_state.reset();
    }

    /// Adopts a higher term observed in any inbound message: term is set
    /// absolutely (not incremented), vote is cleared, and the FSM is told
    /// so it can fall back to Follower from any role.
    fn adopt_term(&mut self, term: Term) {
        if term <= self.term {
            return;
        }
        self.term = term;
        self.term_cache.store(self.term, Ordering::SeqCst);
        self.reset_vote();
        self.dispatch(Event::HigherTermObserved);
    }

    fn init_peer_cursors(&mut self) {
        let last_index = self.store.last_index();
        for peer in self.peers.values_mut() {
            peer.next_index = last_index + 1;
            peer.match_index = 0;
        }
    }

    /// Issued on entering Candidate: asks every peer for a vote.
    fn request_vote(&mut self) {
        let request = RequestVoteRequest {
            term: self.term,
            candidate_id: self.config.node_id,
            last_log_index: self.store.last_index(),
            last_log_term: self.store.last_term(),
        };
        info!(
            "node {} requesting votes for term {}",
            self.config.node_id, self.term
        );
        for peer in self.peers.values() {
            peer.send_request_vote(request.clone());
        }
    }

    /// Leader-side heartbeat/replication tick.
    fn broadcast(&mut self) {
        let current_term = self.term;
        let leader_id = self.config.node_id;
        let leader_commit = self.store.commit_index();
        let replication_enabled = self.config.data_replication_enabled;
        let last_index = self.store.last_index();

        for peer in self.peers.values() {
            let prev_log_index = peer.next_index.saturating_sub(1);
            let prev_log_term = if prev_log_index == 0 {
                0
            } else {
                self.store.entry(prev_log_index).map(|e| e.term).unwrap_or(0)
            };
            let entries = if replication_enabled && peer.next_index <= last_index {
                (peer.next_index..=last_index).filter_map(|i| self.store.entry(i)).collect()
            } else {
                Vec::new()
            };
            let request = AppendEntriesRequest {
                term: current_term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            };
            peer.send_append_entries(request);
        }
    }

    /// RequestVote decision.
    pub fn vote(
        &mut self,
        term: Term,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: Term,
    ) -> (Term, bool) {
        if term < self.term {
            return (self.term, false);
        }
        if term > self.term {
            self.adopt_term(term);
        }

        let our_last_term = self.store.last_term();
        let our_last_index = self.store.last_index();
        let log_up_to_date = last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index);
        let can_vote = !self.vote_state.voted || self.vote_state.voted_for == Some(candidate_id);
        let granted = can_vote && log_up_to_date;

        if granted {
            self.vote_state.voted = true;
            self.vote_state.voted_for = Some(candidate_id);
            self.election_timer.reset();
        }
        debug!(
            "node {} vote decision for candidate {} in term {}: granted={}",
            self.config.node_id, candidate_id, term, granted
        );
        (self.term, granted)
    }

    pub fn on_request_vote_requested(&mut self, request: RequestVoteRequest) -> RequestVoteResponse {
        let (term, granted) = self.vote(
            request.term,
            request.candidate_id,
            request.last_log_index,
            request.last_log_term,
        );
        RequestVoteResponse { term, vote_granted: granted }
    }

    /// Processes a vote response against the current term, checking for
    /// a majority.
    pub fn on_request_vote_response(&mut self, term: Term, granted: bool) {
        if term > self.term {
            self.adopt_term(term);
            return;
        }
        if term < self.term || self.fsm.role() != Role::Candidate {
            return; // stale response for a term/role we've moved past
        }
        if granted {
            self.vote_state.votes_received += 1;
            if self.vote_state.has_majority() {
                self.dispatch(Event::Elected);
            }
        }
    }

    /// AppendEntries handler.
    pub fn on_append_entries_requested(
        &mut self,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        if request.term < self.term {
            return AppendEntriesResponse { term: self.term, success: false, match_index: 0 };
        }
        if request.term > self.term {
            self.adopt_term(request.term);
        } else {
            // Valid leader for our term: reset the timer and, if we were
            // still a Candidate, step down.
            self.dispatch(Event::AppendEntriesFromLeader);
        }
        self.broadcast_received = true;

        if request.prev_log_index > 0 {
            match self.store.entry(request.prev_log_index) {
                Some(entry) if entry.term == request.prev_log_term => {}
                _ => {
                    warn!(
                        "node {} rejecting append_entries: log inconsistency at {}",
                        self.config.node_id, request.prev_log_index
                    );
                    return AppendEntriesResponse {
                        term: self.term,
                        success: false,
                        match_index: 0,
                    };
                }
            }
        }

        let effective_entries: &[crate::data::LogEntry] =
            if self.config.data_replication_enabled { &request.entries } else { &[] };

        let mut last_new_index = request.prev_log_index;
        for entry in effective_entries {
            match self.store.entry(entry.index) {
                Some(existing) if existing.term != entry.term => {
                    self.store.truncate_from(entry.index);
                    self.store.append(std::slice::from_ref(entry));
                }
                Some(_) => {}
                None => {
                    self.store.append(std::slice::from_ref(entry));
                }
            }
            last_new_index = entry.index;
        }

        if request.leader_commit > self.store.commit_index() {
            let new_commit = request.leader_commit.min(last_new_index);
            self.store.set_commit_index(new_commit);
            if let Some(entry) = self.store.entry(new_commit) {
                self.last_commit = CommitInfo { index: new_commit, term: entry.term };
            }
        }

        AppendEntriesResponse { term: self.term, success: true, match_index: last_new_index }
    }

    /// Leader-side handling of a peer's AppendEntries reply.
    pub fn on_broadcast_response(
        &mut self,
        from: NodeId,
        match_index: u64,
        term: Term,
        success: bool,
    ) {
        if term > self.term {
            self.adopt_term(term);
            self.pending_commits.abandon_all();
            return;
        }
        if term < self.term || self.fsm.role() != Role::Leader {
            return;
        }

        let Some(peer) = self.peers.get_mut(&from) else { return };
        if success {
            // match_index is monotonically non-decreasing per peer.
            if match_index > peer.match_index {
                peer.match_index = match_index;
            }
            peer.next_index = peer.match_index + 1;
            self.recompute_commit_index();
        } else {
            peer.next_index = peer.next_index.saturating_sub(1).max(1);
        }
    }

    fn recompute_commit_index(&mut self) {
        if self.fsm.role() != Role::Leader {
            return;
        }
        let mut match_indices: Vec<u64> = self.peers.values().map(|p| p.match_index).collect();
        match_indices.push(self.store.last_index()); // leader is always caught up with itself
        match_indices.sort_unstable_by(|a, b| b.cmp(a));

        let majority_idx = (self.config.cluster_size() as usize) / 2;
        let Some(&candidate) = match_indices.get(majority_idx) else { return };
        if candidate <= self.last_commit.index {
            return;
        }
        if let Some(entry) = self.store.entry(candidate) {
            if entry.term == self.term {
                self.last_commit = CommitInfo { index: candidate, term: entry.term };
                self.store.set_commit_index(candidate);
                self.pending_commits.resolve_through(candidate);
            }
        }
    }
}

/// Builds a `Context` + its `Driver` thread + the `ContextHandle` the
/// application uses. This is the one place the server's constituent
/// pieces are wired together, collapsed into a single constructor since
/// this crate models the driver loop as one unified event enum instead
/// of per-role message handling.
pub struct Driver {
    thread: Option<JoinHandle<()>>,
}

impl Driver {
    pub fn spawn(
        config: Config,
        store: Arc<dyn DataStore>,
        clock: Arc<dyn Clock>,
        client_factory: Box<dyn PeerClientFactory>,
        lifecycle: Arc<LifecycleBridge>,
    ) -> (Driver, ContextHandle) {
        config.validate().expect("invalid raft configuration");
        let config = Arc::new(config);
        let (tx, rx): (Sender<DriverEvent>, Receiver<DriverEvent>) = channel();

        let election_tx = tx.clone();
        let election_timer = ElectionTimer::new(
            clock.clone(),
            config.election_timeout_min(),
            config.election_timeout_max(),
            move || {
                let _ = election_tx.send(DriverEvent::ElectionTimeout);
            },
        );

        let broadcast_tx = tx.clone();
        let broadcast_timer = BroadcastTimer::new(clock, config.broadcast_timeout(), move || {
            let _ = broadcast_tx.send(DriverEvent::BroadcastTick);
        });

        let mut peers = HashMap::new();
        for &peer_id in config.peer_ids.iter().filter(|&&id| id != config.node_id) {
            let (vote_client, append_client) = client_factory.build(peer_id);
            peers.insert(
                peer_id,
                OtherNode::spawn(peer_id, vote_client, append_client, tx.clone()),
            );
        }

        let pending_commits = Arc::new(PendingCommits::new());
        let role_cache = Arc::new(AtomicU8::new(role_to_u8(Role::Standby)));
        let term_cache = Arc::new(AtomicU64::new(0));

        let mut context = Context::new(
            config.clone(),
            store.clone(),
            lifecycle.clone(),
            pending_commits.clone(),
            peers,
            election_timer,
            broadcast_timer,
            role_cache.clone(),
            term_cache.clone(),
        );

        let handle = ContextHandle {
            tx: tx.clone(),
            store,
            config,
            pending_commits,
            lifecycle: lifecycle.clone(),
            role_cache,
            term_cache,
        };

        let node_id = handle.config.node_id;
        let thread = thread::Builder::new()
            .name(format!("raft-driver-{node_id}"))
            .spawn(move || {
                context.initialize();
                publish_transitions(&mut context);
                run_driver_loop(context, rx);
            })
            .expect("failed to spawn raft driver thread");

        (Driver { thread: Some(thread) }, handle)
    }

    /// Blocks until the driver thread has shut down and exited.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn publish_transitions(context: &mut Context) {
    for transition in context.take_transitions() {
        if transition.changed_role() {
            context.lifecycle.on_role_changed(transition.to);
            context.role_cache.store(role_to_u8(transition.to), Ordering::SeqCst);
        }
    }
}


fn run_driver_loop(mut context: Context, rx: Receiver<DriverEvent>) {
    for event in rx.iter() {
        let is_shutdown = matches!(event, DriverEvent::Shutdown);
        match event {
            DriverEvent::RequestVoteRpc { request, reply } => {
                let response = context.on_request_vote_requested(request);
                let _ = reply.send(response);
            }
            DriverEvent::AppendEntriesRpc { request, reply } => {
                let response = context.on_append_entries_requested(request);
                let _ = reply.send(response);
            }
            DriverEvent::RequestVoteResponse { from: _, term, granted } => {
                context.on_request_vote_response(term, granted);
            }
            DriverEvent::AppendEntriesAck { from, term, success, match_index } => {
                context.on_broadcast_response(from, match_index, term, success);
            }
            DriverEvent::ElectionTimeout => {
                context.dispatch(Event::ElectionTimeout);
            }
            DriverEvent::BroadcastTick => {
                context.dispatch(Event::BroadcastTick);
            }
            DriverEvent::CommitRequested { index: _ } => {
                if context.role() == Role::Leader {
                    context.broadcast();
                }
            }
            DriverEvent::Shutdown => {
                context.dispatch(Event::Shutdown);
            }
        }
        publish_transitions(&mut context);
        if is_shutdown {
            break;
        }
    }
}
