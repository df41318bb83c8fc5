//! Core data types shared by every component: terms, node ids, log entries
//! and the commit/vote bookkeeping that rides alongside them.

use serde::{Deserialize, Serialize};

/// A monotonically non-decreasing election epoch.
///
/// Invariant: a node's `current_term` never decreases. Observing a higher
/// term in any inbound message forces adoption of that term and a
/// transition to `Follower` with the vote cleared.
pub type Term = u64;

/// Id of a node, unique within one cluster.
pub type NodeId = u32;

/// One entry in the replicated log. Indices are 1-based and dense.
///
/// Log matching invariant: if two logs contain an entry with the same
/// `index` and `term`, every prior entry is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: Term,
    pub payload: Vec<u8>,
}

/// The highest entry known to be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitInfo {
    pub index: u64,
    pub term: Term,
}

/// The four roles of the Raft role FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Standby,
    Follower,
    Candidate,
    Leader,
}

/// Per-term voting bookkeeping. Reset whenever the term changes.
#[derive(Debug, Clone)]
pub struct VoteState {
    pub voted: bool,
    pub voted_for: Option<NodeId>,
    pub votes_received: u32,
    pub available_candidates: u32,
}

impl VoteState {
    pub fn new(available_candidates: u32) -> Self {
        VoteState {
            voted: false,
            voted_for: None,
            votes_received: 0,
            available_candidates,
        }
    }

    pub fn reset(&mut self) {
        self.voted = false;
        self.voted_for = None;
        self.votes_received = 0;
    }

    pub fn has_majority(&self) -> bool {
        self.votes_received > self.available_candidates / 2
    }
}
