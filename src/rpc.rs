//! Wire shapes for the two RPCs this engine exchanges with peers,
//! and the trait boundary for the transport that actually
//! carries them. The transport, and any codec it wants to use for these
//! `serde`-derived structs, is an external collaborator -- this crate
//! only needs something that can `send` a request and hand back a
//! response or a `TransportFailure`.

use serde::{Deserialize, Serialize};

use crate::data::{LogEntry, NodeId, Term};
use crate::error::RaftError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: u64,
}

/// A client handle capable of sending `RequestVote` to one peer.
///
/// Implementations own whatever transport/connection state is needed;
/// `OtherNode` never retries internally on failure -- the leader's next
/// broadcast tick (or next election) does.
pub trait VoteClient: Send {
    fn request_vote(&self, request: RequestVoteRequest) -> Result<RequestVoteResponse, RaftError>;
}

/// A client handle capable of sending `AppendEntries` to one peer.
pub trait AppendClient: Send {
    fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RaftError>;
}
