use thiserror::Error;

use crate::data::Term;

/// Errors surfaced by the Raft engine.
///
/// Protocol-level rejections (`StaleTerm`, `LogInconsistency`) are never
/// handed to the application directly -- they are folded into RPC replies
/// by `Context`. The variants an application actually observes are
/// `NotLeader` and `Abandoned`, both delivered through a `commit_data`
/// future, plus lifecycle transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaftError {
    /// A request carried a term older than ours; the sender should adopt
    /// `current_term` and retry.
    #[error("stale term: request term is behind current term {current_term}")]
    StaleTerm { current_term: Term },

    /// The leader and follower logs disagree at `prev_log_index`.
    #[error("log inconsistency at index {prev_log_index}")]
    LogInconsistency { prev_log_index: u64 },

    /// `commit_data` was called on a node that is not currently Leader.
    #[error("this node is not the leader")]
    NotLeader,

    /// A pending commit was abandoned because the node lost leadership
    /// before a majority acknowledged it.
    #[error("pending commit at index {index} was abandoned")]
    Abandoned { index: u64 },

    /// An outbound RPC did not complete (timeout, connection refused,
    /// peer unreachable). Treated as a missed response; the next
    /// broadcast tick retries.
    #[error("transport failure talking to peer {peer_id}")]
    TransportFailure { peer_id: u32 },

    /// `commit_data` was called while `data_replication_enabled` is false.
    #[error("data replication is disabled on this node")]
    ReplicationDisabled,

    /// A local invariant was violated (e.g. the current term tried to
    /// decrease). These are fatal: the node should terminate rather than
    /// silently coerce the state.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
