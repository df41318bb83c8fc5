//! Leader-election and log-replication engine for small clusters of
//! cooperating processes.
//!
//! A node moves through `Standby -> Follower -> Candidate -> Leader`
//! (see [`state_machine`]) driven by a single actor thread (see
//! [`context`]) that owns all mutable Raft state and is fed by timers
//! ([`timers`]), peer RPC responses ([`peer`]), and inbound RPCs routed
//! in from the host's transport. [`node::RaftNode`] is the entry point
//! most applications want; [`context::ContextHandle`] is the lower-level
//! handle it wraps for callers that want to manage the driver thread
//! themselves.
//!
//! This crate does not provide a transport: [`rpc::VoteClient`] and
//! [`rpc::AppendClient`] are the boundary a host implements over
//! whatever RPC mechanism it already has.

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod peer;
pub mod pending_commits;
pub mod rpc;
pub mod state_machine;
pub mod store;
pub mod timers;

pub use config::Config;
pub use data::{CommitInfo, LogEntry, NodeId, Role, Term};
pub use error::RaftError;
pub use node::RaftNode;
