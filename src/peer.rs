//! `OtherNode`: one entry per remote peer, encapsulating its two RPC
//! clients and its replication cursor. Grounded in a `Peer`/`PeerHandle`
//! split: a background thread owns the blocking client calls so the `Driver`
//! thread never stalls on a slow or dead peer, and the handle left
//! behind in `Context` only tracks cursor state and a channel to that
//! thread.

use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle};

use crate::context::DriverEvent;
use crate::data::NodeId;
use crate::rpc::{AppendClient, AppendEntriesRequest, RequestVoteRequest, VoteClient};

enum PeerCommand {
    SendRequestVote(RequestVoteRequest),
    SendAppendEntries(AppendEntriesRequest),
    Shutdown,
}

/// Replication cursor and messaging handle for one peer. Owned by
/// `Context`, which never accesses the clients directly -- only through
/// this non-blocking handle.
pub struct OtherNode {
    pub id: NodeId,
    pub next_index: u64,
    pub match_index: u64,
    to_peer: Sender<PeerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl OtherNode {
    /// Spawns the background thread that owns this peer's RPC clients.
    pub fn spawn(
        id: NodeId,
        vote_client: Box<dyn VoteClient>,
        append_client: Box<dyn AppendClient>,
        to_main: Sender<DriverEvent>,
    ) -> Self {
        let (to_peer, from_main) = channel();
        let thread = thread::Builder::new()
            .name(format!("raft-peer-{id}"))
            .spawn(move || {
                let worker = PeerWorker { id, vote_client, append_client, to_main };
                worker.run(from_main);
            })
            .expect("failed to spawn peer thread");

        OtherNode { id, next_index: 1, match_index: 0, to_peer, thread: Some(thread) }
    }

    /// Non-blocking: hands the request to the peer's background thread
    /// and returns immediately. Never retried internally -- if the send
    /// fails (thread gone) or the RPC fails, the next broadcast tick
    /// tries again.
    pub fn send_request_vote(&self, request: RequestVoteRequest) {
        let _ = self.to_peer.send(PeerCommand::SendRequestVote(request));
    }

    pub fn send_append_entries(&self, request: AppendEntriesRequest) {
        let _ = self.to_peer.send(PeerCommand::SendAppendEntries(request));
    }
}

impl Drop for OtherNode {
    /// Blocks until the peer thread exits. May block a while if the peer
    /// is mid-RPC against an unresponsive remote.
    fn drop(&mut self) {
        let _ = self.to_peer.send(PeerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct PeerWorker {
    id: NodeId,
    vote_client: Box<dyn VoteClient>,
    append_client: Box<dyn AppendClient>,
    to_main: Sender<DriverEvent>,
}

impl PeerWorker {
    fn run(self, from_main: std::sync::mpsc::Receiver<PeerCommand>) {
        loop {
            match from_main.recv() {
                Ok(PeerCommand::SendRequestVote(request)) => self.request_vote(request),
                Ok(PeerCommand::SendAppendEntries(request)) => self.append_entries(request),
                Ok(PeerCommand::Shutdown) | Err(_) => break,
            }
        }
    }

    fn request_vote(&self, request: RequestVoteRequest) {
        if let Ok(response) = self.vote_client.request_vote(request) {
            let _ = self.to_main.send(DriverEvent::RequestVoteResponse {
                from: self.id,
                term: response.term,
                granted: response.vote_granted,
            });
        }
        // Err is a TransportFailure: treated as a missed response, the
        // next broadcast/election retries rather than raising anywhere.
    }

    fn append_entries(&self, request: AppendEntriesRequest) {
        if let Ok(response) = self.append_client.append_entries(request) {
            let _ = self.to_main.send(DriverEvent::AppendEntriesAck {
                from: self.id,
                term: response.term,
                success: response.success,
                match_index: response.match_index,
            });
        }
    }
}
