//! The role FSM: `Standby -> Follower -> Candidate -> Leader`, with
//! back-edges to `Follower` on term increase or loss of quorum evidence.
//!
//! This is a pure function of `(role, event) -> (role, actions)` rather
//! than a state machine that holds a back-reference to `Context`.
//! `Context`/`Driver` owns both the event source (timers, RPC handlers)
//! and the sink (executing the returned actions), which avoids a cyclic
//! reference an observer-based design would otherwise need.

use crate::data::Role;

/// Events that can drive a role transition. `Elected` is this crate's
/// name for a majority of `RequestVote` replies already granted --
/// `Context` only emits it once it has actually tallied a majority, so
/// by the time the FSM sees it the majority has already been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Init,
    ElectionTimeout,
    Elected,
    HigherTermObserved,
    BroadcastTick,
    AppendEntriesFromLeader,
    Shutdown,
}

/// Entry actions a transition asks the owner to perform. `StateMachine`
/// never performs these itself -- it only describes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartElectionTimer,
    StopElectionTimer,
    ResetElectionTimer,
    StartBroadcastTimer,
    StopBroadcastTimer,
    IncreaseTerm,
    VoteForMe,
    RequestVote,
    InitPeerCursors,
    Broadcast,
    AdoptTerm,
    ClearVote,
    AbandonPendingCommits,
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: Role,
    pub to: Role,
    pub actions: &'static [Action],
}

impl Transition {
    pub fn changed_role(&self) -> bool {
        self.from != self.to
    }
}

pub struct StateMachine {
    role: Role,
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine { role: Role::Standby }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine::default()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Applies `event` to the current role and returns the transition
    /// taken. Event/role combinations with no entry in the table above
    /// are no-ops: the role is unchanged and no actions fire.
    pub fn handle(&mut self, event: Event) -> Transition {
        use Action::*;
        use Event::*;
        use Role::*;

        let from = self.role;
        let (to, actions): (Role, &'static [Action]) = match (from, event) {
            (Standby, Init) => (Follower, &[StartElectionTimer]),

            (Follower, ElectionTimeout) => {
                (Candidate, &[IncreaseTerm, VoteForMe, RequestVote, ResetElectionTimer])
            }
            (Follower, AppendEntriesFromLeader) => (Follower, &[ResetElectionTimer]),

            (Candidate, ElectionTimeout) => {
                (Candidate, &[IncreaseTerm, VoteForMe, RequestVote, ResetElectionTimer])
            }
            (Candidate, Elected) => {
                (Leader, &[StopElectionTimer, InitPeerCursors, StartBroadcastTimer, Broadcast])
            }
            (Candidate, AppendEntriesFromLeader) => (Follower, &[ResetElectionTimer]),

            (Leader, BroadcastTick) => (Leader, &[Broadcast]),

            // "Any, HigherTermObserved -> Follower" applies uniformly,
            // including a no-op re-entry from Follower itself.
            (_, HigherTermObserved) => {
                (Follower, &[AdoptTerm, ClearVote, StopBroadcastTimer, StartElectionTimer])
            }

            // "Any, Shutdown -> Standby" applies uniformly.
            (_, Shutdown) => {
                (Standby, &[StopElectionTimer, StopBroadcastTimer, AbandonPendingCommits])
            }

            (role, _) => (role, &[]),
        };

        self.role = to;
        Transition { from, to, actions }
    }
}
